// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Hostnames the gateway is reachable under.

use core::fmt;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;

const MAX_NAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// A DNS hostname in letter-digit-hyphen form.
///
/// Names are lowercased on construction and a single trailing dot is
/// dropped, so `VPN.Example.com.` and `vpn.example.com` compare equal.
/// Server certificates carry these as DNS subject alternative names.
#[derive(
    Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct DomainName(String);

impl DomainName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }
}

fn validate_label(name: &str, label: &str) -> Result<(), String> {
    if label.is_empty() {
        return Err(format!("empty label in hostname: {name}"));
    }

    if label.len() > MAX_LABEL_LEN {
        return Err(format!(
            "label longer than {MAX_LABEL_LEN} bytes in hostname: {name}"
        ));
    }

    if label.starts_with('-') || label.ends_with('-') {
        return Err(format!(
            "label may not begin or end with '-' in hostname: {name}"
        ));
    }

    if let Some(c) =
        label.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '-'))
    {
        return Err(format!("invalid character {c:?} in hostname: {name}"));
    }

    Ok(())
}

impl FromStr for DomainName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let name = trimmed.strip_suffix('.').unwrap_or(trimmed);

        if name.is_empty() {
            return Err("empty hostname".to_string());
        }

        if name.len() > MAX_NAME_LEN {
            return Err(format!(
                "hostname longer than {MAX_NAME_LEN} bytes: {name}"
            ));
        }

        for label in name.split('.') {
            validate_label(name, label)?;
        }

        Ok(Self(name.to_ascii_lowercase()))
    }
}

impl TryFrom<String> for DomainName {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<DomainName> for String {
    fn from(name: DomainName) -> Self {
        name.0
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for DomainName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
