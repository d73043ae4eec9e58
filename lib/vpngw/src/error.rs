// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use std::path::PathBuf;
use thiserror::Error;
use vpngw_api::AddressFamily;

/// Errors that abort a provisioning run.
///
/// None of these are recoverable: the gateway refuses to start rather
/// than run with a partial policy.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid {family} client subnet {value}: {reason}")]
    InvalidSubnet { family: AddressFamily, value: String, reason: String },

    #[error(
        "IPv6 client subnet {subnet} is neither global unicast nor \
         site-local: {reason}"
    )]
    UnsupportedAddressRange { subnet: String, reason: String },

    #[error("external PKI file {} is unusable: {reason}", path.display())]
    MissingExternalPki { path: PathBuf, reason: String },

    #[error("PKI issuance failed: {0}")]
    PkiIssuanceFailure(String),

    #[error("invalid value for {key} ({value:?}): {reason}")]
    Config { key: String, value: String, reason: String },

    #[error("failed to render template {template}: {reason}")]
    Render { template: String, reason: String },

    #[error("command `{command}` failed: {reason}")]
    Apply { command: String, reason: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { context: context.into(), source }
    }

    pub(crate) fn config(
        key: &str,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Config {
            key: key.to_string(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;
