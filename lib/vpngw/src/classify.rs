// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Classification of the IPv6 client subnet.

use crate::Error;
use crate::Result;
use core::fmt;
use serde::Serialize;
use vpngw_api::Ipv6Cidr;

/// How the IPv6 client subnet relates to the public internet.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum Ipv6Class {
    /// Publicly routable. Client traffic leaves the gateway unmodified
    /// and the neighbor discovery proxy answers for the client pool.
    GlobalUnicast,

    /// Private. Client traffic is masqueraded behind the gateway.
    SiteLocal,
}

impl Ipv6Class {
    pub fn needs_nat(self) -> bool {
        self == Self::SiteLocal
    }
}

impl fmt::Display for Ipv6Class {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::GlobalUnicast => write!(f, "global unicast"),
            Self::SiteLocal => write!(f, "site-local"),
        }
    }
}

const PRIVATE: [Ipv6Cidr; 2] = [Ipv6Cidr::UNIQUE_LOCAL, Ipv6Cidr::SITE_LOCAL];

/// Special-purpose blocks inside 2000::/3 that are not globally
/// routable.
const NON_GLOBAL: [Ipv6Cidr; 3] = [
    Ipv6Cidr::TEREDO,
    Ipv6Cidr::DOCUMENTATION,
    Ipv6Cidr::DOCUMENTATION_2,
];

/// Classify an IPv6 client subnet.
///
/// The whole network must fall into one category. A network reaching
/// outside the private blocks, or outside 2000::/3, or into one of the
/// non-global blocks carved out of it, is rejected.
pub fn classify(net: &Ipv6Cidr) -> Result<Ipv6Class> {
    if PRIVATE.iter().any(|p| p.contains(net)) {
        return Ok(Ipv6Class::SiteLocal);
    }

    let unsupported = |reason: String| Error::UnsupportedAddressRange {
        subnet: net.to_string(),
        reason,
    };

    if let Some(p) = PRIVATE.iter().find(|p| p.overlaps(net)) {
        return Err(unsupported(format!(
            "straddles the private block {p}"
        )));
    }

    if !Ipv6Cidr::GLOBAL_UNICAST.contains(net) {
        return Err(unsupported(format!(
            "not within the private blocks {} or {}, nor within the \
             global unicast block {}",
            Ipv6Cidr::UNIQUE_LOCAL,
            Ipv6Cidr::SITE_LOCAL,
            Ipv6Cidr::GLOBAL_UNICAST,
        )));
    }

    if let Some(block) = NON_GLOBAL.iter().find(|b| b.overlaps(net)) {
        return Err(unsupported(format!(
            "overlaps the special-purpose block {block}"
        )));
    }

    Ok(Ipv6Class::GlobalUnicast)
}

#[cfg(test)]
mod test {
    use super::*;

    fn class(s: &str) -> Result<Ipv6Class> {
        classify(&s.parse().unwrap())
    }

    #[test]
    fn site_local() {
        assert_eq!(
            class("fd00:dead:beef:affe::/64").unwrap(),
            Ipv6Class::SiteLocal
        );
        assert_eq!(class("fc00::/7").unwrap(), Ipv6Class::SiteLocal);
        assert_eq!(class("fec0:1::/64").unwrap(), Ipv6Class::SiteLocal);
        assert!(Ipv6Class::SiteLocal.needs_nat());
    }

    #[test]
    fn global_unicast() {
        assert_eq!(
            class("2a01:4f8:1c1c:affe::/64").unwrap(),
            Ipv6Class::GlobalUnicast
        );
        assert_eq!(class("2600::/12").unwrap(), Ipv6Class::GlobalUnicast);
        assert!(!Ipv6Class::GlobalUnicast.needs_nat());
    }

    #[test]
    fn unsupported() {
        for s in [
            // Contains the documentation block.
            "2001:db8::/8",
            "2001:db8:1::/64",
            "2001::/32",
            "3fff::/24",
            "ff02::/16",
            "fe80::/64",
            "::1/128",
            "::/0",
            // Straddles unique-local and link-local.
            "fc00::/6",
        ] {
            assert!(
                matches!(class(s), Err(Error::UnsupportedAddressRange { .. })),
                "{s} should be rejected"
            );
        }
    }

    #[test]
    fn error_names_subnet() {
        let err = class("2001:db8::/8").unwrap_err();
        assert!(err.to_string().contains("2000::/8"), "{err}");
    }
}
