// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Resolution of the gateway's hostnames.

use itertools::Itertools;
use serde::Serialize;
use slog::Logger;
use slog::info;
use slog::warn;
use std::collections::BTreeMap;
use std::net::ToSocketAddrs;
use vpngw_api::DomainName;
use vpngw_api::IpAddr;

/// The addresses one hostname resolved to.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ResolvedAddresses {
    pub ipv4: Vec<IpAddr>,
    pub ipv6: Vec<IpAddr>,
}

impl ResolvedAddresses {
    pub fn from_addrs(addrs: impl IntoIterator<Item = IpAddr>) -> Self {
        let (ipv4, ipv6): (Vec<IpAddr>, Vec<IpAddr>) = addrs
            .into_iter()
            .sorted()
            .dedup()
            .partition(|a| a.is_ipv4());

        Self { ipv4, ipv6 }
    }

    pub fn is_empty(&self) -> bool {
        self.ipv4.is_empty() && self.ipv6.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IpAddr> {
        self.ipv4.iter().chain(self.ipv6.iter())
    }
}

/// Something able to look up the addresses of a hostname.
pub trait Resolver {
    fn lookup(&self, name: &DomainName) -> std::io::Result<Vec<IpAddr>>;
}

/// Resolution through the system resolver.
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn lookup(&self, name: &DomainName) -> std::io::Result<Vec<IpAddr>> {
        Ok((name.as_str(), 0).to_socket_addrs()?.map(|sa| sa.ip()).collect())
    }
}

/// Resolve every hostname once.
///
/// A name that fails to resolve maps to empty address lists; this is
/// logged, not fatal.
pub fn resolve_hostnames(
    resolver: &dyn Resolver,
    names: &[DomainName],
    log: &Logger,
) -> BTreeMap<DomainName, ResolvedAddresses> {
    let mut resolved = BTreeMap::new();

    for name in names {
        let addrs = match resolver.lookup(name) {
            Ok(addrs) => ResolvedAddresses::from_addrs(addrs),
            Err(e) => {
                warn!(log, "failed to resolve hostname";
                    "hostname" => %name,
                    "error" => %e,
                );
                ResolvedAddresses::default()
            }
        };

        if !addrs.is_empty() {
            info!(log, "resolved hostname";
                "hostname" => %name,
                "addresses" => addrs.iter().join(","),
            );
        }

        resolved.insert(name.clone(), addrs);
    }

    resolved
}
