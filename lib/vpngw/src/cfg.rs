// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Gateway configuration.
//!
//! The configuration is read once at startup from the environment,
//! optionally layered over a TOML file, and is immutable afterwards.
//! Nothing downstream reads process state directly.

use crate::Error;
use crate::Result;
use crate::policy::PolicyFlags;
use serde::Deserialize;
use serde::Serialize;
use vpngw_api::AddressFamily;
use vpngw_api::DomainName;
use vpngw_api::IpAddr;
use vpngw_api::Ipv4Addr;
use vpngw_api::Ipv4Cidr;
use vpngw_api::Ipv6Cidr;

pub const ALLOW_INTERCLIENT_COMMUNICATION: &str =
    "ALLOW_INTERCLIENT_COMMUNICATION";
pub const CLIENT_SUBNET_IPV4: &str = "CLIENT_SUBNET_IPV4";
pub const CLIENT_SUBNET_IPV6: &str = "CLIENT_SUBNET_IPV6";
pub const DNS_SERVERS: &str = "DNS_SERVERS";
pub const PROTECT_CLIENTS_FROM_INTERNET: &str = "PROTECT_CLIENTS_FROM_INTERNET";
pub const USE_DOCKER_DNS: &str = "USE_DOCKER_DNS";
pub const USE_INTERNAL_PKI: &str = "USE_INTERNAL_PKI";
pub const VPN_HOSTNAMES: &str = "VPN_HOSTNAMES";

pub const DEFAULT_CLIENT_SUBNET_IPV4: &str = "10.0.0.0/24";
pub const DEFAULT_CLIENT_SUBNET_IPV6: &str = "fd00:dead:beef:affe::/64";
pub const DEFAULT_DNS_SERVERS: &str =
    "8.8.8.8, 8.8.4.4, 2001:4860:4860::8888, 2001:4860:4860::8844";

/// The resolver embedded into Docker's user-defined networks.
pub const DOCKER_DNS_SERVER: IpAddr = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 11));

/// The validated gateway configuration.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Config {
    pub client_subnet_ipv4: Ipv4Cidr,
    pub client_subnet_ipv6: Ipv6Cidr,
    pub flags: PolicyFlags,
    pub use_internal_pki: bool,
    pub use_docker_dns: bool,

    /// The resolvers the gateway's DNS server forwards to.
    pub dns_servers: Vec<IpAddr>,

    /// The names clients use to reach the gateway. These become the
    /// DNS subject alternative names of the server certificate.
    pub vpn_hostnames: Vec<DomainName>,
}

/// The TOML configuration file.
///
/// Keys are the lowercase form of the environment variable names.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    allow_interclient_communication: Option<bool>,
    client_subnet_ipv4: Option<String>,
    client_subnet_ipv6: Option<String>,
    dns_servers: Option<Vec<String>>,
    protect_clients_from_internet: Option<bool>,
    use_docker_dns: Option<bool>,
    use_internal_pki: Option<bool>,
    vpn_hostnames: Option<Vec<String>>,
}

impl ConfigFile {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| {
            Error::config("configuration file", s.trim(), e.to_string())
        })
    }

    /// Look up a key by its environment variable name, rendered the way
    /// the environment would carry it.
    pub fn get(&self, key: &str) -> Option<String> {
        let flag = |v: Option<bool>| v.map(|b| b.to_string());
        let list = |v: &Option<Vec<String>>| v.as_ref().map(|l| l.join(","));

        match key {
            ALLOW_INTERCLIENT_COMMUNICATION => {
                flag(self.allow_interclient_communication)
            }
            CLIENT_SUBNET_IPV4 => self.client_subnet_ipv4.clone(),
            CLIENT_SUBNET_IPV6 => self.client_subnet_ipv6.clone(),
            DNS_SERVERS => list(&self.dns_servers),
            PROTECT_CLIENTS_FROM_INTERNET => {
                flag(self.protect_clients_from_internet)
            }
            USE_DOCKER_DNS => flag(self.use_docker_dns),
            USE_INTERNAL_PKI => flag(self.use_internal_pki),
            VPN_HOSTNAMES => list(&self.vpn_hostnames),
            _ => None,
        }
    }
}

/// Parse a boolean setting.
pub fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(Error::config(
            key,
            raw,
            "expected one of true/false, yes/no, on/off, 1/0",
        )),
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim)
}

fn parse_dns_servers(raw: &str) -> Result<Vec<IpAddr>> {
    let servers = split_list(raw)
        .map(|s| {
            s.parse::<IpAddr>().map_err(|e| {
                Error::config(DNS_SERVERS, s, format!("not an IP address: {e}"))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(servers)
}

fn parse_hostnames(raw: &str) -> Result<Vec<DomainName>> {
    let mut names: Vec<DomainName> = vec![];

    for s in split_list(raw) {
        let name = s
            .parse::<DomainName>()
            .map_err(|e| Error::config(VPN_HOSTNAMES, s, e))?;

        if !names.contains(&name) {
            names.push(name);
        }
    }

    if names.is_empty() {
        return Err(Error::config(
            VPN_HOSTNAMES,
            raw,
            "at least one hostname is required",
        ));
    }

    Ok(names)
}

fn parse_subnet_v4(raw: &str) -> Result<Ipv4Cidr> {
    raw.trim().parse().map_err(|reason| Error::InvalidSubnet {
        family: AddressFamily::Ipv4,
        value: raw.to_string(),
        reason,
    })
}

fn parse_subnet_v6(raw: &str) -> Result<Ipv6Cidr> {
    raw.trim().parse().map_err(|reason| Error::InvalidSubnet {
        family: AddressFamily::Ipv6,
        value: raw.to_string(),
        reason,
    })
}

impl Config {
    /// Build the configuration from a key lookup, typically
    /// `|k| std::env::var(k).ok()`.
    ///
    /// `hostname` is the default for [`VPN_HOSTNAMES`]; callers capture
    /// it once from the system.
    pub fn from_env<F>(lookup: F, hostname: &str) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| {
            lookup(key).unwrap_or_else(|| default.to_string())
        };
        let get_bool =
            |key: &str, default: bool| match lookup(key) {
                Some(raw) => parse_bool(key, &raw),
                None => Ok(default),
            };

        let flags = PolicyFlags {
            allow_interclient_communication: get_bool(
                ALLOW_INTERCLIENT_COMMUNICATION,
                false,
            )?,
            protect_clients_from_internet: get_bool(
                PROTECT_CLIENTS_FROM_INTERNET,
                true,
            )?,
        };

        let client_subnet_ipv4 =
            parse_subnet_v4(&get(CLIENT_SUBNET_IPV4, DEFAULT_CLIENT_SUBNET_IPV4))?;
        let client_subnet_ipv6 =
            parse_subnet_v6(&get(CLIENT_SUBNET_IPV6, DEFAULT_CLIENT_SUBNET_IPV6))?;

        let use_docker_dns = get_bool(USE_DOCKER_DNS, true)?;
        let dns_servers = if use_docker_dns {
            vec![DOCKER_DNS_SERVER]
        } else {
            parse_dns_servers(&get(DNS_SERVERS, DEFAULT_DNS_SERVERS))?
        };

        let use_internal_pki = get_bool(USE_INTERNAL_PKI, true)?;
        let vpn_hostnames = parse_hostnames(&get(VPN_HOSTNAMES, hostname))?;

        Ok(Self {
            client_subnet_ipv4,
            client_subnet_ipv6,
            flags,
            use_internal_pki,
            use_docker_dns,
            dns_servers,
            vpn_hostnames,
        })
    }

    /// Build the configuration from a TOML file alone.
    pub fn from_toml_str(s: &str, hostname: &str) -> Result<Self> {
        let file = ConfigFile::from_toml_str(s)?;
        Self::from_env(|k| file.get(k), hostname)
    }

    /// Build the configuration from the environment layered over an
    /// optional configuration file; the environment wins.
    pub fn from_layers<F>(
        lookup: F,
        file: Option<&ConfigFile>,
        hostname: &str,
    ) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::from_env(
            |k| lookup(k).or_else(|| file.and_then(|f| f.get(k))),
            hostname,
        )
    }
}
