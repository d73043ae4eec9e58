// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Derive the gateway's own address and the client address pool from a
//! configured client subnet.

use crate::Error;
use crate::Result;
use serde::Serialize;
use vpngw_api::AddressFamily;
use vpngw_api::IpAddr;
use vpngw_api::IpCidr;
use vpngw_api::Ipv4Cidr;
use vpngw_api::Ipv6Cidr;
use vpngw_api::Ipv6PrefixLen;

/// The longest IPv4 prefix that still leaves room for a network
/// address, the gateway and at least one client.
pub const IPV4_MAX_PREFIX_LEN: u8 = 30;

/// The widest IPv6 client pool the IPsec daemon can represent.
pub const IPV6_POOL_PREFIX_LEN: u8 = 96;

/// The longest IPv6 prefix that still leaves room for the gateway and a
/// client.
pub const IPV6_MAX_PREFIX_LEN: u8 = 126;

/// IPv4 blocks a client subnet may never touch.
const IPV4_FORBIDDEN: [(Ipv4Cidr, &str); 4] = [
    (Ipv4Cidr::THIS_NET, "\"this network\""),
    (Ipv4Cidr::LOOPBACK, "loopback"),
    (Ipv4Cidr::MCAST, "multicast"),
    (Ipv4Cidr::RESERVED, "reserved"),
];

/// Addressing facts for one address family.
///
/// The only way to obtain a value is [`partition()`], which guarantees
/// `server_address < client_range_start <= client_range_end`, all
/// within `effective_subnet`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ClientAddressing {
    subnet: IpCidr,
    effective_subnet: IpCidr,
    server_address: IpAddr,
    client_range_start: IpAddr,
    client_range_end: IpAddr,
}

impl ClientAddressing {
    pub fn family(&self) -> AddressFamily {
        self.subnet.family()
    }

    /// The client subnet as configured. Firewall rules match on this.
    pub fn subnet(&self) -> IpCidr {
        self.subnet
    }

    /// The subnet the client pool is allocated from. For IPv6 subnets
    /// wider than a /96 this is the first /96 of [`Self::subnet()`].
    pub fn effective_subnet(&self) -> IpCidr {
        self.effective_subnet
    }

    pub fn server_address(&self) -> IpAddr {
        self.server_address
    }

    pub fn client_range_start(&self) -> IpAddr {
        self.client_range_start
    }

    pub fn client_range_end(&self) -> IpAddr {
        self.client_range_end
    }
}

fn invalid(family: AddressFamily, subnet: impl ToString, reason: String) -> Error {
    Error::InvalidSubnet { family, value: subnet.to_string(), reason }
}

/// Partition a client subnet of either family.
pub fn partition(subnet: IpCidr) -> Result<ClientAddressing> {
    match subnet {
        IpCidr::Ip4(v4) => partition_v4(v4),
        IpCidr::Ip6(v6) => partition_v6(v6),
    }
}

/// Partition an IPv4 client subnet.
///
/// Offset 1 is the gateway, offsets 2 through the last address of the
/// block form the client pool.
pub fn partition_v4(subnet: Ipv4Cidr) -> Result<ClientAddressing> {
    let family = AddressFamily::Ipv4;

    if subnet.prefix_len() > IPV4_MAX_PREFIX_LEN {
        return Err(invalid(
            family,
            subnet,
            format!(
                "a /{} holds {} addresses, at least 4 are required",
                subnet.prefix_len(),
                subnet.size()
            ),
        ));
    }

    for (block, name) in IPV4_FORBIDDEN {
        if block.overlaps(&subnet) {
            return Err(invalid(
                family,
                subnet,
                format!("overlaps the {name} block {block}"),
            ));
        }
    }

    let slot = |n| {
        subnet.nth(n).ok_or_else(|| {
            invalid(family, subnet, format!("no address at offset {n}"))
        })
    };

    let server_address = slot(1)?;
    let client_range_start = slot(2)?;

    Ok(ClientAddressing {
        subnet: subnet.into(),
        effective_subnet: subnet.into(),
        server_address: server_address.into(),
        client_range_start: client_range_start.into(),
        client_range_end: subnet.last().into(),
    })
}

/// Partition an IPv6 client subnet.
///
/// A subnet wider than a /96 is narrowed to its first /96 before the
/// same offsets as for IPv4 are taken.
pub fn partition_v6(subnet: Ipv6Cidr) -> Result<ClientAddressing> {
    let family = AddressFamily::Ipv6;

    let effective = if subnet.prefix_len() < IPV6_POOL_PREFIX_LEN {
        Ipv6PrefixLen::new(IPV6_POOL_PREFIX_LEN)
            .ok()
            .and_then(|pl| subnet.first_subnet(pl))
            .ok_or_else(|| {
                invalid(family, subnet, "cannot carve out a /96".to_string())
            })?
    } else {
        subnet
    };

    if effective.prefix_len() > IPV6_MAX_PREFIX_LEN {
        return Err(invalid(
            family,
            subnet,
            format!(
                "a /{} leaves no room for a client pool, at most /{} is \
                 supported",
                effective.prefix_len(),
                IPV6_MAX_PREFIX_LEN
            ),
        ));
    }

    let slot = |n| {
        effective.nth(n).ok_or_else(|| {
            invalid(family, subnet, format!("no address at offset {n}"))
        })
    };

    let server_address = slot(1)?;
    let client_range_start = slot(2)?;

    Ok(ClientAddressing {
        subnet: subnet.into(),
        effective_subnet: effective.into(),
        server_address: server_address.into(),
        client_range_start: client_range_start.into(),
        client_range_end: effective.last().into(),
    })
}
