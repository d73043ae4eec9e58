// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use core::fmt;
use core::fmt::Display;
use core::result;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;

pub use std::net::IpAddr;
pub use std::net::Ipv4Addr;
pub use std::net::Ipv6Addr;

/// The address family a subnet, rule or address range belongs to.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Ipv4 => write!(f, "IPv4"),
            Self::Ipv6 => write!(f, "IPv6"),
        }
    }
}

impl FromStr for AddressFamily {
    type Err = String;

    fn from_str(s: &str) -> result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ipv4" | "v4" | "4" | "inet" => Ok(Self::Ipv4),
            "ipv6" | "v6" | "6" | "inet6" => Ok(Self::Ipv6),
            _ => Err(format!("invalid address family: {s}")),
        }
    }
}

/// An IP protocol value.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub enum Protocol {
    ICMP,
    TCP,
    UDP,
    ESP,
    ICMPv6,
}

impl Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ICMP => write!(f, "ICMP"),
            Self::TCP => write!(f, "TCP"),
            Self::UDP => write!(f, "UDP"),
            Self::ESP => write!(f, "ESP"),
            Self::ICMPv6 => write!(f, "ICMPv6"),
        }
    }
}

/// An IPv4 or IPv6 CIDR.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub enum IpCidr {
    Ip4(Ipv4Cidr),
    Ip6(Ipv6Cidr),
}

impl From<Ipv4Cidr> for IpCidr {
    fn from(cidr: Ipv4Cidr) -> Self {
        IpCidr::Ip4(cidr)
    }
}

impl From<Ipv6Cidr> for IpCidr {
    fn from(cidr: Ipv6Cidr) -> Self {
        IpCidr::Ip6(cidr)
    }
}

impl IpCidr {
    pub fn family(&self) -> AddressFamily {
        match self {
            Self::Ip4(_) => AddressFamily::Ipv4,
            Self::Ip6(_) => AddressFamily::Ipv6,
        }
    }

    pub fn ip(&self) -> IpAddr {
        match self {
            Self::Ip4(v4) => v4.ip().into(),
            Self::Ip6(v6) => v6.ip().into(),
        }
    }

    pub fn prefix_len(&self) -> u8 {
        match self {
            Self::Ip4(v4) => v4.prefix_len(),
            Self::Ip6(v6) => v6.prefix_len(),
        }
    }

    /// Is this `ip` a member of the CIDR? Addresses of the other family
    /// are never members.
    pub fn is_member(&self, ip: IpAddr) -> bool {
        match (self, ip) {
            (Self::Ip4(cidr), IpAddr::V4(ip)) => cidr.is_member(ip),
            (Self::Ip6(cidr), IpAddr::V6(ip)) => cidr.is_member(ip),
            _ => false,
        }
    }
}

impl fmt::Display for IpCidr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Ip4(ip4) => write!(f, "{ip4}"),
            Self::Ip6(ip6) => write!(f, "{ip6}"),
        }
    }
}

impl FromStr for IpCidr {
    type Err = String;

    fn from_str(val: &str) -> result::Result<Self, Self::Err> {
        if let Ok(ip4) = val.parse::<Ipv4Cidr>() {
            return Ok(IpCidr::Ip4(ip4));
        }

        val.parse::<Ipv6Cidr>().map(IpCidr::Ip6)
    }
}

impl From<ipnetwork::IpNetwork> for IpCidr {
    fn from(net: ipnetwork::IpNetwork) -> Self {
        match net {
            ipnetwork::IpNetwork::V4(net) => Self::Ip4(net.into()),
            ipnetwork::IpNetwork::V6(net) => Self::Ip6(net.into()),
        }
    }
}

/// A valid IPv4 prefix length.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct Ipv4PrefixLen(u8);

impl TryFrom<u8> for Ipv4PrefixLen {
    type Error = String;

    fn try_from(prefix_len: u8) -> Result<Self, Self::Error> {
        Self::new(prefix_len)
    }
}

impl Ipv4PrefixLen {
    pub fn new(prefix_len: u8) -> Result<Self, String> {
        if prefix_len > 32 {
            return Err(format!("bad IPv4 prefix length: {}", prefix_len));
        }

        Ok(Self(prefix_len))
    }

    pub fn val(&self) -> u8 {
        self.0
    }

    fn mask_bits(self) -> u32 {
        u32::MAX.checked_shl(32 - u32::from(self.0)).unwrap_or(0)
    }
}

/// An IPv4 CIDR.
///
/// The address is always stored with its host bits cleared, so two
/// CIDRs describing the same block compare equal no matter how they
/// were written.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Ipv4Cidr {
    ip: Ipv4Addr,
    prefix_len: Ipv4PrefixLen,
}

impl core::cmp::Ord for Ipv4Cidr {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        if self.ip != other.ip {
            self.ip.cmp(&other.ip)
        } else {
            self.prefix_len.cmp(&other.prefix_len)
        }
    }
}

impl core::cmp::PartialOrd for Ipv4Cidr {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Ipv4Cidr {
    type Err = String;

    /// Convert a string like "192.168.2.0/24" into an `Ipv4Cidr`.
    fn from_str(val: &str) -> result::Result<Self, Self::Err> {
        let (ip_s, prefix_s) = match val.split_once('/') {
            Some(v) => v,
            None => return Err("no '/' found".to_string()),
        };

        let ip = match ip_s.parse() {
            Ok(v) => v,
            Err(e) => return Err(format!("bad IP: {e}")),
        };

        let raw = match prefix_s.parse::<u8>() {
            Ok(v) => v,
            Err(e) => {
                return Err(format!("bad prefix length: {e}"));
            }
        };

        let prefix_len = Ipv4PrefixLen::new(raw)?;
        Ok(Ipv4Cidr::new(ip, prefix_len))
    }
}

impl Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.ip, self.prefix_len.val())
    }
}

impl Ipv4Cidr {
    /// The "this network" block, `0.0.0.0/8`.
    pub const THIS_NET: Self = Self {
        ip: Ipv4Addr::new(0, 0, 0, 0),
        prefix_len: Ipv4PrefixLen(8),
    };

    /// The loopback block, `127.0.0.0/8`.
    pub const LOOPBACK: Self = Self {
        ip: Ipv4Addr::new(127, 0, 0, 0),
        prefix_len: Ipv4PrefixLen(8),
    };

    /// IPv4 multicast address range, `224.0.0.0/4`.
    pub const MCAST: Self = Self {
        ip: Ipv4Addr::new(224, 0, 0, 0),
        prefix_len: Ipv4PrefixLen(4),
    };

    /// The reserved block including the limited broadcast address,
    /// `240.0.0.0/4`.
    pub const RESERVED: Self = Self {
        ip: Ipv4Addr::new(240, 0, 0, 0),
        prefix_len: Ipv4PrefixLen(4),
    };

    pub fn ip(&self) -> Ipv4Addr {
        self.parts().0
    }

    /// Is this `ip` a member of the CIDR?
    pub fn is_member(&self, ip: Ipv4Addr) -> bool {
        mask_v4(ip, self.prefix_len) == self.ip()
    }

    /// Is every address of `other` also a member of this CIDR?
    pub fn contains(&self, other: &Ipv4Cidr) -> bool {
        other.prefix_len() >= self.prefix_len() && self.is_member(other.ip())
    }

    /// Do the two CIDRs share at least one address?
    pub fn overlaps(&self, other: &Ipv4Cidr) -> bool {
        self.contains(other) || other.contains(self)
    }

    pub fn new(ip: Ipv4Addr, prefix_len: Ipv4PrefixLen) -> Self {
        let ip = mask_v4(ip, prefix_len);
        Ipv4Cidr { ip, prefix_len }
    }

    pub fn parts(&self) -> (Ipv4Addr, Ipv4PrefixLen) {
        (self.ip, self.prefix_len)
    }

    pub fn prefix_len(self) -> u8 {
        self.parts().1.val()
    }

    /// The number of addresses in the block, network and broadcast
    /// addresses included.
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix_len()))
    }

    /// Return the address at offset `n` from the network address, if
    /// the block is large enough to hold it.
    pub fn nth(&self, n: u32) -> Option<Ipv4Addr> {
        if u64::from(n) >= self.size() {
            return None;
        }

        Some(Ipv4Addr::from(u32::from(self.ip) + n))
    }

    /// Return the highest address in the block.
    pub fn last(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.ip) | !self.prefix_len.mask_bits())
    }
}

impl From<ipnetwork::Ipv4Network> for Ipv4Cidr {
    fn from(n: ipnetwork::Ipv4Network) -> Self {
        // A valid `Ipv4Network` necessarily has a valid prefix.
        Ipv4Cidr::new(n.ip(), Ipv4PrefixLen(n.prefix()))
    }
}

fn mask_v4(ip: Ipv4Addr, prefix_len: Ipv4PrefixLen) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(ip) & prefix_len.mask_bits())
}

/// A valid IPv6 prefix length.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct Ipv6PrefixLen(u8);

impl TryFrom<u8> for Ipv6PrefixLen {
    type Error = String;

    fn try_from(prefix_len: u8) -> Result<Self, Self::Error> {
        Self::new(prefix_len)
    }
}

impl Ipv6PrefixLen {
    pub fn new(prefix_len: u8) -> result::Result<Self, String> {
        if prefix_len > 128 {
            return Err(format!("bad IPv6 prefix length: {}", prefix_len));
        }

        Ok(Self(prefix_len))
    }

    pub fn val(&self) -> u8 {
        self.0
    }

    fn mask_bits(self) -> u128 {
        u128::MAX.checked_shl(128 - u32::from(self.0)).unwrap_or(0)
    }
}

/// An IPv6 CIDR.
///
/// As with [`Ipv4Cidr`], the host bits of the address are cleared on
/// construction.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Ipv6Cidr {
    ip: Ipv6Addr,
    prefix_len: Ipv6PrefixLen,
}

impl core::cmp::Ord for Ipv6Cidr {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        if self.ip != other.ip {
            self.ip.cmp(&other.ip)
        } else {
            self.prefix_len.cmp(&other.prefix_len)
        }
    }
}

impl core::cmp::PartialOrd for Ipv6Cidr {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Ipv6Cidr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (ip, prefix_len) = self.parts();
        write!(f, "{ip}/{}", prefix_len.val())
    }
}

impl FromStr for Ipv6Cidr {
    type Err = String;

    fn from_str(val: &str) -> result::Result<Self, Self::Err> {
        let (ip_s, prefix_s) = match val.split_once('/') {
            Some(v) => v,
            None => return Err("no '/' found".to_string()),
        };

        let ip = match ip_s.parse() {
            Ok(v) => v,
            Err(e) => return Err(format!("bad IP: {e}")),
        };

        let raw = match prefix_s.parse::<u8>() {
            Ok(v) => v,
            Err(e) => {
                return Err(format!("bad prefix length: {e}"));
            }
        };

        let prefix_len = Ipv6PrefixLen::new(raw)?;
        Ok(Ipv6Cidr::new(ip, prefix_len))
    }
}

const fn v6_cidr(segs: [u16; 8], prefix_len: u8) -> Ipv6Cidr {
    let [a, b, c, d, e, f, g, h] = segs;
    Ipv6Cidr {
        ip: Ipv6Addr::new(a, b, c, d, e, f, g, h),
        prefix_len: Ipv6PrefixLen(prefix_len),
    }
}

impl Ipv6Cidr {
    /// The loopback address, `::1/128`.
    pub const LOOPBACK: Self = v6_cidr([0, 0, 0, 0, 0, 0, 0, 1], 128);

    /// The global unicast block, `2000::/3`.
    pub const GLOBAL_UNICAST: Self = v6_cidr([0x2000, 0, 0, 0, 0, 0, 0, 0], 3);

    /// Teredo tunneling, `2001::/32`.
    pub const TEREDO: Self = v6_cidr([0x2001, 0, 0, 0, 0, 0, 0, 0], 32);

    /// The documentation block, `2001:db8::/32`.
    pub const DOCUMENTATION: Self =
        v6_cidr([0x2001, 0xdb8, 0, 0, 0, 0, 0, 0], 32);

    /// The second documentation block, `3fff::/20`.
    pub const DOCUMENTATION_2: Self =
        v6_cidr([0x3fff, 0, 0, 0, 0, 0, 0, 0], 20);

    /// Unique local addresses, `fc00::/7`.
    pub const UNIQUE_LOCAL: Self = v6_cidr([0xfc00, 0, 0, 0, 0, 0, 0, 0], 7);

    /// The deprecated site-local block, `fec0::/10`.
    pub const SITE_LOCAL: Self = v6_cidr([0xfec0, 0, 0, 0, 0, 0, 0, 0], 10);

    pub fn new(ip: Ipv6Addr, prefix_len: Ipv6PrefixLen) -> Self {
        let ip = mask_v6(ip, prefix_len);
        Ipv6Cidr { ip, prefix_len }
    }

    pub fn parts(&self) -> (Ipv6Addr, Ipv6PrefixLen) {
        (self.ip, self.prefix_len)
    }

    /// Return the prefix length (netmask).
    pub fn prefix_len(self) -> u8 {
        self.prefix_len.0
    }

    /// Return the network address of this CIDR.
    pub fn ip(&self) -> Ipv6Addr {
        self.ip
    }

    /// Is this `ip` a member of the CIDR?
    pub fn is_member(&self, ip: Ipv6Addr) -> bool {
        mask_v6(ip, self.prefix_len) == self.ip
    }

    /// Is every address of `other` also a member of this CIDR?
    pub fn contains(&self, other: &Ipv6Cidr) -> bool {
        other.prefix_len() >= self.prefix_len() && self.is_member(other.ip())
    }

    /// Do the two CIDRs share at least one address?
    pub fn overlaps(&self, other: &Ipv6Cidr) -> bool {
        self.contains(other) || other.contains(self)
    }

    /// Return the address at offset `n` from the network address, if
    /// the block is large enough to hold it.
    pub fn nth(&self, n: u128) -> Option<Ipv6Addr> {
        if n > !self.prefix_len.mask_bits() {
            return None;
        }

        Some(Ipv6Addr::from(u128::from(self.ip) + n))
    }

    /// Return the highest address in the block.
    pub fn last(&self) -> Ipv6Addr {
        Ipv6Addr::from(u128::from(self.ip) | !self.prefix_len.mask_bits())
    }

    /// Return the first sub-block of length `prefix_len` carved out of
    /// this CIDR, that is, the one sharing its network address.
    ///
    /// Returns `None` if `prefix_len` is shorter than this CIDR's own
    /// prefix.
    pub fn first_subnet(&self, prefix_len: Ipv6PrefixLen) -> Option<Self> {
        if prefix_len < self.prefix_len {
            return None;
        }

        Some(Ipv6Cidr::new(self.ip, prefix_len))
    }
}

impl From<ipnetwork::Ipv6Network> for Ipv6Cidr {
    fn from(n: ipnetwork::Ipv6Network) -> Self {
        // A valid `Ipv6Network` necessarily has a valid prefix.
        Ipv6Cidr::new(n.ip(), Ipv6PrefixLen(n.prefix()))
    }
}

fn mask_v6(ip: Ipv6Addr, prefix_len: Ipv6PrefixLen) -> Ipv6Addr {
    Ipv6Addr::from(u128::from(ip) & prefix_len.mask_bits())
}
