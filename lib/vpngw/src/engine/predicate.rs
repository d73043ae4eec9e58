// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Predicates used for `Rule` matching.

use core::fmt;
use core::fmt::Display;
use core::ops::RangeInclusive;
use serde::Serialize;
use vpngw_api::Direction;
use vpngw_api::IpCidr;
use vpngw_api::Protocol;

/// A connection tracking state.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum ConnState {
    New,
    Established,
    Related,
    Invalid,
}

impl Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::New => "NEW",
            Self::Established => "ESTABLISHED",
            Self::Related => "RELATED",
            Self::Invalid => "INVALID",
        };
        write!(f, "{s}")
    }
}

/// Whether a packet was handled by an IPsec security policy.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum PolicyKind {
    /// The packet was decapsulated (inbound) or is about to be
    /// encapsulated (outbound) under an IPsec policy.
    Ipsec,

    /// No IPsec policy applied to the packet.
    None,
}

impl Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Ipsec => write!(f, "ipsec"),
            Self::None => write!(f, "none"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum TcpFlag {
    Fin,
    Syn,
    Rst,
    Psh,
    Ack,
    Urg,
}

impl Display for TcpFlag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Fin => "FIN",
            Self::Syn => "SYN",
            Self::Rst => "RST",
            Self::Psh => "PSH",
            Self::Ack => "ACK",
            Self::Urg => "URG",
        };
        write!(f, "{s}")
    }
}

/// Join a list of displayable values with commas.
pub(crate) fn join<T: Display>(list: &[T]) -> String {
    list.iter().map(|v| v.to_string()).collect::<Vec<String>>().join(",")
}

/// A single match condition of a rule.
///
/// A rule matches a packet when all of its predicates do.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum Predicate {
    /// The packet arrived on the named interface.
    InIface(String),

    /// The source address lies within the CIDR.
    SrcNet(IpCidr),

    /// The destination address lies within the CIDR.
    DstNet(IpCidr),

    IpProto(Protocol),

    /// The transport destination port. Requires an `IpProto` predicate
    /// naming TCP or UDP on the same rule.
    DstPort(u16),

    /// The ICMP (or ICMPv6, per the rule's family) message type.
    IcmpType(u8),

    /// The connection tracking state is one of those listed.
    ConnState(Vec<ConnState>),

    /// The packet's IPsec policy in the given direction.
    IpsecPolicy { dir: Direction, pol: PolicyKind },

    /// The packet carries an IPv6 routing header of this type.
    RoutingType(u8),

    /// Of the TCP flags in `mask`, exactly those in `set` are set.
    TcpFlags { mask: Vec<TcpFlag>, set: Vec<TcpFlag> },

    /// The TCP MSS option lies within the range.
    TcpMss(RangeInclusive<u16>),

    Not(Box<Predicate>),
}

impl Predicate {
    /// Shorthand for a negated predicate.
    pub fn not(pred: Predicate) -> Self {
        Self::Not(Box::new(pred))
    }

    /// Shorthand for "arrived via IPsec".
    pub fn ipsec_in() -> Self {
        Self::IpsecPolicy { dir: Direction::In, pol: PolicyKind::Ipsec }
    }

    /// Shorthand for "leaves via IPsec".
    pub fn ipsec_out() -> Self {
        Self::IpsecPolicy { dir: Direction::Out, pol: PolicyKind::Ipsec }
    }
}

impl Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Predicate::*;

        match self {
            InIface(name) => write!(f, "in.iface={name}"),

            SrcNet(cidr) => write!(f, "ip.src={cidr}"),

            DstNet(cidr) => write!(f, "ip.dst={cidr}"),

            IpProto(proto) => write!(f, "ip.proto={proto}"),

            DstPort(port) => write!(f, "ulp.dst_port={port}"),

            IcmpType(ty) => write!(f, "icmp.type={ty}"),

            ConnState(list) => write!(f, "ct.state={}", join(list)),

            IpsecPolicy { dir, pol } => write!(f, "ipsec.{dir}={pol}"),

            RoutingType(ty) => write!(f, "ipv6.rt_type={ty}"),

            TcpFlags { mask, set } => {
                write!(f, "tcp.flags={}/{}", join(mask), join(set))
            }

            TcpMss(range) => {
                write!(f, "tcp.mss={}-{}", range.start(), range.end())
            }

            Not(pred) => write!(f, "!{pred}"),
        }
    }
}

/// A token bucket rate limit on a rule's matches.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub struct RateLimit {
    pub per_second: u32,
    pub burst: u32,
}

impl Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/sec burst {}", self.per_second, self.burst)
    }
}
