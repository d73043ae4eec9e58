// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! TCP MSS clamping for client connections.
//!
//! Assuming a tunnel MTU of 1400 bytes, the largest segment that avoids
//! fragmentation is 1400 - 20 (IPv4) - 20 (TCP) = 1360 bytes, or
//! 1400 - 40 (IPv6) - 20 (TCP) = 1340 bytes.

use super::BuildCtx;
use crate::engine::Action;
use crate::engine::Chain;
use crate::engine::Predicate;
use crate::engine::Table;
use crate::engine::TcpFlag;
use vpngw_api::AddressFamily;
use vpngw_api::Protocol;

pub const IPV4_TUNNEL_MSS: u16 = 1360;
pub const IPV6_TUNNEL_MSS: u16 = 1340;

/// The largest MSS considered for clamping.
pub const MAX_MSS: u16 = 1500;

pub fn tunnel_mss(family: AddressFamily) -> u16 {
    match family {
        AddressFamily::Ipv4 => IPV4_TUNNEL_MSS,
        AddressFamily::Ipv6 => IPV6_TUNNEL_MSS,
    }
}

pub(crate) fn setup(ctx: &mut BuildCtx) {
    let mss = tunnel_mss(ctx.family());

    let mut rule =
        ctx.rule(Table::Mangle, Chain::Forward, Action::SetMss(mss));
    rule.add_predicates(vec![
        Predicate::IpProto(Protocol::TCP),
        Predicate::TcpFlags {
            mask: vec![TcpFlag::Syn, TcpFlag::Rst],
            set: vec![TcpFlag::Syn],
        },
        Predicate::SrcNet(ctx.subnet()),
        Predicate::ipsec_in(),
        Predicate::TcpMss(mss + 1..=MAX_MSS),
    ]);
    ctx.push(rule);
}
