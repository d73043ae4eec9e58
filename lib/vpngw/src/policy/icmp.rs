// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! ICMP and ICMPv6 admission.
//!
//! All ICMP traffic on INPUT and FORWARD is handed to a dedicated
//! sub-chain which accepts an allow-list of message types and drops the
//! rest. Echo requests are rate limited.

use super::BuildCtx;
use crate::engine::Action;
use crate::engine::Chain;
use crate::engine::Predicate;
use crate::engine::RateLimit;
use crate::engine::Table;
use vpngw_api::AddressFamily;

pub const INPUT_CHAIN: &str = "AllowICMP_I";
pub const FORWARD_CHAIN: &str = "AllowICMP_F";

/// An allowed ICMP message type.
#[derive(Clone, Copy, Debug)]
pub struct IcmpAllow {
    pub ty: u8,
    pub limit: Option<RateLimit>,

    /// Only accepted for traffic addressed to the gateway itself.
    pub input_only: bool,
}

const fn allow(ty: u8) -> IcmpAllow {
    IcmpAllow { ty, limit: None, input_only: false }
}

const fn allow_limited(ty: u8, per_second: u32, burst: u32) -> IcmpAllow {
    IcmpAllow {
        ty,
        limit: Some(RateLimit { per_second, burst }),
        input_only: false,
    }
}

const fn allow_input(ty: u8) -> IcmpAllow {
    IcmpAllow { ty, limit: None, input_only: true }
}

pub const ICMPV4_ALLOW: [IcmpAllow; 6] = [
    // Echo Reply
    allow(0),
    // Destination Unreachable
    allow(3),
    // Echo Request
    allow_limited(8, 5, 20),
    // Time Exceeded
    allow(11),
    // Parameter Problem
    allow(12),
    // Traceroute
    allow(30),
];

pub const ICMPV6_ALLOW: [IcmpAllow; 16] = [
    // Destination Unreachable
    allow(1),
    // Packet Too Big
    allow(2),
    // Time Exceeded
    allow(3),
    // Parameter Problem
    allow(4),
    // Echo Request
    allow_limited(128, 5, 10),
    // Echo Reply
    allow(129),
    // Multicast Listener Query, Report and Done
    allow(130),
    allow(131),
    allow(132),
    // Router Solicitation and Advertisement
    allow_input(133),
    allow_input(134),
    // Neighbor Solicitation and Advertisement
    allow_input(135),
    allow_input(136),
    // Multicast Router Advertisement, Solicitation and Termination
    allow_input(151),
    allow_input(152),
    allow_input(153),
];

pub fn allow_list(family: AddressFamily) -> &'static [IcmpAllow] {
    match family {
        AddressFamily::Ipv4 => &ICMPV4_ALLOW,
        AddressFamily::Ipv6 => &ICMPV6_ALLOW,
    }
}

fn sub_chain(ctx: &mut BuildCtx, parent: Chain, name: &str) {
    let chain = Chain::custom(name);
    let is_input = parent == Chain::Input;

    for entry in allow_list(ctx.family()) {
        if entry.input_only && !is_input {
            continue;
        }

        let mut rule = ctx.rule(Table::Filter, chain.clone(), Action::Accept);
        rule.add_predicates(vec![
            Predicate::IpProto(ctx.icmp_proto()),
            Predicate::IcmpType(entry.ty),
        ]);
        if let Some(limit) = entry.limit {
            rule.set_rate_limit(limit);
        }
        ctx.push(rule);
    }

    ctx.push_match_any(Table::Filter, chain.clone(), Action::Drop);

    let mut rule = ctx.rule(Table::Filter, parent, Action::Jump(chain));
    rule.add_predicate(Predicate::IpProto(ctx.icmp_proto()));
    ctx.push(rule);
}

pub(crate) fn setup(ctx: &mut BuildCtx) {
    sub_chain(ctx, Chain::Input, INPUT_CHAIN);
    sub_chain(ctx, Chain::Forward, FORWARD_CHAIN);
}
