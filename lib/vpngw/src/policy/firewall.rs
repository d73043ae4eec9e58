// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Filter table rules of the INPUT, FORWARD and OUTPUT chains.

use super::BuildCtx;
use crate::engine::Action;
use crate::engine::Chain;
use crate::engine::ConnState;
use crate::engine::PolicyKind;
use crate::engine::Predicate;
use crate::engine::Table;
use vpngw_api::AddressFamily;
use vpngw_api::Direction;
use vpngw_api::IpCidr;
use vpngw_api::Ipv4Cidr;
use vpngw_api::Ipv6Cidr;
use vpngw_api::Protocol;

pub const LOOPBACK_IFACE: &str = "lo";
pub const IKE_PORT: u16 = 500;
pub const NAT_T_PORT: u16 = 4500;
pub const DNS_PORT: u16 = 53;

pub const RH0_COMMENT: &str = "RH0 Exploit Protection";
pub const ANTI_SPOOFING_COMMENT: &str = "Anti-Spoofing";

/// Drop packets carrying a type 0 routing header (IPv6 only).
pub(crate) fn exploit_filtering(ctx: &mut BuildCtx) {
    if ctx.family() != AddressFamily::Ipv6 {
        return;
    }

    for chain in [Chain::Input, Chain::Forward, Chain::Output] {
        let mut rule = ctx.rule(Table::Filter, chain, Action::Drop);
        rule.add_predicate(Predicate::RoutingType(0));
        rule.set_comment(RH0_COMMENT);
        ctx.push(rule);
    }
}

/// Drop loopback sources arriving elsewhere than on the loopback
/// interface, and client sources arriving without an IPsec policy.
pub(crate) fn anti_spoofing(ctx: &mut BuildCtx) {
    let loopback: IpCidr = match ctx.family() {
        AddressFamily::Ipv4 => Ipv4Cidr::LOOPBACK.into(),
        AddressFamily::Ipv6 => Ipv6Cidr::LOOPBACK.into(),
    };

    for chain in [Chain::Input, Chain::Forward] {
        let mut rule = ctx.rule(Table::Filter, chain, Action::Drop);
        rule.add_predicates(vec![
            Predicate::not(Predicate::InIface(LOOPBACK_IFACE.to_string())),
            Predicate::SrcNet(loopback),
        ]);
        rule.set_comment(ANTI_SPOOFING_COMMENT);
        ctx.push(rule);
    }

    for chain in [Chain::Input, Chain::Forward] {
        let mut rule = ctx.rule(Table::Filter, chain, Action::Drop);
        rule.add_predicates(vec![
            Predicate::SrcNet(ctx.subnet()),
            Predicate::IpsecPolicy { dir: Direction::In, pol: PolicyKind::None },
        ]);
        rule.set_comment(ANTI_SPOOFING_COMMENT);
        ctx.push(rule);
    }
}

pub(crate) fn loopback(ctx: &mut BuildCtx) {
    let mut rule = ctx.rule(Table::Filter, Chain::Input, Action::Accept);
    rule.add_predicate(Predicate::InIface(LOOPBACK_IFACE.to_string()));
    ctx.push(rule);
}

/// Admit IKE, NAT-T and ESP.
pub(crate) fn control_plane(ctx: &mut BuildCtx) {
    for port in [IKE_PORT, NAT_T_PORT] {
        let mut rule = ctx.rule(Table::Filter, Chain::Input, Action::Accept);
        rule.add_predicates(vec![
            Predicate::IpProto(Protocol::UDP),
            Predicate::DstPort(port),
        ]);
        ctx.push(rule);
    }

    let mut rule = ctx.rule(Table::Filter, Chain::Input, Action::Accept);
    rule.add_predicate(Predicate::IpProto(Protocol::ESP));
    ctx.push(rule);
}

pub(crate) fn stateful(ctx: &mut BuildCtx) {
    for chain in [Chain::Input, Chain::Forward] {
        let mut rule = ctx.rule(Table::Filter, chain.clone(), Action::Drop);
        rule.add_predicate(Predicate::ConnState(vec![ConnState::Invalid]));
        ctx.push(rule);

        let mut rule = ctx.rule(Table::Filter, chain, Action::Accept);
        rule.add_predicate(Predicate::ConnState(vec![
            ConnState::Established,
            ConnState::Related,
        ]));
        ctx.push(rule);
    }
}

/// Clients reach the resolver on the gateway through the tunnel only.
pub(crate) fn dns(ctx: &mut BuildCtx) {
    for proto in [Protocol::UDP, Protocol::TCP] {
        let mut rule = ctx.rule(Table::Filter, Chain::Input, Action::Accept);
        rule.add_predicates(vec![
            Predicate::IpProto(proto),
            Predicate::SrcNet(ctx.subnet()),
            Predicate::DstPort(DNS_PORT),
            Predicate::ipsec_in(),
        ]);
        ctx.push(rule);
    }
}

pub(crate) fn interclient_isolation(ctx: &mut BuildCtx) {
    let mut rule = ctx.rule(Table::Filter, Chain::Forward, Action::Drop);
    rule.add_predicates(vec![
        Predicate::SrcNet(ctx.subnet()),
        Predicate::DstNet(ctx.subnet()),
    ]);
    ctx.push(rule);
}

pub(crate) fn new_from_clients(ctx: &mut BuildCtx) {
    let mut rule = ctx.rule(Table::Filter, Chain::Forward, Action::Accept);
    rule.add_predicates(vec![
        Predicate::SrcNet(ctx.subnet()),
        Predicate::ConnState(vec![ConnState::New]),
        Predicate::ipsec_in(),
    ]);
    ctx.push(rule);
}

pub(crate) fn new_to_clients(ctx: &mut BuildCtx) {
    let mut rule = ctx.rule(Table::Filter, Chain::Forward, Action::Accept);
    rule.add_predicates(vec![
        Predicate::DstNet(ctx.subnet()),
        Predicate::ConnState(vec![ConnState::New]),
    ]);
    ctx.push(rule);
}

pub(crate) fn default_deny(ctx: &mut BuildCtx) {
    ctx.push_match_any(Table::Filter, Chain::Input, Action::Drop);
    ctx.push_match_any(Table::Filter, Chain::Forward, Action::Drop);
}
