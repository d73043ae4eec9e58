// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The gateway's firewall and NAT policy compiler.
//!
//! Compilation is pure: addressing facts and policy flags in, an
//! ordered rule list per address family out. Within a chain the first
//! matching rule wins, so the order of the output is part of the
//! contract. Per family the rules are emitted as follows.
//!
//! # Filter table
//!
//! 1. Routing header type 0 is dropped on INPUT, FORWARD and OUTPUT
//!    (IPv6 only). This comes before anything stateful so a crafted
//!    packet can never be accepted as established.
//! 2. Anti-spoofing: loopback sources not arriving on `lo`, and client
//!    sources not arriving under an IPsec policy, are dropped on INPUT
//!    and FORWARD.
//! 3. Loopback traffic is accepted on INPUT.
//! 4. IKE, NAT-T and ESP are accepted on INPUT.
//! 5. Connection tracking: INVALID is dropped, ESTABLISHED and RELATED
//!    are accepted, on INPUT and then FORWARD.
//! 6. DNS from clients is accepted on INPUT, via IPsec only.
//! 7. Client to client traffic is dropped on FORWARD, unless
//!    inter-client communication is allowed.
//! 8. ICMP is dispatched into the `AllowICMP_I` and `AllowICMP_F`
//!    sub-chains, which end in a drop.
//! 9. New connections from clients are accepted on FORWARD, via IPsec
//!    only.
//! 10. New connections towards clients are accepted on FORWARD, only
//!     when clients are not protected from the internet.
//! 11. Everything else is dropped on INPUT and FORWARD.
//!
//! # Mangle table
//!
//! 12. TCP MSS clamping of client SYNs arriving via IPsec.
//!
//! # NAT table
//!
//! 13. Client traffic leaving under an IPsec policy is left alone,
//!     everything else from the clients is masqueraded. IPv4 always,
//!     IPv6 only for a site-local client subnet.

use crate::addressing::ClientAddressing;
use crate::classify::Ipv6Class;
use crate::engine::Action;
use crate::engine::Chain;
use crate::engine::Finalized;
use crate::engine::Ready;
use crate::engine::Rule;
use crate::engine::Table;
use serde::Deserialize;
use serde::Serialize;
use vpngw_api::AddressFamily;
use vpngw_api::IpCidr;
use vpngw_api::Protocol;

pub mod firewall;
pub mod icmp;
pub mod mangle;
pub mod nat;

/// Operator choices that shape the policy.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PolicyFlags {
    /// Let clients reach each other through the gateway.
    pub allow_interclient_communication: bool,

    /// Refuse connections initiated from the internet towards clients.
    pub protect_clients_from_internet: bool,
}

impl Default for PolicyFlags {
    fn default() -> Self {
        Self {
            allow_interclient_communication: false,
            protect_clients_from_internet: true,
        }
    }
}

/// The compiled policy for both address families.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CompiledPolicy {
    ipv4: Vec<Rule<Finalized>>,
    ipv6: Vec<Rule<Finalized>>,
}

impl CompiledPolicy {
    /// The ordered rules of one address family.
    pub fn rules(&self, family: AddressFamily) -> &[Rule<Finalized>] {
        match family {
            AddressFamily::Ipv4 => &self.ipv4,
            AddressFamily::Ipv6 => &self.ipv6,
        }
    }

    /// All rules, IPv4 first.
    pub fn iter(&self) -> impl Iterator<Item = &Rule<Finalized>> {
        self.ipv4.iter().chain(self.ipv6.iter())
    }

    pub fn len(&self) -> usize {
        self.ipv4.len() + self.ipv6.len()
    }
}

/// State threaded through the per-group rule builders of one family.
pub(crate) struct BuildCtx<'a> {
    rules: Vec<Rule<Finalized>>,
    addr: &'a ClientAddressing,
}

impl<'a> BuildCtx<'a> {
    fn new(addr: &'a ClientAddressing) -> Self {
        Self { rules: vec![], addr }
    }

    pub(crate) fn family(&self) -> AddressFamily {
        self.addr.family()
    }

    /// The configured client subnet; rules never match on the clamped
    /// pool.
    pub(crate) fn subnet(&self) -> IpCidr {
        self.addr.subnet()
    }

    pub(crate) fn icmp_proto(&self) -> Protocol {
        match self.family() {
            AddressFamily::Ipv4 => Protocol::ICMP,
            AddressFamily::Ipv6 => Protocol::ICMPv6,
        }
    }

    pub(crate) fn rule(
        &self,
        table: Table,
        chain: Chain,
        action: Action,
    ) -> Rule<Ready> {
        Rule::new(self.family(), table, chain, action)
    }

    pub(crate) fn push(&mut self, rule: Rule<Ready>) {
        self.rules.push(rule.finalize());
    }

    pub(crate) fn push_match_any(
        &mut self,
        table: Table,
        chain: Chain,
        action: Action,
    ) {
        self.rules.push(Rule::match_any(self.family(), table, chain, action));
    }
}

fn compile_family(
    addr: &ClientAddressing,
    flags: &PolicyFlags,
    masquerade: bool,
) -> Vec<Rule<Finalized>> {
    let mut ctx = BuildCtx::new(addr);

    firewall::exploit_filtering(&mut ctx);
    firewall::anti_spoofing(&mut ctx);
    firewall::loopback(&mut ctx);
    firewall::control_plane(&mut ctx);
    firewall::stateful(&mut ctx);
    firewall::dns(&mut ctx);

    if !flags.allow_interclient_communication {
        firewall::interclient_isolation(&mut ctx);
    }

    icmp::setup(&mut ctx);
    firewall::new_from_clients(&mut ctx);

    if !flags.protect_clients_from_internet {
        firewall::new_to_clients(&mut ctx);
    }

    firewall::default_deny(&mut ctx);
    mangle::setup(&mut ctx);

    if masquerade {
        nat::setup(&mut ctx);
    }

    ctx.rules
}

/// Compile the gateway policy.
///
/// `v4` and `v6` must be the IPv4 and IPv6 addressing facts
/// respectively, and `v6_class` the classification of the IPv6 client
/// subnet. Identical inputs always produce an identical policy.
pub fn compile(
    v4: &ClientAddressing,
    v6: &ClientAddressing,
    v6_class: Ipv6Class,
    flags: &PolicyFlags,
) -> CompiledPolicy {
    debug_assert_eq!(v4.family(), AddressFamily::Ipv4);
    debug_assert_eq!(v6.family(), AddressFamily::Ipv6);

    CompiledPolicy {
        ipv4: compile_family(v4, flags, true),
        ipv6: compile_family(v6, flags, v6_class.needs_nat()),
    }
}
