// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Source NAT for client traffic bound for the internet.

use super::BuildCtx;
use crate::engine::Action;
use crate::engine::Chain;
use crate::engine::Finalized;
use crate::engine::Predicate;
use crate::engine::Rule;
use crate::engine::Table;

/// Whether `rules` rewrite client source addresses.
pub fn masquerades(rules: &[Rule<Finalized>]) -> bool {
    rules.iter().any(|r| *r.action() == Action::Masquerade)
}

pub(crate) fn setup(ctx: &mut BuildCtx) {
    // Traffic that is about to be encapsulated keeps its client source.
    let mut rule = ctx.rule(Table::Nat, Chain::Postrouting, Action::Accept);
    rule.add_predicates(vec![
        Predicate::SrcNet(ctx.subnet()),
        Predicate::ipsec_out(),
    ]);
    ctx.push(rule);

    let mut rule =
        ctx.rule(Table::Nat, Chain::Postrouting, Action::Masquerade);
    rule.add_predicate(Predicate::SrcNet(ctx.subnet()));
    ctx.push(rule);
}
