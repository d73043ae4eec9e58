// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Rules, and the tables and chains they live in.
//!
//! A rule is built in the [`Ready`] state, where predicates may be
//! added, and then moved to the [`Finalized`] state, where it can no
//! longer change. Only finalized rules leave the compiler.

use super::predicate::Predicate;
use super::predicate::RateLimit;
use core::fmt;
use core::fmt::Display;
use serde::Serialize;
use vpngw_api::AddressFamily;

/// A packet filter table.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Table {
    Filter,
    Mangle,
    Nat,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Filter => "filter",
            Self::Mangle => "mangle",
            Self::Nat => "nat",
        }
    }
}

impl Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A chain within a table.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Chain {
    Input,
    Forward,
    Output,
    Postrouting,
    Custom(String),
}

impl Chain {
    pub fn custom(name: &str) -> Self {
        Self::Custom(name.to_string())
    }

    pub fn is_builtin(&self) -> bool {
        !matches!(self, Self::Custom(_))
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Input => "INPUT",
            Self::Forward => "FORWARD",
            Self::Output => "OUTPUT",
            Self::Postrouting => "POSTROUTING",
            Self::Custom(name) => name,
        }
    }
}

impl Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// What happens to a packet that matches a rule.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum Action {
    Accept,
    Drop,

    /// Rewrite the source address to that of the outgoing interface.
    Masquerade,

    /// Continue evaluation in another chain of the same table.
    Jump(Chain),

    /// Rewrite the TCP MSS option to the given value.
    SetMss(u16),
}

impl Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Accept => write!(f, "ACCEPT"),
            Self::Drop => write!(f, "DROP"),
            Self::Masquerade => write!(f, "MASQUERADE"),
            Self::Jump(chain) => write!(f, "JUMP {chain}"),
            Self::SetMss(mss) => write!(f, "SET-MSS {mss}"),
        }
    }
}

pub trait RuleState {}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Ready {
    preds: Vec<Predicate>,
}
impl RuleState for Ready {}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Finalized {
    preds: Vec<Predicate>,
}
impl RuleState for Finalized {}

/// A single firewall or NAT rule.
///
/// Equality is structural and order-sensitive over predicates: two
/// rules are equal only if they render identically.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Rule<S: RuleState> {
    state: S,
    family: AddressFamily,
    table: Table,
    chain: Chain,
    action: Action,
    rate_limit: Option<RateLimit>,
    comment: Option<String>,
}

impl<S: RuleState> Rule<S> {
    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    pub fn table(&self) -> Table {
        self.table
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn rate_limit(&self) -> Option<RateLimit> {
        self.rate_limit
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }
}

impl Rule<Ready> {
    /// Create a new rule.
    pub fn new(
        family: AddressFamily,
        table: Table,
        chain: Chain,
        action: Action,
    ) -> Self {
        Rule {
            state: Ready { preds: vec![] },
            family,
            table,
            chain,
            action,
            rate_limit: None,
            comment: None,
        }
    }

    /// Create a new rule that matches anything.
    ///
    /// The rule moves directly to the [`Finalized`] state, so no
    /// predicate can be added by accident.
    pub fn match_any(
        family: AddressFamily,
        table: Table,
        chain: Chain,
        action: Action,
    ) -> Rule<Finalized> {
        Rule::new(family, table, chain, action).finalize()
    }

    /// Add a single [`Predicate`] to the end of the list.
    pub fn add_predicate(&mut self, pred: Predicate) {
        self.state.preds.push(pred);
    }

    /// Append a list of [`Predicate`]s to the existing list.
    pub fn add_predicates(&mut self, preds: Vec<Predicate>) {
        for p in preds {
            self.state.preds.push(p);
        }
    }

    pub fn set_rate_limit(&mut self, limit: RateLimit) {
        self.rate_limit = Some(limit);
    }

    pub fn set_comment(&mut self, comment: &str) {
        self.comment = Some(comment.to_string());
    }

    /// Finalize the rule; locking all predicates in stone.
    pub fn finalize(self) -> Rule<Finalized> {
        Rule {
            state: Finalized { preds: self.state.preds },
            family: self.family,
            table: self.table,
            chain: self.chain,
            action: self.action,
            rate_limit: self.rate_limit,
            comment: self.comment,
        }
    }
}

impl Rule<Finalized> {
    /// The rule's predicates, in the order they were added.
    pub fn predicates(&self) -> &[Predicate] {
        &self.state.preds
    }

    pub fn is_match_any(&self) -> bool {
        self.state.preds.is_empty() && self.rate_limit.is_none()
    }

    /// Does any predicate of this rule satisfy `f`?
    pub fn has_predicate<F>(&self, f: F) -> bool
    where
        F: Fn(&Predicate) -> bool,
    {
        self.state.preds.iter().any(f)
    }
}

impl Display for Rule<Finalized> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}/{}:", self.family, self.table, self.chain)?;

        if self.state.preds.is_empty() {
            write!(f, " *")?;
        }

        for p in &self.state.preds {
            write!(f, " {p}")?;
        }

        if let Some(limit) = &self.rate_limit {
            write!(f, " limit={limit}")?;
        }

        write!(f, " => {}", self.action)?;

        if let Some(comment) = &self.comment {
            write!(f, " # {comment}")?;
        }

        Ok(())
    }
}
