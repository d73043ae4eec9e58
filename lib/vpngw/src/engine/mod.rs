// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The structured rule model produced by the policy compiler.

pub mod predicate;
pub mod rule;

pub use predicate::ConnState;
pub use predicate::PolicyKind;
pub use predicate::Predicate;
pub use predicate::RateLimit;
pub use predicate::TcpFlag;
pub use rule::Action;
pub use rule::Chain;
pub use rule::Finalized;
pub use rule::Ready;
pub use rule::Rule;
pub use rule::RuleState;
pub use rule::Table;
