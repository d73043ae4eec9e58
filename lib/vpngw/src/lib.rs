// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Provisioning for a dual-stack IPsec VPN gateway.
//!
//! The pipeline runs once per container start:
//!
//! ```text
//! Config -> addressing::partition -> classify::classify
//!        -> policy::compile -> pki -> template -> apply
//! ```
//!
//! Everything up to and including [`policy::compile`] is pure. The
//! [`provision`] module drives the whole run and guarantees that every
//! input has been validated and the full rule set compiled before the
//! first side effect happens.

#![allow(clippy::len_without_is_empty)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

pub mod addressing;
pub mod apply;
pub mod cfg;
pub mod classify;
pub mod engine;
pub mod error;
pub mod pki;
pub mod policy;
pub mod print;
pub mod provision;
pub mod resolve;
pub mod template;

pub use error::Error;
pub use error::Result;

pub mod api {
    pub use vpngw_api::*;
}
