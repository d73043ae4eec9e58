// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Types shared between the gateway policy engine, its collaborators
//! and the administration tool.

#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

pub mod dns;
pub mod ip;

pub use dns::*;
pub use ip::*;

/// The direction of traffic relative to an IPsec security policy.
///
/// `In` describes packets that were decapsulated by the kernel's IPsec
/// stack, `Out` describes packets about to be encapsulated by it.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub enum Direction {
    In,
    Out,
}

impl Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let dirstr = match self {
            Direction::In => "in",
            Direction::Out => "out",
        };

        write!(f, "{dirstr}")
    }
}
