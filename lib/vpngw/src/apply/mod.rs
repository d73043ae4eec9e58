// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Installing a compiled policy on the host.

use crate::Result;
use crate::addressing::ClientAddressing;
use crate::policy::CompiledPolicy;
use std::path::Path;
use std::path::PathBuf;

pub mod restore;
pub mod system;

pub use system::Command;
pub use system::CommandRunner;
pub use system::DryRunRunner;
pub use system::ProcessRunner;
pub use system::SystemApplicator;

/// The side-effecting half of provisioning.
///
/// Every method either fully succeeds or returns an error; callers do
/// not continue after an error.
pub trait PolicyApplicator {
    /// Bring up the interface carrying the gateway's own client subnet
    /// addresses and set the forwarding related kernel parameters.
    fn configure_interfaces(
        &mut self,
        v4: &ClientAddressing,
        v6: &ClientAddressing,
    ) -> Result<()>;

    /// Install `policy` for both families in chains the gateway owns,
    /// hooked into the built-in chains. Rules other programs keep in
    /// the same tables are not touched, and applying the same policy
    /// again changes nothing.
    fn apply_rules(&mut self, policy: &CompiledPolicy) -> Result<()>;

    fn write_config(&mut self, path: &Path, text: &str) -> Result<()>;

    /// Stop a supervised service from being started by moving its
    /// supervisor entry aside. An entry that is already gone is not an
    /// error.
    fn disable_service(&mut self, entry: &Path) -> Result<()>;
}

/// The name a disabled supervisor entry is moved to.
pub fn inactive_path(entry: &Path) -> PathBuf {
    let mut name = entry.as_os_str().to_os_string();
    name.push(".inactive");
    PathBuf::from(name)
}
