// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Common routines for integration tests.

// This type of pedantry is more trouble than it's worth here.
#![allow(dead_code)]

use slog::Drain;
use slog::Logger;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use tempfile::TempDir;

// Let's make our lives easier and pub use a bunch of stuff.
pub use vpngw::Error;
pub use vpngw::Result;
pub use vpngw::addressing::ClientAddressing;
pub use vpngw::api::AddressFamily;
pub use vpngw::api::DomainName;
pub use vpngw::api::IpAddr;
pub use vpngw::api::IpCidr;
pub use vpngw::api::Ipv4Cidr;
pub use vpngw::api::Ipv6Cidr;
pub use vpngw::api::Protocol;
pub use vpngw::apply::PolicyApplicator;
pub use vpngw::cfg::Config;
pub use vpngw::classify::Ipv6Class;
pub use vpngw::engine::Action;
pub use vpngw::engine::Chain;
pub use vpngw::engine::Finalized;
pub use vpngw::engine::Predicate;
pub use vpngw::engine::Rule;
pub use vpngw::engine::Table;
pub use vpngw::pki::CertificateAuthority;
pub use vpngw::pki::ExternalPaths;
pub use vpngw::pki::FileCa;
pub use vpngw::pki::KeyCert;
pub use vpngw::policy::CompiledPolicy;
pub use vpngw::policy::PolicyFlags;
pub use vpngw::resolve::Resolver;
pub use vpngw::template::Renderer;
pub use vpngw::template::TemplateContext;

pub const TEST_HOSTNAME: &str = "vpn.example.com";

/// A logger writing through the test harness's captured stdout.
pub fn test_logger() -> Logger {
    let decorator = slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    Logger::root(drain, slog::o!())
}

/// Build a [`Config`] from `pairs` as if they were the only
/// environment variables set.
pub fn config(pairs: &[(&str, &str)]) -> Result<Config> {
    let env: BTreeMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Config::from_env(|k| env.get(k).cloned(), TEST_HOSTNAME)
}

/// A [`FileCa`] rooted in a temporary directory that lives as long as
/// this value, counting how often server material was asked for.
pub struct TempCa {
    dir: TempDir,
    ca: FileCa,
    requests: RefCell<Vec<Vec<DomainName>>>,
}

impl TempCa {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let ca = FileCa::new(dir.path().join("internal_ca"), &test_logger());
        Self { dir, ca, requests: RefCell::new(vec![]) }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn requests(&self) -> Vec<Vec<DomainName>> {
        self.requests.borrow().clone()
    }
}

impl CertificateAuthority for TempCa {
    fn get_or_create_ca_material(&self) -> Result<KeyCert> {
        self.ca.get_or_create_ca_material()
    }

    fn get_or_create_server_material(
        &self,
        sans: &[DomainName],
    ) -> Result<KeyCert> {
        self.requests.borrow_mut().push(sans.to_vec());
        self.ca.get_or_create_server_material(sans)
    }
}

/// A CA that always fails, and panics if it is consulted when it
/// should not be.
pub struct FailingCa {
    pub reachable: bool,
}

impl CertificateAuthority for FailingCa {
    fn get_or_create_ca_material(&self) -> Result<KeyCert> {
        assert!(self.reachable, "CA consulted unexpectedly");
        Err(Error::PkiIssuanceFailure("CA unavailable".to_string()))
    }

    fn get_or_create_server_material(
        &self,
        _sans: &[DomainName],
    ) -> Result<KeyCert> {
        assert!(self.reachable, "CA consulted unexpectedly");
        Err(Error::PkiIssuanceFailure("CA unavailable".to_string()))
    }
}

/// Resolves names from a fixed table; anything else fails.
#[derive(Default)]
pub struct StaticResolver {
    pub names: BTreeMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn with(mut self, name: &str, addrs: &[&str]) -> Self {
        self.names.insert(
            name.to_string(),
            addrs.iter().map(|a| a.parse().unwrap()).collect(),
        );
        self
    }
}

impl Resolver for StaticResolver {
    fn lookup(&self, name: &DomainName) -> io::Result<Vec<IpAddr>> {
        self.names.get(name.as_str()).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("{name}: NXDOMAIN"))
        })
    }
}

/// Renders every template as its name followed by the context as
/// debug output, remembering each request.
#[derive(Default)]
pub struct CaptureRenderer {
    pub rendered: RefCell<Vec<(String, TemplateContext)>>,
}

impl Renderer for CaptureRenderer {
    fn render(&self, template: &str, ctx: &TemplateContext) -> Result<String> {
        self.rendered.borrow_mut().push((template.to_string(), ctx.clone()));
        Ok(format!("# {template}\n{ctx:?}\n"))
    }
}

/// One call made on a [`RecordingApplicator`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Applied {
    ConfigureInterfaces { v4: IpAddr, v6: IpAddr },
    ApplyRules { ipv4: usize, ipv6: usize },
    WriteConfig { path: PathBuf, text: String },
    DisableService { entry: PathBuf },
}

impl Applied {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigureInterfaces { .. } => "configure_interfaces",
            Self::ApplyRules { .. } => "apply_rules",
            Self::WriteConfig { .. } => "write_config",
            Self::DisableService { .. } => "disable_service",
        }
    }
}

/// A [`PolicyApplicator`] that records what it is asked to do and can
/// be told to fail a given kind of call.
#[derive(Default)]
pub struct RecordingApplicator {
    pub calls: Vec<Applied>,
    pub policies: Vec<CompiledPolicy>,
    pub fail_on: Option<&'static str>,
}

impl RecordingApplicator {
    fn record(&mut self, call: Applied) -> Result<()> {
        if self.fail_on == Some(call.kind()) {
            return Err(Error::Apply {
                command: call.kind().to_string(),
                reason: "injected failure".to_string(),
            });
        }
        self.calls.push(call);
        Ok(())
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.calls.iter().map(Applied::kind).collect()
    }
}

impl PolicyApplicator for RecordingApplicator {
    fn configure_interfaces(
        &mut self,
        v4: &ClientAddressing,
        v6: &ClientAddressing,
    ) -> Result<()> {
        self.record(Applied::ConfigureInterfaces {
            v4: v4.server_address(),
            v6: v6.server_address(),
        })
    }

    fn apply_rules(&mut self, policy: &CompiledPolicy) -> Result<()> {
        self.record(Applied::ApplyRules {
            ipv4: policy.rules(AddressFamily::Ipv4).len(),
            ipv6: policy.rules(AddressFamily::Ipv6).len(),
        })?;
        self.policies.push(policy.clone());
        Ok(())
    }

    fn write_config(&mut self, path: &Path, text: &str) -> Result<()> {
        self.record(Applied::WriteConfig {
            path: path.to_path_buf(),
            text: text.to_string(),
        })
    }

    fn disable_service(&mut self, entry: &Path) -> Result<()> {
        self.record(Applied::DisableService { entry: entry.to_path_buf() })
    }
}

/// Render a rule list one rule per line, for readable assertions.
pub fn rule_lines(rules: &[Rule<Finalized>]) -> Vec<String> {
    rules.iter().map(ToString::to_string).collect()
}

/// The position of the first rule matching `f`.
pub fn position<F>(rules: &[Rule<Finalized>], f: F) -> Option<usize>
where
    F: Fn(&Rule<Finalized>) -> bool,
{
    rules.iter().position(f)
}
