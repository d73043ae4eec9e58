// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The startup pipeline of the gateway.
//!
//! [`plan`] is the pure half: it partitions both client subnets,
//! classifies the IPv6 one and compiles the policy. [`provision`] runs
//! the plan and only then touches anything: PKI material, hostname
//! resolution, configuration files, interfaces and finally the rules.
//! The first error stops the run.

use crate::Result;
use crate::addressing;
use crate::addressing::ClientAddressing;
use crate::apply::PolicyApplicator;
use crate::cfg::Config;
use crate::classify::Ipv6Class;
use crate::classify::classify;
use crate::pki;
use crate::pki::CertificateAuthority;
use crate::pki::ExternalPaths;
use crate::pki::PkiMaterial;
use crate::pki::PkiMode;
use crate::policy;
use crate::policy::CompiledPolicy;
use crate::resolve::Resolver;
use crate::resolve::resolve_hostnames;
use crate::template::CONFIG_FILES;
use crate::template::NDPPD_SUPERVISOR_CONF;
use crate::template::Renderer;
use crate::template::TemplateContext;
use serde::Serialize;
use slog::Logger;
use slog::info;
use std::path::Path;
use std::path::PathBuf;

/// Everything derived from the configuration without side effects.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Plan {
    pub ipv4: ClientAddressing,
    pub ipv6: ClientAddressing,
    pub ipv6_class: Ipv6Class,
    pub policy: CompiledPolicy,
}

/// Validate `cfg` and compile its policy.
pub fn plan(cfg: &Config) -> Result<Plan> {
    let ipv4 = addressing::partition_v4(cfg.client_subnet_ipv4)?;
    let ipv6 = addressing::partition_v6(cfg.client_subnet_ipv6)?;
    let ipv6_class = classify(&cfg.client_subnet_ipv6)?;
    let policy = policy::compile(&ipv4, &ipv6, ipv6_class, &cfg.flags);

    Ok(Plan { ipv4, ipv6, ipv6_class, policy })
}

/// The external systems a provisioning run talks to.
pub struct Collaborators<'a> {
    /// Consulted only with the internal PKI.
    pub ca: &'a dyn CertificateAuthority,

    /// Where pre-issued material is read from with an external PKI.
    pub external_pki: ExternalPaths,

    pub resolver: &'a dyn Resolver,
    pub renderer: &'a dyn Renderer,
    pub applicator: &'a mut dyn PolicyApplicator,
}

/// A rendered configuration file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RenderedFile {
    pub path: PathBuf,
    pub text: String,
}

/// The result of a successful run.
#[derive(Clone, Debug)]
pub struct Provisioned {
    pub plan: Plan,
    pub pki: PkiMaterial,
    pub files: Vec<RenderedFile>,
}

/// The PKI mode `cfg` asks for.
pub fn pki_mode(cfg: &Config, external: &ExternalPaths) -> PkiMode {
    if cfg.use_internal_pki {
        PkiMode::Internal { hostnames: cfg.vpn_hostnames.clone() }
    } else {
        PkiMode::External { paths: external.clone() }
    }
}

/// Run the full startup pipeline.
pub fn provision(
    cfg: &Config,
    collab: Collaborators<'_>,
    log: &Logger,
) -> Result<Provisioned> {
    let plan = plan(cfg)?;

    info!(log, "compiled policy";
        "client_subnet_ipv4" => %plan.ipv4.subnet(),
        "client_subnet_ipv6" => %plan.ipv6.subnet(),
        "ipv6_class" => %plan.ipv6_class,
        "rules" => plan.policy.len(),
    );

    let mode = pki_mode(cfg, &collab.external_pki);
    let pki = pki::provision(&mode, collab.ca, log)?;

    let resolved = resolve_hostnames(collab.resolver, &cfg.vpn_hostnames, log);
    let ctx = TemplateContext::new(
        cfg,
        &plan.ipv4,
        &plan.ipv6,
        plan.ipv6_class,
        &pki,
        &resolved,
    );

    // Render everything before writing anything.
    let files = CONFIG_FILES
        .iter()
        .map(|file| {
            Ok(RenderedFile {
                path: PathBuf::from(file.path),
                text: collab.renderer.render(file.template, &ctx)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    for file in &files {
        collab.applicator.write_config(&file.path, &file.text)?;
    }

    if plan.ipv6_class != Ipv6Class::GlobalUnicast {
        info!(log, "client subnet is not global unicast, \
            disabling neighbor discovery proxy";
            "client_subnet_ipv6" => %plan.ipv6.subnet(),
        );
        collab.applicator.disable_service(Path::new(NDPPD_SUPERVISOR_CONF))?;
    }

    collab.applicator.configure_interfaces(&plan.ipv4, &plan.ipv6)?;
    collab.applicator.apply_rules(&plan.policy)?;

    info!(log, "gateway provisioned");

    Ok(Provisioned { plan, pki, files })
}
