// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use clap::Parser;
use slog::Drain;
use slog::Logger;
use slog::info;

use vpngw::apply::CommandRunner;
use vpngw::apply::DryRunRunner;
use vpngw::apply::ProcessRunner;
use vpngw::apply::SystemApplicator;
use vpngw::apply::restore::render_policy;
use vpngw::cfg::Config;
use vpngw::cfg::ConfigFile;
use vpngw::pki::DEFAULT_CA_DIR;
use vpngw::pki::ExternalPaths;
use vpngw::pki::FileCa;
use vpngw::print::print_addressing;
use vpngw::print::print_rules;
use vpngw::provision::Collaborators;
use vpngw::provision::Plan;
use vpngw::provision::plan;
use vpngw::provision::provision;
use vpngw::resolve::SystemResolver;
use vpngw::template::TemplateRenderer;
use vpngw_api::AddressFamily;

const HOSTNAME_PATHS: [&str; 2] = ["/proc/sys/kernel/hostname", "/etc/hostname"];

/// Compile and apply the network policy of the VPN gateway.
#[derive(Debug, Parser)]
#[command(version)]
enum Command {
    /// Print the ordered rule list of both families.
    Compile {
        #[command(flatten)]
        input: Input,

        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the addressing facts and the IPv6 classification.
    Addressing {
        #[command(flatten)]
        input: Input,

        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the iptables-restore documents.
    Restore {
        #[command(flatten)]
        input: Input,

        /// Only print the document for this family.
        #[arg(long)]
        family: Option<AddressFamily>,
    },

    /// Run the full startup pipeline.
    Provision {
        #[command(flatten)]
        input: Input,

        /// Log commands instead of executing them.
        #[arg(long)]
        dry_run: bool,

        /// A directory of templates overriding the built-in ones by
        /// file name.
        #[arg(long)]
        template_dir: Option<PathBuf>,

        /// Where the internal CA keeps its material.
        #[arg(long, default_value = DEFAULT_CA_DIR)]
        pki_dir: PathBuf,

        /// Where pre-issued material is read from when the internal
        /// PKI is disabled.
        #[arg(long)]
        external_pki_dir: Option<PathBuf>,

        /// Prefix for every file written or renamed.
        #[arg(long, default_value = "/")]
        root: PathBuf,
    },
}

#[derive(Debug, Args)]
struct Input {
    /// A TOML file with settings; the environment overrides it.
    #[arg(long, env = "VPNGW_CONFIG")]
    config: Option<PathBuf>,
}

impl Input {
    fn load(&self) -> anyhow::Result<Config> {
        let file = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path).with_context(|| {
                    format!("failed to read {}", path.display())
                })?;
                Some(ConfigFile::from_toml_str(&text)?)
            }
            None => None,
        };

        let hostname = system_hostname()?;
        let cfg = Config::from_layers(
            |k| std::env::var(k).ok(),
            file.as_ref(),
            &hostname,
        )?;
        Ok(cfg)
    }
}

fn system_hostname() -> anyhow::Result<String> {
    HOSTNAME_PATHS
        .iter()
        .filter_map(|p| std::fs::read_to_string(p).ok())
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
        .context("failed to determine the hostname")
}

fn logger() -> Logger {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();

    let mut builder = slog_envlogger::LogBuilder::new(drain)
        .filter(None, slog::FilterLevel::Info);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder = builder.parse(&filters);
    }
    let drain = builder.build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    Logger::root(drain, slog::o!("component" => "vpngwadm"))
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    let mut out = std::io::stdout();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

struct ProvisionOpts<'a> {
    template_dir: Option<&'a Path>,
    pki_dir: &'a Path,
    external_pki_dir: Option<&'a Path>,
    root: &'a Path,
}

fn run_provision<R: CommandRunner>(
    cfg: &Config,
    runner: R,
    opts: &ProvisionOpts<'_>,
    log: &Logger,
) -> anyhow::Result<()> {
    let renderer = match opts.template_dir {
        Some(dir) => TemplateRenderer::with_overrides(dir)?,
        None => TemplateRenderer::new()?,
    };
    let ca = FileCa::new(opts.pki_dir, log);
    let external_pki = opts
        .external_pki_dir
        .map(ExternalPaths::under)
        .unwrap_or_default();
    let mut applicator =
        SystemApplicator::new(runner, log).with_root(opts.root);

    let collab = Collaborators {
        ca: &ca,
        external_pki,
        resolver: &SystemResolver,
        renderer: &renderer,
        applicator: &mut applicator,
    };

    let out = provision(cfg, collab, log)?;
    info!(log, "provisioning complete";
        "files" => out.files.len(),
        "rules" => out.plan.policy.len(),
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cmd = Command::parse();

    match cmd {
        Command::Compile { input, json } => {
            let Plan { policy, .. } = plan(&input.load()?)?;
            if json {
                print_json(&policy)?;
            } else {
                print_rules(&policy)?;
            }
        }

        Command::Addressing { input, json } => {
            let Plan { ipv4, ipv6, ipv6_class, .. } = plan(&input.load()?)?;
            if json {
                print_json(&serde_json::json!({
                    "ipv4": ipv4,
                    "ipv6": ipv6,
                    "ipv6_class": ipv6_class,
                }))?;
            } else {
                print_addressing(&ipv4, &ipv6, ipv6_class)?;
            }
        }

        Command::Restore { input, family } => {
            let Plan { policy, .. } = plan(&input.load()?)?;
            let mut out = std::io::stdout();
            for doc in render_policy(&policy) {
                if family.is_none_or(|f| f == doc.family) {
                    write!(out, "{}", doc.text)?;
                }
            }
        }

        Command::Provision {
            input,
            dry_run,
            template_dir,
            pki_dir,
            external_pki_dir,
            root,
        } => {
            let log = logger();
            let cfg = input.load()?;
            let opts = ProvisionOpts {
                template_dir: template_dir.as_deref(),
                pki_dir: &pki_dir,
                external_pki_dir: external_pki_dir.as_deref(),
                root: &root,
            };

            if dry_run {
                info!(log, "dry run, no commands are executed");
                run_provision(&cfg, DryRunRunner::new(&log), &opts, &log)?;
            } else {
                run_provision(&cfg, ProcessRunner::new(&log), &opts, &log)?;
            }
        }
    }

    Ok(())
}
