// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! A [`PolicyApplicator`] for a Linux host, driven by the standard
//! `ip`, `sysctl`, `mount`, `modprobe` and `ip[6]tables-restore`
//! tools.

use super::PolicyApplicator;
use super::inactive_path;
use super::restore;
use super::restore::Hook;
use crate::Error;
use crate::Result;
use crate::addressing::ClientAddressing;
use crate::policy::CompiledPolicy;
use crate::policy::nat;
use core::fmt;
use core::fmt::Display;
use slog::Logger;
use slog::debug;
use slog::info;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::Output;
use std::process::Stdio;
use vpngw_api::AddressFamily;
use vpngw_api::IpAddr;

/// The interface the gateway's own client subnet addresses live on.
pub const GATEWAY_IFACE: &str = "dummy0";

/// The interface facing the internet.
pub const UPLINK_IFACE: &str = "eth0";

/// The kernel module providing the PF_KEY socket the IPsec daemon
/// needs.
pub const PF_KEY_MODULE: &str = "af_key";

pub const PROC_SYS: &str = "/proc/sys";
pub const PROC_MOUNTS: &str = "/proc/mounts";

/// Kernel parameters set before rules are applied, in order.
pub fn sysctls() -> [(String, &'static str); 8] {
    [
        ("net.ipv4.ip_forward".to_string(), "1"),
        ("net.ipv6.conf.default.forwarding".to_string(), "1"),
        ("net.ipv6.conf.all.forwarding".to_string(), "1"),
        // Keep accepting router advertisements on the uplink while
        // forwarding.
        (format!("net.ipv6.conf.{UPLINK_IFACE}.accept_ra"), "2"),
        ("net.ipv4.conf.all.accept_redirects".to_string(), "0"),
        ("net.ipv6.conf.all.accept_redirects".to_string(), "0"),
        ("net.ipv4.conf.all.send_redirects".to_string(), "0"),
        ("net.ipv4.ip_no_pmtu_disc".to_string(), "1"),
    ]
}

/// An external command line, with optional standard input.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Command {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
}

impl Command {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
        }
    }

    pub fn with_stdin(mut self, stdin: String) -> Self {
        self.stdin = Some(stdin);
        self
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        if self.stdin.is_some() {
            write!(f, " < -")?;
        }
        Ok(())
    }
}

/// The primitive host operations the [`SystemApplicator`] is built
/// from.
pub trait CommandRunner {
    fn run(&self, cmd: &Command) -> Result<()>;

    /// Run a command that only asks a question of the host. An
    /// unsuccessful exit is the answer "no", not an error.
    fn check(&self, cmd: &Command) -> Result<bool>;

    fn write_file(&self, path: &Path, contents: &str) -> Result<()>;

    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Reads must not change anything, so every runner performs them.
    fn read_file(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path)
            .map_err(|e| Error::io(format!("read {}", path.display()), e))
    }
}

/// Executes everything for real.
pub struct ProcessRunner {
    log: Logger,
}

impl ProcessRunner {
    pub fn new(log: &Logger) -> Self {
        Self { log: log.clone() }
    }
}

fn apply_err(cmd: &Command, reason: impl Into<String>) -> Error {
    Error::Apply { command: cmd.to_string(), reason: reason.into() }
}

impl ProcessRunner {
    fn output(&self, cmd: &Command) -> Result<Output> {
        debug!(self.log, "run"; "command" => %cmd);

        let stdin =
            if cmd.stdin.is_some() { Stdio::piped() } else { Stdio::null() };

        let mut child = std::process::Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| apply_err(cmd, e.to_string()))?;

        if let (Some(input), Some(mut pipe)) = (&cmd.stdin, child.stdin.take())
        {
            pipe.write_all(input.as_bytes())
                .map_err(|e| apply_err(cmd, e.to_string()))?;
        }

        child.wait_with_output().map_err(|e| apply_err(cmd, e.to_string()))
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&self, cmd: &Command) -> Result<()> {
        let output = self.output(cmd)?;

        if !output.status.success() {
            return Err(apply_err(
                cmd,
                format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        Ok(())
    }

    fn check(&self, cmd: &Command) -> Result<bool> {
        Ok(self.output(cmd)?.status.success())
    }

    fn write_file(&self, path: &Path, contents: &str) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| {
                Error::io(format!("create {}", dir.display()), e)
            })?;
        }
        fs::write(path, contents)
            .map_err(|e| Error::io(format!("write {}", path.display()), e))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to).map_err(|e| {
            Error::io(
                format!("rename {} to {}", from.display(), to.display()),
                e,
            )
        })
    }
}

/// Logs what it would do and does nothing.
pub struct DryRunRunner {
    log: Logger,
}

impl DryRunRunner {
    pub fn new(log: &Logger) -> Self {
        Self { log: log.clone() }
    }
}

impl CommandRunner for DryRunRunner {
    fn run(&self, cmd: &Command) -> Result<()> {
        match &cmd.stdin {
            Some(input) => info!(self.log, "dry run: would run";
                "command" => %cmd,
                "stdin" => input,
            ),
            None => info!(self.log, "dry run: would run"; "command" => %cmd),
        }
        Ok(())
    }

    /// Answers "no", so the dry run also shows what would be added.
    fn check(&self, cmd: &Command) -> Result<bool> {
        info!(self.log, "dry run: would check"; "command" => %cmd);
        Ok(false)
    }

    fn write_file(&self, path: &Path, contents: &str) -> Result<()> {
        info!(self.log, "dry run: would write";
            "path" => %path.display(),
            "bytes" => contents.len(),
        );
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        info!(self.log, "dry run: would rename";
            "from" => %from.display(),
            "to" => %to.display(),
        );
        Ok(())
    }
}

/// Whether the mount table in `mounts` lists `mount_point` read-only.
pub fn is_read_only(mounts: &str, mount_point: &str) -> bool {
    mounts
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let point = fields.nth(1)?;
            let opts = fields.nth(1)?;
            Some((point, opts))
        })
        .filter(|(point, _)| *point == mount_point)
        // The last mount over a point is the visible one.
        .last()
        .is_some_and(|(_, opts)| opts.split(',').any(|o| o == "ro"))
}

/// Interface address in `addr/len` form with the host part kept.
fn iface_addr(addr: &ClientAddressing) -> Result<String> {
    let server = addr.server_address();
    let prefix = addr.subnet().prefix_len();

    let net = match server {
        IpAddr::V4(ip) => ipnetwork::Ipv4Network::new(ip, prefix)
            .map(ipnetwork::IpNetwork::V4),
        IpAddr::V6(ip) => ipnetwork::Ipv6Network::new(ip, prefix)
            .map(ipnetwork::IpNetwork::V6),
    };

    net.map(|n| n.to_string()).map_err(|e| Error::Apply {
        command: format!("ip addr add {server}/{prefix}"),
        reason: e.to_string(),
    })
}

/// Applies a policy to the local host through a [`CommandRunner`].
pub struct SystemApplicator<R: CommandRunner> {
    runner: R,
    root: PathBuf,
    log: Logger,
}

impl<R: CommandRunner> SystemApplicator<R> {
    pub fn new(runner: R, log: &Logger) -> Self {
        Self { runner, root: PathBuf::from("/"), log: log.clone() }
    }

    /// Write configuration files below `root` instead of `/`.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    fn rooted(&self, path: &Path) -> PathBuf {
        self.root.join(path.strip_prefix("/").unwrap_or(path))
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<()> {
        self.runner.run(&Command::new(program, args.iter().copied()))
    }

    fn set_sysctls(&self) -> Result<()> {
        let mounts = self.runner.read_file(Path::new(PROC_MOUNTS))?;
        let remount = is_read_only(&mounts, PROC_SYS);

        if remount {
            info!(self.log, "remounting read-only mount read-write";
                "mount_point" => PROC_SYS,
            );
            self.run("mount", &["-o", "remount,rw", PROC_SYS])?;
        }

        for (key, value) in sysctls() {
            self.run("sysctl", &["-w", &format!("{key}={value}")])?;
        }

        if remount {
            self.run("mount", &["-o", "remount,ro", PROC_SYS])?;
        }

        Ok(())
    }

    /// Append the jump of `hook` unless an earlier run already did.
    fn install_hook(&self, hook: &Hook) -> Result<()> {
        let program = restore::rule_command(hook.family);

        if self.runner.check(&Command::new(program, hook.check_args()))? {
            debug!(self.log, "hook present";
                "table" => %hook.table,
                "chain" => %hook.chain,
            );
            return Ok(());
        }

        self.runner.run(&Command::new(program, hook.append_args()))?;
        info!(self.log, "hooked gateway chain";
            "table" => %hook.table,
            "chain" => %hook.chain,
            "target" => hook.target(),
        );
        Ok(())
    }
}

impl<R: CommandRunner> PolicyApplicator for SystemApplicator<R> {
    fn configure_interfaces(
        &mut self,
        v4: &ClientAddressing,
        v6: &ClientAddressing,
    ) -> Result<()> {
        self.run("modprobe", &[PF_KEY_MODULE])?;
        self.set_sysctls()?;

        let v4_addr = iface_addr(v4)?;
        let v6_addr = iface_addr(v6)?;

        self.run("ip", &["link", "add", GATEWAY_IFACE, "type", "dummy"])?;
        self.run("ip", &["addr", "add", &v4_addr, "dev", GATEWAY_IFACE])?;
        self.run("ip", &["-6", "addr", "add", &v6_addr, "dev", GATEWAY_IFACE])?;
        self.run("ip", &["link", "set", "up", GATEWAY_IFACE])?;

        for addr in [v4, v6] {
            let server = addr.server_address().to_string();
            let family = match addr.family() {
                AddressFamily::Ipv4 => "-4",
                AddressFamily::Ipv6 => "-6",
            };
            self.run(
                "ip",
                &[family, "route", "add", &server, "dev", GATEWAY_IFACE],
            )?;
        }

        info!(self.log, "configured gateway interface";
            "iface" => GATEWAY_IFACE,
            "ipv4" => v4_addr,
            "ipv6" => v6_addr,
        );

        Ok(())
    }

    fn apply_rules(&mut self, policy: &CompiledPolicy) -> Result<()> {
        for doc in restore::render_policy(policy) {
            let cmd = Command::new(restore::restore_command(doc.family), [
                "--noflush",
                "--wait",
            ])
            .with_stdin(doc.text);
            self.runner.run(&cmd)?;

            let rules = policy.rules(doc.family);
            for hook in restore::hooks(doc.family, rules) {
                self.install_hook(&hook)?;
            }

            info!(self.log, "applied rules";
                "family" => %doc.family,
                "count" => rules.len(),
            );

            if nat::masquerades(rules) {
                info!(self.log, "masquerading enabled"; "family" => %doc.family);
            }
        }

        Ok(())
    }

    fn write_config(&mut self, path: &Path, text: &str) -> Result<()> {
        let path = self.rooted(path);
        self.runner.write_file(&path, text)?;
        info!(self.log, "wrote configuration file"; "path" => %path.display());
        Ok(())
    }

    fn disable_service(&mut self, entry: &Path) -> Result<()> {
        let entry = self.rooted(entry);
        if !entry.exists() {
            debug!(self.log, "supervisor entry absent";
                "path" => %entry.display(),
            );
            return Ok(());
        }

        let to = inactive_path(&entry);
        self.runner.rename(&entry, &to)?;
        info!(self.log, "disabled supervised service";
            "entry" => %entry.display(),
            "moved_to" => %to.display(),
        );
        Ok(())
    }
}
