// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Rendering of compiled rules as `iptables-restore` input.
//!
//! The gateway never declares a built-in chain. Every rule meant for a
//! built-in chain is restored into a chain of its own named after it
//! (`INPUT` becomes `VPNGW_INPUT`), and a single [`Hook`] per built-in
//! chain jumps there. Documents are restored with `--noflush`, so rules
//! other programs put into the same tables survive. Declaring a chain
//! flushes it, which makes restoring a document twice equivalent to
//! restoring it once.

use crate::engine::Action;
use crate::engine::Chain;
use crate::engine::Finalized;
use crate::engine::Predicate;
use crate::engine::Rule;
use crate::engine::Table;
use crate::engine::predicate::join;
use crate::policy::CompiledPolicy;
use core::fmt;
use core::fmt::Display;
use itertools::Itertools;
use vpngw_api::AddressFamily;
use vpngw_api::Protocol;

const TABLES: [Table; 3] = [Table::Filter, Table::Mangle, Table::Nat];

/// Prepended to a built-in chain's name to form the chain the gateway
/// owns in its place.
pub const CHAIN_PREFIX: &str = "VPNGW_";

/// The program that loads a document of `family`.
pub fn restore_command(family: AddressFamily) -> &'static str {
    match family {
        AddressFamily::Ipv4 => "iptables-restore",
        AddressFamily::Ipv6 => "ip6tables-restore",
    }
}

/// The program that edits single rules of `family`.
pub fn rule_command(family: AddressFamily) -> &'static str {
    match family {
        AddressFamily::Ipv4 => "iptables",
        AddressFamily::Ipv6 => "ip6tables",
    }
}

/// The chain rules of `chain` are restored into.
pub fn owned_chain(chain: &Chain) -> String {
    if chain.is_builtin() {
        format!("{CHAIN_PREFIX}{}", chain.name())
    } else {
        chain.name().to_string()
    }
}

/// A jump from a built-in chain into the gateway's chain for it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Hook {
    pub family: AddressFamily,
    pub table: Table,
    pub chain: Chain,
}

impl Hook {
    pub fn target(&self) -> String {
        owned_chain(&self.chain)
    }

    fn args(&self, op: &str) -> Vec<String> {
        vec![
            "-w".to_string(),
            "-t".to_string(),
            self.table.to_string(),
            op.to_string(),
            self.chain.name().to_string(),
            "-j".to_string(),
            self.target(),
        ]
    }

    /// Arguments asking whether the jump is already in place.
    pub fn check_args(&self) -> Vec<String> {
        self.args("-C")
    }

    /// Arguments appending the jump.
    pub fn append_args(&self) -> Vec<String> {
        self.args("-A")
    }
}

/// The hooks `rules` of `family` need, by table and then by first use
/// of each built-in chain.
pub fn hooks(family: AddressFamily, rules: &[Rule<Finalized>]) -> Vec<Hook> {
    let mut hooks = vec![];

    for table in TABLES {
        let chains = rules
            .iter()
            .filter(|r| r.family() == family && r.table() == table)
            .map(|r| r.chain())
            .filter(|c| c.is_builtin())
            .unique();

        hooks.extend(
            chains.map(|chain| Hook { family, table, chain: chain.clone() }),
        );
    }

    hooks
}

/// A rendered document and the family it is for.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RestoreDocument {
    pub family: AddressFamily,
    pub text: String,
}

/// Render both families, IPv4 first.
pub fn render_policy(policy: &CompiledPolicy) -> [RestoreDocument; 2] {
    [AddressFamily::Ipv4, AddressFamily::Ipv6].map(|family| RestoreDocument {
        family,
        text: render(family, policy.rules(family)),
    })
}

struct Document<'a> {
    family: AddressFamily,
    rules: &'a [Rule<Finalized>],
}

impl Display for Document<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_document(f, self.family, self.rules)
    }
}

/// Render the rules of one family.
///
/// Rules of another family are ignored.
pub fn render(family: AddressFamily, rules: &[Rule<Finalized>]) -> String {
    Document { family, rules }.to_string()
}

/// Write the document for the rules of `family` to `out`. Tables
/// without rules are left out.
pub fn write_document(
    out: &mut impl fmt::Write,
    family: AddressFamily,
    rules: &[Rule<Finalized>],
) -> fmt::Result {
    for table in TABLES {
        let rules: Vec<&Rule<Finalized>> = rules
            .iter()
            .filter(|r| r.family() == family && r.table() == table)
            .collect();

        if rules.is_empty() {
            continue;
        }

        writeln!(out, "*{table}")?;

        for chain in owned_chains(&rules) {
            writeln!(out, ":{chain} - [0:0]")?;
        }

        for rule in rules {
            writeln!(out, "{}", rule_line(rule))?;
        }

        writeln!(out, "COMMIT")?;
    }

    Ok(())
}

/// The chains a table's rules live in or jump to, in order of first
/// appearance.
fn owned_chains(rules: &[&Rule<Finalized>]) -> Vec<String> {
    rules
        .iter()
        .copied()
        .flat_map(|r| {
            let target = match r.action() {
                Action::Jump(chain) => Some(chain),
                _ => None,
            };
            [Some(r.chain()), target]
        })
        .flatten()
        .map(owned_chain)
        .unique()
        .collect()
}

/// One `-A` line of a restore document.
pub fn rule_line(rule: &Rule<Finalized>) -> String {
    let mut args = vec!["-A".to_string(), owned_chain(rule.chain())];

    for pred in rule.predicates() {
        args.extend(pred_args(rule.family(), pred));
    }

    if let Some(limit) = rule.rate_limit() {
        args.extend([
            "-m".to_string(),
            "limit".to_string(),
            "--limit".to_string(),
            format!("{}/sec", limit.per_second),
            "--limit-burst".to_string(),
            limit.burst.to_string(),
        ]);
    }

    if let Some(comment) = rule.comment() {
        args.extend([
            "-m".to_string(),
            "comment".to_string(),
            "--comment".to_string(),
            format!("\"{comment}\""),
        ]);
    }

    args.extend(action_args(rule.action()));
    args.join(" ")
}

fn proto_name(proto: Protocol) -> &'static str {
    match proto {
        Protocol::ICMP => "icmp",
        Protocol::TCP => "tcp",
        Protocol::UDP => "udp",
        Protocol::ESP => "esp",
        Protocol::ICMPv6 => "ipv6-icmp",
    }
}

/// The `-m` module a predicate needs, if any, and its option words.
fn pred_parts(
    family: AddressFamily,
    pred: &Predicate,
) -> (Option<&'static str>, Vec<String>) {
    use Predicate::*;

    match pred {
        InIface(name) => (None, vec!["-i".to_string(), name.clone()]),

        SrcNet(cidr) => (None, vec!["-s".to_string(), cidr.to_string()]),

        DstNet(cidr) => (None, vec!["-d".to_string(), cidr.to_string()]),

        IpProto(proto) => {
            (None, vec!["-p".to_string(), proto_name(*proto).to_string()])
        }

        DstPort(port) => (None, vec!["--dport".to_string(), port.to_string()]),

        IcmpType(ty) => {
            let opt = match family {
                AddressFamily::Ipv4 => "--icmp-type",
                AddressFamily::Ipv6 => "--icmpv6-type",
            };
            (None, vec![opt.to_string(), ty.to_string()])
        }

        ConnState(states) => (
            Some("conntrack"),
            vec!["--ctstate".to_string(), join(states)],
        ),

        IpsecPolicy { dir, pol } => (
            Some("policy"),
            vec![
                "--dir".to_string(),
                dir.to_string(),
                "--pol".to_string(),
                pol.to_string(),
            ],
        ),

        RoutingType(ty) => {
            (Some("rt"), vec!["--rt-type".to_string(), ty.to_string()])
        }

        TcpFlags { mask, set } => {
            (None, vec!["--tcp-flags".to_string(), join(mask), join(set)])
        }

        TcpMss(range) => (
            Some("tcpmss"),
            vec![
                "--mss".to_string(),
                format!("{}:{}", range.start(), range.end()),
            ],
        ),

        Not(inner) => {
            let (module, mut opts) = pred_parts(family, inner);
            opts.insert(0, "!".to_string());
            (module, opts)
        }
    }
}

fn pred_args(family: AddressFamily, pred: &Predicate) -> Vec<String> {
    let (module, opts) = pred_parts(family, pred);
    let mut args = vec![];

    if let Some(module) = module {
        args.push("-m".to_string());
        args.push(module.to_string());
    }

    args.extend(opts);
    args
}

fn action_args(action: &Action) -> Vec<String> {
    let jump = |target: &str| vec!["-j".to_string(), target.to_string()];

    match action {
        Action::Accept => jump("ACCEPT"),
        Action::Drop => jump("DROP"),
        Action::Masquerade => jump("MASQUERADE"),
        Action::Jump(chain) => jump(&owned_chain(chain)),
        Action::SetMss(mss) => {
            let mut args = jump("TCPMSS");
            args.extend(["--set-mss".to_string(), mss.to_string()]);
            args
        }
    }
}
