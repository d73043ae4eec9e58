// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Print compiled policies and addressing facts in a human-friendly
//! manner.
//!
//! This is mostly just a place to hang printing routines so that they
//! can be used by both vpngwadm and integration tests.

use crate::addressing::ClientAddressing;
use crate::classify::Ipv6Class;
use crate::engine::Finalized;
use crate::engine::Rule;
use crate::engine::Table;
use crate::policy::CompiledPolicy;
use itertools::Itertools;
use std::collections::VecDeque;
use std::io::Write;
use tabwriter::TabWriter;
use vpngw_api::AddressFamily;

/// Print a [`CompiledPolicy`].
pub fn print_rules(policy: &CompiledPolicy) -> std::io::Result<()> {
    print_rules_into(&mut std::io::stdout(), policy)
}

/// Print a [`CompiledPolicy`] into a given writer.
pub fn print_rules_into(
    writer: &mut impl Write,
    policy: &CompiledPolicy,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);

    for family in [AddressFamily::Ipv4, AddressFamily::Ipv6] {
        let by_table =
            policy.rules(family).iter().chunk_by(|rule| rule.table());

        for (table, rules) in &by_table {
            print_table_header(&mut t, family, table)?;
            for (idx, rule) in rules.enumerate() {
                print_rule(&mut t, idx, rule)?;
            }
            writeln!(t)?;
            t.flush()?;
        }
    }

    t.flush()
}

fn print_table_header(
    t: &mut impl Write,
    family: AddressFamily,
    table: Table,
) -> std::io::Result<()> {
    writeln!(t, "{family} {table}")?;
    write_hrb(t)?;
    print_rule_header(t)
}

/// Print the header for the [`print_rule()`] output.
pub fn print_rule_header(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "IDX\tCHAIN\tPREDICATES\tACTION\tCOMMENT")
}

/// Print a single rule, one predicate per line.
pub fn print_rule(
    t: &mut impl Write,
    idx: usize,
    rule: &Rule<Finalized>,
) -> std::io::Result<()> {
    let mut preds = rule
        .predicates()
        .iter()
        .map(ToString::to_string)
        .chain(rule.rate_limit().map(|l| format!("limit={l}")))
        .collect::<VecDeque<String>>();

    let first_pred = preds.pop_front().unwrap_or_else(|| "*".to_string());

    writeln!(
        t,
        "{idx}\t{}\t{first_pred}\t{}\t{}",
        rule.chain(),
        rule.action(),
        rule.comment().unwrap_or("")
    )?;

    while let Some(pred) = preds.pop_front() {
        writeln!(t, "\t\t{pred}\t\t")?;
    }

    Ok(())
}

/// Print the addressing facts of both families.
pub fn print_addressing(
    v4: &ClientAddressing,
    v6: &ClientAddressing,
    v6_class: Ipv6Class,
) -> std::io::Result<()> {
    print_addressing_into(&mut std::io::stdout(), v4, v6, v6_class)
}

/// Print the addressing facts of both families into a given writer.
pub fn print_addressing_into(
    writer: &mut impl Write,
    v4: &ClientAddressing,
    v6: &ClientAddressing,
    v6_class: Ipv6Class,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);

    writeln!(t, "FAMILY\tSUBNET\tPOOL\tGATEWAY\tRANGE\tCLASS")?;
    write_hr(&mut t)?;

    for (addr, class) in [(v4, None), (v6, Some(v6_class))] {
        writeln!(
            t,
            "{}\t{}\t{}\t{}\t{}-{}\t{}",
            addr.family(),
            addr.subnet(),
            addr.effective_subnet(),
            addr.server_address(),
            addr.client_range_start(),
            addr.client_range_end(),
            class.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string()),
        )?;
    }

    t.flush()
}

/// Output a horizontal rule in bold to the given writer.
pub fn write_hrb(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:=<70}", "=")
}

/// Output a horizontal rule to the given writer.
pub fn write_hr(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:-<70}", "-")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::addressing;
    use crate::classify::classify;
    use crate::policy::PolicyFlags;
    use crate::policy::compile;

    fn facts() -> (ClientAddressing, ClientAddressing, Ipv6Class) {
        let v6_subnet = "2a01:4f8:1::/48".parse().unwrap();
        let class = classify(&v6_subnet).unwrap();
        (
            addressing::partition_v4("10.0.0.0/24".parse().unwrap()).unwrap(),
            addressing::partition_v6(v6_subnet).unwrap(),
            class,
        )
    }

    #[test]
    fn rules_listing() {
        let (v4, v6, class) = facts();
        let policy = compile(&v4, &v6, class, &PolicyFlags::default());

        let mut out = vec![];
        print_rules_into(&mut out, &policy).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("IPv4 filter\n"));
        assert!(text.contains("IPv4 mangle\n"));
        assert!(text.contains("IPv4 nat\n"));
        assert!(text.contains("IPv6 filter\n"));
        assert!(!text.contains("IPv6 nat\n"));
        assert!(text.contains("limit=5/sec burst 20"));
        assert!(text.contains("RH0 Exploit Protection"));
    }

    #[test]
    fn addressing_listing() {
        let (v4, v6, class) = facts();

        let mut out = vec![];
        print_addressing_into(&mut out, &v4, &v6, class).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[2].starts_with("IPv4"));
        assert!(lines[2].contains("10.0.0.2-10.0.0.255"));
        assert!(lines[3].contains("2a01:4f8:1::/96"));
        assert!(lines[3].ends_with("global unicast"));
    }
}
