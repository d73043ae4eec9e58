// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Properties of partitioning, classification and compilation, checked
//! through the public API.

use vpngw::addressing;
use vpngw::addressing::partition;
use vpngw::api::Direction;
use vpngw::apply::restore;
use vpngw::classify::classify;
use vpngw::engine::ConnState;
use vpngw::engine::PolicyKind;
use vpngw::engine::TcpFlag;
use vpngw::policy::compile;
use vpngw::provision::plan;
use vpngw_test_utils::*;

fn compile_with(
    v4: &str,
    v6: &str,
    flags: PolicyFlags,
) -> (ClientAddressing, ClientAddressing, CompiledPolicy) {
    let v4 = addressing::partition_v4(v4.parse().unwrap()).unwrap();
    let v6_cidr: Ipv6Cidr = v6.parse().unwrap();
    let class = classify(&v6_cidr).unwrap();
    let v6 = addressing::partition_v6(v6_cidr).unwrap();
    let policy = compile(&v4, &v6, class, &flags);
    (v4, v6, policy)
}

fn default_policy() -> CompiledPolicy {
    let flags = PolicyFlags::default();
    compile_with("10.0.0.0/24", "fd00:dead:beef:affe::/64", flags).2
}

fn default_subnet(family: AddressFamily) -> IpCidr {
    match family {
        AddressFamily::Ipv4 => "10.0.0.0/24".parse().unwrap(),
        AddressFamily::Ipv6 => "fd00:dead:beef:affe::/64".parse().unwrap(),
    }
}

const FAMILIES: [AddressFamily; 2] = [AddressFamily::Ipv4, AddressFamily::Ipv6];

fn is_drop_all(rule: &Rule<Finalized>, chain: &Chain) -> bool {
    rule.table() == Table::Filter
        && rule.chain() == chain
        && *rule.action() == Action::Drop
        && rule.is_match_any()
}

#[test]
fn ipv4_offsets() {
    let subnets =
        ["10.0.0.0/24", "192.168.100.0/22", "172.16.0.8/30", "100.64.0.0/10"];

    for s in subnets {
        let subnet: Ipv4Cidr = s.parse().unwrap();
        let cidr = IpCidr::from(subnet);
        let addr = partition(cidr).unwrap();

        assert_eq!(addr.server_address(), IpAddr::from(subnet.nth(1).unwrap()));
        assert_eq!(
            addr.client_range_start(),
            IpAddr::from(subnet.nth(2).unwrap())
        );
        assert_eq!(addr.client_range_end(), IpAddr::from(subnet.last()));
        assert!(cidr.is_member(addr.server_address()));
        assert!(cidr.is_member(addr.client_range_start()));
        assert!(addr.server_address() < addr.client_range_start());
        assert!(addr.client_range_start() <= addr.client_range_end());
    }
}

#[test]
fn ipv6_clamp() {
    for s in ["fd00::/8", "2a01:4f8::/32", "2a01:4f8:1:2::/64", "fd12::/95"] {
        let subnet: Ipv6Cidr = s.parse().unwrap();
        let addr = partition(subnet.into()).unwrap();
        let effective = addr.effective_subnet();

        assert_eq!(effective.prefix_len(), 96);
        assert_eq!(effective.ip(), IpAddr::V6(subnet.ip()));
        assert!(effective.is_member(addr.server_address()));
        assert!(effective.is_member(addr.client_range_end()));
    }

    for s in ["fd00::/96", "fd00::/112", "2a01:4f8::/126"] {
        let subnet: Ipv6Cidr = s.parse().unwrap();
        let addr = partition(subnet.into()).unwrap();
        assert_eq!(addr.effective_subnet(), IpCidr::from(subnet));
    }
}

#[test]
fn documented_examples() {
    let (v4, v6, policy) = compile_with(
        "10.0.0.0/24",
        "fd00:dead:beef:affe::/64",
        PolicyFlags::default(),
    );

    assert_eq!(v4.server_address().to_string(), "10.0.0.1");
    assert_eq!(v4.client_range_start().to_string(), "10.0.0.2");
    assert_eq!(v4.client_range_end().to_string(), "10.0.0.255");

    assert_eq!(v6.effective_subnet().to_string(), "fd00:dead:beef:affe::/96");
    assert_eq!(v6.server_address().to_string(), "fd00:dead:beef:affe::1");

    let subnet = v6.subnet();
    let masq = policy.rules(AddressFamily::Ipv6).iter().find(|r| {
        *r.action() == Action::Masquerade
            && r.has_predicate(|p| *p == Predicate::SrcNet(subnet))
    });
    assert!(masq.is_some());

    let flags = PolicyFlags::default();
    let (_, _, gua) = compile_with("10.0.0.0/24", "2a01:4f8:1:2::/64", flags);
    assert!(
        gua.rules(AddressFamily::Ipv6)
            .iter()
            .all(|r| *r.action() != Action::Masquerade)
    );
    assert!(
        gua.rules(AddressFamily::Ipv4)
            .iter()
            .any(|r| *r.action() == Action::Masquerade)
    );
}

#[test]
fn classification_is_exclusive() {
    let global = ["2a01:4f8::/32", "2606:4700::/48", "3ffe::/16"];
    let site =
        ["fc00::/7", "fd00::/8", "fd00:dead:beef:affe::/64", "fec0::/10"];
    let neither = [
        "::/0",
        "::1/128",
        "fe80::/10",
        "ff02::/16",
        "2001:db8::/32",
        "2001::/32",
        "3fff::/20",
        "f000::/4",
    ];

    for s in global {
        assert_eq!(
            classify(&s.parse().unwrap()).unwrap(),
            Ipv6Class::GlobalUnicast,
            "{s}"
        );
    }

    for s in site {
        assert_eq!(
            classify(&s.parse().unwrap()).unwrap(),
            Ipv6Class::SiteLocal,
            "{s}"
        );
    }

    for s in neither {
        assert!(
            matches!(
                classify(&s.parse().unwrap()),
                Err(Error::UnsupportedAddressRange { .. })
            ),
            "{s}"
        );
    }
}

#[test]
fn malformed_and_borderline_inputs() {
    match config(&[("CLIENT_SUBNET_IPV4", "300.0.0.0/24")]) {
        Err(Error::InvalidSubnet { value, .. }) => {
            assert_eq!(value, "300.0.0.0/24")
        }
        res => panic!("unexpected {res:?}"),
    }

    let cfg = config(&[("CLIENT_SUBNET_IPV6", "2001:db8::/8")]).unwrap();
    for _ in 0..2 {
        match plan(&cfg) {
            Err(Error::UnsupportedAddressRange { subnet, .. }) => {
                assert_eq!(subnet, "2000::/8")
            }
            res => panic!("unexpected {res:?}"),
        }
    }

    let cfg = config(&[("CLIENT_SUBNET_IPV4", "10.0.0.0/31")]).unwrap();
    assert!(matches!(plan(&cfg), Err(Error::InvalidSubnet { .. })));
}

#[test]
fn deterministic() {
    let a = default_policy();
    let b = default_policy();
    assert_eq!(a, b);
    assert_eq!(
        rule_lines(a.rules(AddressFamily::Ipv6)),
        rule_lines(b.rules(AddressFamily::Ipv6))
    );
    assert_eq!(restore::render_policy(&a), restore::render_policy(&b));
}

#[test]
fn interclient_isolation_precedes_default_deny() {
    let policy = default_policy();

    for family in [AddressFamily::Ipv4, AddressFamily::Ipv6] {
        let rules = policy.rules(family);
        let subnet: IpCidr = match family {
            AddressFamily::Ipv4 => "10.0.0.0/24".parse().unwrap(),
            AddressFamily::Ipv6 => "fd00:dead:beef:affe::/64".parse().unwrap(),
        };

        let isolation = position(rules, |r| {
            r.chain() == &Chain::Forward
                && *r.action() == Action::Drop
                && r.has_predicate(|p| *p == Predicate::SrcNet(subnet))
                && r.has_predicate(|p| *p == Predicate::DstNet(subnet))
        })
        .unwrap();
        let deny =
            position(rules, |r| is_drop_all(r, &Chain::Forward)).unwrap();
        assert!(isolation < deny, "{family}");
    }

    let allowed = compile_with(
        "10.0.0.0/24",
        "fd00:dead:beef:affe::/64",
        PolicyFlags {
            allow_interclient_communication: true,
            ..Default::default()
        },
    )
    .2;
    assert!(allowed.iter().all(|r| {
        !(r.has_predicate(|p| matches!(p, Predicate::SrcNet(_)))
            && r.has_predicate(|p| matches!(p, Predicate::DstNet(_))))
    }));
}

fn unprotected_to_clients(policy: &CompiledPolicy) -> usize {
    policy
        .iter()
        .filter(|r| {
            r.chain() == &Chain::Forward
                && *r.action() == Action::Accept
                && r.has_predicate(|p| matches!(p, Predicate::DstNet(_)))
                && !r.has_predicate(|p| {
                    *p == Predicate::IpsecPolicy {
                        dir: Direction::In,
                        pol: PolicyKind::Ipsec,
                    }
                })
        })
        .count()
}

#[test]
fn protection_from_internet() {
    assert_eq!(unprotected_to_clients(&default_policy()), 0);

    let exposed = compile_with(
        "10.0.0.0/24",
        "fd00:dead:beef:affe::/64",
        PolicyFlags {
            protect_clients_from_internet: false,
            ..Default::default()
        },
    )
    .2;
    assert_eq!(unprotected_to_clients(&exposed), 2);

    // The exposing rule only admits new connections and still comes
    // before the default deny.
    let rules = exposed.rules(AddressFamily::Ipv4);
    let accept = position(rules, |r| {
        r.has_predicate(|p| matches!(p, Predicate::DstNet(_)))
            && r.has_predicate(|p| {
                *p == Predicate::ConnState(vec![ConnState::New])
            })
    })
    .unwrap();
    let deny = position(rules, |r| is_drop_all(r, &Chain::Forward)).unwrap();
    assert!(accept < deny);
}

#[test]
fn default_deny_is_last_in_chain() {
    let policy = default_policy();

    for family in [AddressFamily::Ipv4, AddressFamily::Ipv6] {
        for chain in [Chain::Input, Chain::Forward] {
            let in_chain: Vec<&Rule<Finalized>> = policy
                .rules(family)
                .iter()
                .filter(|r| r.table() == Table::Filter && r.chain() == &chain)
                .collect();
            assert!(is_drop_all(in_chain[in_chain.len() - 1], &chain));
        }
    }
}

#[test]
fn exploit_filtering_comes_first() {
    let policy = default_policy();
    let v6 = policy.rules(AddressFamily::Ipv6);

    let chains = [Chain::Input, Chain::Forward, Chain::Output];
    for (idx, chain) in chains.iter().enumerate() {
        assert_eq!(v6[idx].chain(), chain);
        assert_eq!(v6[idx].predicates(), &[Predicate::RoutingType(0)]);
    }

    assert!(
        policy
            .rules(AddressFamily::Ipv4)
            .iter()
            .all(|r| {
                !r.has_predicate(|p| matches!(p, Predicate::RoutingType(_)))
            })
    );
}

#[test]
fn icmp_dispatch() {
    let policy = default_policy();

    for family in [AddressFamily::Ipv4, AddressFamily::Ipv6] {
        let rules = policy.rules(family);
        let proto = match family {
            AddressFamily::Ipv4 => Protocol::ICMP,
            AddressFamily::Ipv6 => Protocol::ICMPv6,
        };

        let dispatch =
            [(Chain::Input, "AllowICMP_I"), (Chain::Forward, "AllowICMP_F")];
        for (parent, sub) in dispatch {
            let sub = Chain::custom(sub);
            let jump = position(rules, |r| {
                r.chain() == &parent && *r.action() == Action::Jump(sub.clone())
            })
            .unwrap();
            assert_eq!(rules[jump].predicates(), &[Predicate::IpProto(proto)]);

            // The sub-chain ends in a drop and nothing else in the parent
            // matches that protocol afterwards.
            let last_in_sub =
                rules.iter().rposition(|r| r.chain() == &sub).unwrap();
            assert!(is_drop_all(&rules[last_in_sub], &sub));
            assert!(rules[jump + 1..].iter().all(|r| {
                r.chain() != &parent
                    || !r.has_predicate(|p| *p == Predicate::IpProto(proto))
            }));
        }
    }

    // Neighbor discovery is admitted to the gateway but never forwarded.
    let v6 = policy.rules(AddressFamily::Ipv6);
    let types = |chain: &str| -> Vec<u8> {
        v6.iter()
            .filter(|r| r.chain() == &Chain::custom(chain))
            .flat_map(|r| r.predicates().iter())
            .filter_map(|p| match p {
                Predicate::IcmpType(ty) => Some(*ty),
                _ => None,
            })
            .collect()
    };
    assert!(types("AllowICMP_I").contains(&135));
    assert!(!types("AllowICMP_F").contains(&135));
    assert!(types("AllowICMP_F").contains(&128));
}

#[test]
fn stateful_before_new_connections() {
    let policy = default_policy();
    let rules = policy.rules(AddressFamily::Ipv4);

    let established = position(rules, |r| {
        r.chain() == &Chain::Forward
            && r.has_predicate(|p| {
                *p == Predicate::ConnState(vec![
                    ConnState::Established,
                    ConnState::Related,
                ])
            })
    })
    .unwrap();
    let new = position(rules, |r| {
        r.chain() == &Chain::Forward
            && r.has_predicate(|p| {
                *p == Predicate::ConnState(vec![ConnState::New])
            })
    })
    .unwrap();
    assert!(established < new);
}

#[test]
fn restore_leaves_foreign_rules_alone() {
    let builtin = ["PREROUTING", "INPUT", "FORWARD", "OUTPUT", "POSTROUTING"];

    for doc in restore::render_policy(&default_policy()) {
        let tables = doc.text.lines().filter(|l| l.starts_with('*')).count();
        let commits = doc.text.lines().filter(|l| *l == "COMMIT").count();
        assert_eq!(tables, 3);
        assert_eq!(commits, 3);

        // Only chains the gateway owns are declared, and so flushed.
        let declared: Vec<&str> = doc
            .text
            .lines()
            .filter_map(|l| l.strip_prefix(':'))
            .filter_map(|l| l.split(' ').next())
            .collect();
        assert!(!declared.is_empty());
        assert!(declared.iter().all(|c| !builtin.contains(c)), "{declared:?}");
        assert!(
            declared
                .iter()
                .all(|c| c.starts_with(restore::CHAIN_PREFIX)
                    || c.starts_with("AllowICMP_"))
        );
        assert!(!doc.text.contains("-N "));
    }
}

#[test]
fn dns_admission() {
    let policy = default_policy();

    for family in FAMILIES {
        let rules = policy.rules(family);
        let subnet = default_subnet(family);

        let dns: Vec<usize> = [Protocol::UDP, Protocol::TCP]
            .into_iter()
            .map(|proto| {
                position(rules, |r| {
                    r.table() == Table::Filter
                        && r.chain() == &Chain::Input
                        && *r.action() == Action::Accept
                        && r.predicates()
                            == [
                                Predicate::IpProto(proto),
                                Predicate::SrcNet(subnet),
                                Predicate::DstPort(53),
                                Predicate::ipsec_in(),
                            ]
                })
                .unwrap_or_else(|| panic!("{family}: no {proto} DNS rule"))
            })
            .collect();

        let stateful = position(rules, |r| {
            r.chain() == &Chain::Input
                && r.has_predicate(|p| {
                    *p == Predicate::ConnState(vec![
                        ConnState::Established,
                        ConnState::Related,
                    ])
                })
        })
        .unwrap();
        let isolation = position(rules, |r| {
            r.chain() == &Chain::Forward
                && r.has_predicate(|p| *p == Predicate::DstNet(subnet))
                && *r.action() == Action::Drop
        })
        .unwrap();

        assert_eq!(dns[1], dns[0] + 1, "{family}");
        assert!(stateful < dns[0], "{family}");
        assert!(dns[1] < isolation, "{family}");
    }
}

#[test]
fn mss_clamp_per_family() {
    let policy = default_policy();

    for (family, mss) in [(AddressFamily::Ipv4, 1360), (AddressFamily::Ipv6, 1340)]
    {
        let mangle: Vec<&Rule<Finalized>> = policy
            .rules(family)
            .iter()
            .filter(|r| r.table() == Table::Mangle)
            .collect();

        assert_eq!(mangle.len(), 1, "{family}");
        assert_eq!(mangle[0].chain(), &Chain::Forward);
        assert_eq!(*mangle[0].action(), Action::SetMss(mss));
        assert_eq!(
            mangle[0].predicates(),
            &[
                Predicate::IpProto(Protocol::TCP),
                Predicate::TcpFlags {
                    mask: vec![TcpFlag::Syn, TcpFlag::Rst],
                    set: vec![TcpFlag::Syn],
                },
                Predicate::SrcNet(default_subnet(family)),
                Predicate::ipsec_in(),
                Predicate::TcpMss(mss + 1..=1500),
            ]
        );
    }
}

#[test]
fn ipsec_traffic_is_exempt_from_masquerade() {
    let policy = default_policy();

    for family in FAMILIES {
        let nat: Vec<&Rule<Finalized>> = policy
            .rules(family)
            .iter()
            .filter(|r| r.table() == Table::Nat)
            .collect();
        let subnet = Predicate::SrcNet(default_subnet(family));

        assert_eq!(nat.len(), 2, "{family}");
        assert!(nat.iter().all(|r| r.chain() == &Chain::Postrouting));
        assert_eq!(*nat[0].action(), Action::Accept);
        assert_eq!(nat[0].predicates(), &[subnet.clone(), Predicate::ipsec_out()]);
        assert_eq!(*nat[1].action(), Action::Masquerade);
        assert_eq!(nat[1].predicates(), &[subnet]);
    }
}

#[test]
fn anti_spoofing_rejects_clear_text_client_traffic() {
    let policy = default_policy();

    for family in FAMILIES {
        let subnet = default_subnet(family);
        let spoof: Vec<&Rule<Finalized>> = policy
            .rules(family)
            .iter()
            .filter(|r| r.has_predicate(|p| *p == Predicate::SrcNet(subnet)))
            .filter(|r| r.comment() == Some("Anti-Spoofing"))
            .collect();

        let chains: Vec<&Chain> = spoof.iter().map(|r| r.chain()).collect();
        assert_eq!(chains, vec![&Chain::Input, &Chain::Forward], "{family}");

        for rule in spoof {
            assert_eq!(*rule.action(), Action::Drop);
            assert_eq!(
                rule.predicates(),
                &[
                    Predicate::SrcNet(subnet),
                    Predicate::IpsecPolicy {
                        dir: Direction::In,
                        pol: PolicyKind::None,
                    },
                ]
            );
        }
    }
}
