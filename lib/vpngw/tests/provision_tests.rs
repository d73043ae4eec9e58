// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! End to end runs of the startup pipeline against in-memory
//! collaborators.

use std::path::Path;
use std::path::PathBuf;
use vpngw::provision::Collaborators;
use vpngw::provision::Provisioned;
use vpngw::provision::provision;
use vpngw::template::CONFIG_FILES;
use vpngw::template::NDPPD_SUPERVISOR_CONF;
use vpngw::template::TemplateRenderer;
use vpngw_test_utils::*;

struct Harness {
    ca: TempCa,
    resolver: StaticResolver,
    renderer: TemplateRenderer,
    app: RecordingApplicator,
    external: ExternalPaths,
}

impl Harness {
    fn new() -> Self {
        let ca = TempCa::new();
        let external = ExternalPaths::under(&ca.path().join("external_ca"));

        Self {
            ca,
            resolver: StaticResolver::default()
                .with(TEST_HOSTNAME, &["198.51.100.7", "2001:db8:1::7"]),
            renderer: TemplateRenderer::new().unwrap(),
            app: RecordingApplicator::default(),
            external,
        }
    }

    fn run(&mut self, cfg: &Config) -> Result<Provisioned> {
        run_with(
            cfg,
            &self.ca,
            &self.resolver,
            &self.renderer,
            &mut self.app,
            &self.external,
        )
    }
}

fn run_with(
    cfg: &Config,
    ca: &dyn CertificateAuthority,
    resolver: &dyn Resolver,
    renderer: &dyn Renderer,
    app: &mut RecordingApplicator,
    external: &ExternalPaths,
) -> Result<Provisioned> {
    let collab = Collaborators {
        ca,
        external_pki: external.clone(),
        resolver,
        renderer,
        applicator: app,
    };
    provision(cfg, collab, &test_logger())
}

fn written(app: &RecordingApplicator, path: &str) -> String {
    app.calls
        .iter()
        .find_map(|c| match c {
            Applied::WriteConfig { path: p, text } if p == Path::new(path) => {
                Some(text.clone())
            }
            _ => None,
        })
        .unwrap_or_else(|| panic!("{path} not written"))
}

#[test]
fn site_local_run() {
    let mut h = Harness::new();
    let cfg = config(&[]).unwrap();
    let out = h.run(&cfg).unwrap();

    assert_eq!(
        h.app.kinds(),
        vec![
            "write_config",
            "write_config",
            "write_config",
            "write_config",
            "write_config",
            "disable_service",
            "configure_interfaces",
            "apply_rules",
        ]
    );

    assert_eq!(
        h.app.calls[5],
        Applied::DisableService { entry: PathBuf::from(NDPPD_SUPERVISOR_CONF) }
    );
    assert_eq!(
        h.app.calls[6],
        Applied::ConfigureInterfaces {
            v4: "10.0.0.1".parse().unwrap(),
            v6: "fd00:dead:beef:affe::1".parse().unwrap(),
        }
    );
    assert_eq!(h.app.policies, vec![out.plan.policy.clone()]);

    let paths: Vec<&Path> = out.files.iter().map(|f| f.path.as_path()).collect();
    let expected: Vec<&Path> =
        CONFIG_FILES.iter().map(|f| Path::new(f.path)).collect();
    assert_eq!(paths, expected);

    // The server certificate carries exactly the configured hostnames.
    assert_eq!(h.ca.requests(), vec![cfg.vpn_hostnames.clone()]);
    assert!(out.pki.ca_key.is_some());

    let ipsec = written(&h.app, "/etc/ipsec.conf");
    assert!(ipsec.contains("left = 198.51.100.7,2001:db8:1::7"));
    assert!(ipsec.contains(&format!(
        "leftcert = {}",
        out.pki.server_cert.path.display()
    )));
    assert!(ipsec.contains(
        "rightsourceip = 10.0.0.2-10.0.0.255,\
         fd00:dead:beef:affe::2-fd00:dead:beef:affe::ffff:ffff"
    ));

    let named = written(&h.app, "/etc/bind/named.conf.options");
    assert!(named.contains("127.0.0.11;"));
    assert!(named.contains("10.0.0.0/24;"));
}

#[test]
fn global_unicast_run() {
    let mut h = Harness::new();
    let cfg = config(&[
        ("CLIENT_SUBNET_IPV6", "2a01:4f8:1:2::/64"),
        ("USE_DOCKER_DNS", "false"),
        ("DNS_SERVERS", "9.9.9.9, 2620:fe::fe"),
    ])
    .unwrap();
    let out = h.run(&cfg).unwrap();

    assert_eq!(out.plan.ipv6_class, Ipv6Class::GlobalUnicast);
    assert!(!h.app.kinds().contains(&"disable_service"));

    let ndppd = written(&h.app, "/etc/ndppd.conf");
    assert!(ndppd.contains("rule 2a01:4f8:1:2::/64 {"));

    let named = written(&h.app, "/etc/bind/named.conf.options");
    assert!(named.contains("9.9.9.9;"));
    assert!(named.contains("2620:fe::fe;"));
}

#[test]
fn invalid_input_touches_nothing() {
    let mut app = RecordingApplicator::default();
    let cfg = config(&[("CLIENT_SUBNET_IPV6", "fe80::/64")]).unwrap();
    let ca = FailingCa { reachable: false };

    let res = run_with(
        &cfg,
        &ca,
        &StaticResolver::default(),
        &CaptureRenderer::default(),
        &mut app,
        &ExternalPaths::default(),
    );

    assert!(matches!(res, Err(Error::UnsupportedAddressRange { .. })));
    assert!(app.calls.is_empty());
}

#[test]
fn pki_failure_is_fatal() {
    let mut app = RecordingApplicator::default();
    let renderer = CaptureRenderer::default();
    let cfg = config(&[]).unwrap();

    let res = run_with(
        &cfg,
        &FailingCa { reachable: true },
        &StaticResolver::default(),
        &renderer,
        &mut app,
        &ExternalPaths::default(),
    );

    assert!(matches!(res, Err(Error::PkiIssuanceFailure(_))));
    assert!(app.calls.is_empty());
    assert!(renderer.rendered.borrow().is_empty());
}

#[test]
fn missing_external_pki() {
    let dir = tempfile::tempdir().unwrap();
    let external = ExternalPaths::under(dir.path());
    let mut app = RecordingApplicator::default();
    let cfg = config(&[("USE_INTERNAL_PKI", "no")]).unwrap();

    let res = run_with(
        &cfg,
        &FailingCa { reachable: false },
        &StaticResolver::default(),
        &CaptureRenderer::default(),
        &mut app,
        &external,
    );

    match res {
        Err(Error::MissingExternalPki { path, .. }) => {
            assert_eq!(path, external.ca_cert)
        }
        res => panic!("unexpected {res:?}"),
    }
    assert!(app.calls.is_empty());
}

#[test]
fn external_pki_run() {
    // Material issued elsewhere and dropped at the external paths.
    let issuer = TempCa::new();
    let server = issuer
        .get_or_create_server_material(&[TEST_HOSTNAME.parse().unwrap()])
        .unwrap();
    let ca = issuer.get_or_create_ca_material().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let external = ExternalPaths::under(dir.path());
    std::fs::create_dir_all(external.server_key.parent().unwrap()).unwrap();
    std::fs::write(&external.ca_cert, &ca.cert.pem).unwrap();
    std::fs::write(&external.server_cert, &server.cert.pem).unwrap();
    std::fs::write(&external.server_key, &server.key.pem).unwrap();

    let renderer = CaptureRenderer::default();
    let mut app = RecordingApplicator::default();
    let cfg = config(&[("USE_INTERNAL_PKI", "off")]).unwrap();

    let out = run_with(
        &cfg,
        &FailingCa { reachable: false },
        &StaticResolver::default(),
        &renderer,
        &mut app,
        &external,
    )
    .unwrap();

    assert!(out.pki.ca_key.is_none());
    assert_eq!(out.pki.server_key.path, external.server_key);

    let rendered = renderer.rendered.borrow();
    assert_eq!(rendered.len(), CONFIG_FILES.len());
    let ctx = &rendered[0].1;
    assert_eq!(ctx.ca_key_path, None);
    assert_eq!(ctx.ca_cert_path, external.ca_cert.display().to_string());
}

#[test]
fn unresolvable_hostname_is_not_fatal() {
    let ca = TempCa::new();
    let renderer = CaptureRenderer::default();
    let mut app = RecordingApplicator::default();
    let cfg = config(&[]).unwrap();

    run_with(
        &cfg,
        &ca,
        &StaticResolver::default(),
        &renderer,
        &mut app,
        &ExternalPaths::default(),
    )
    .unwrap();

    let rendered = renderer.rendered.borrow();
    let ctx = &rendered[0].1;
    assert!(ctx.local_addresses.is_empty());
    assert!(ctx.ip_addresses_by_hostname[TEST_HOSTNAME].is_empty());
}

#[test]
fn apply_failure_stops_the_run() {
    let ca = TempCa::new();
    let mut app = RecordingApplicator {
        fail_on: Some("configure_interfaces"),
        ..Default::default()
    };
    let cfg = config(&[]).unwrap();

    let res = run_with(
        &cfg,
        &ca,
        &StaticResolver::default(),
        &CaptureRenderer::default(),
        &mut app,
        &ExternalPaths::default(),
    );

    assert!(matches!(res, Err(Error::Apply { .. })));
    assert!(!app.kinds().contains(&"apply_rules"));
    assert!(app.policies.is_empty());
}

#[test]
fn rerun_reuses_material_and_compiles_the_same() {
    let mut h = Harness::new();
    let cfg = config(&[]).unwrap();

    let first = h.run(&cfg).unwrap();
    let second = h.run(&cfg).unwrap();

    assert_eq!(first.plan, second.plan);
    assert_eq!(first.pki, second.pki);
    assert_eq!(h.app.policies.len(), 2);
    assert_eq!(h.app.policies[0], h.app.policies[1]);
}
