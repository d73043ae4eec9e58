// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! A file-backed certificate authority.
//!
//! Layout below the CA directory:
//!
//! ```text
//! ca/key.pem  ca/cert.pem  server/key.pem  server/cert.pem
//! ```

use super::CertSummary;
use super::CertificateAuthority;
use super::KeyCert;
use super::PemFile;
use super::read_pem_file;
use crate::Error;
use crate::Result;
use rcgen::BasicConstraints;
use rcgen::CertificateParams;
use rcgen::DistinguishedName;
use rcgen::DnType;
use rcgen::DnValue;
use rcgen::ExtendedKeyUsagePurpose;
use rcgen::IsCa;
use rcgen::Issuer;
use rcgen::KeyPair;
use rcgen::KeyUsagePurpose;
use rcgen::SanType;
use rcgen::string::Ia5String;
use slog::Logger;
use slog::info;
use slog::warn;
use std::collections::BTreeSet;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::path::PathBuf;
use time::Duration;
use time::OffsetDateTime;
use vpngw_api::DomainName;

pub const DEFAULT_CA_DIR: &str = "/data/internal_ca";

const CA_COMMON_NAME: &str = "VPN Root CA";
const ORGANIZATION: &str = "VPN Gateway";
const CA_LIFETIME: Duration = Duration::days(10 * 365);
const SERVER_LIFETIME: Duration = Duration::days(2 * 365);

/// Server certificates expiring within this window are reissued.
pub const RENEWAL_WINDOW: Duration = Duration::days(30);

/// The IKE intermediate extended key usage, 1.3.6.1.5.5.8.2.2. Some
/// clients refuse server certificates without it.
const IKE_INTERMEDIATE_OID: [u64; 9] = [1, 3, 6, 1, 5, 5, 8, 2, 2];

fn issuance(what: &str, e: impl std::fmt::Display) -> Error {
    Error::PkiIssuanceFailure(format!("{what}: {e}"))
}

/// A CA keeping its material as PEM files in a directory.
pub struct FileCa {
    dir: PathBuf,
    log: Logger,
}

impl FileCa {
    pub fn new(dir: impl Into<PathBuf>, log: &Logger) -> Self {
        Self { dir: dir.into(), log: log.clone() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn ca_paths(&self) -> (PathBuf, PathBuf) {
        (self.dir.join("ca/key.pem"), self.dir.join("ca/cert.pem"))
    }

    fn server_paths(&self) -> (PathBuf, PathBuf) {
        (self.dir.join("server/key.pem"), self.dir.join("server/cert.pem"))
    }

    /// Load a stored key pair, if both halves exist and parse.
    fn load(&self, key_path: &Path, cert_path: &Path) -> Option<KeyCert> {
        if !key_path.exists() || !cert_path.exists() {
            return None;
        }

        let loaded = read_pem_file(key_path).and_then(|key| {
            read_pem_file(cert_path).map(|cert| KeyCert { key, cert })
        });

        let kc = match loaded {
            Ok(kc) => kc,
            Err(e) => {
                warn!(self.log, "ignoring unreadable key material";
                    "path" => %cert_path.display(),
                    "error" => %e,
                );
                return None;
            }
        };

        if let Err(e) = KeyPair::from_pem(&kc.key.pem) {
            warn!(self.log, "ignoring unparsable private key";
                "path" => %key_path.display(),
                "error" => %e,
            );
            return None;
        }

        if let Err(e) = CertSummary::from_pem(&kc.cert.pem) {
            warn!(self.log, "ignoring unparsable certificate";
                "path" => %cert_path.display(),
                "error" => %e,
            );
            return None;
        }

        Some(kc)
    }

    fn store(
        &self,
        key_path: &Path,
        key_pem: String,
        cert_path: &Path,
        cert_pem: String,
    ) -> Result<KeyCert> {
        for path in [key_path, cert_path] {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| {
                    Error::io(format!("create {}", parent.display()), e)
                })?;
            }
        }

        fs::write(key_path, &key_pem).map_err(|e| {
            Error::io(format!("write {}", key_path.display()), e)
        })?;
        fs::set_permissions(key_path, fs::Permissions::from_mode(0o600))
            .map_err(|e| {
                Error::io(format!("chmod {}", key_path.display()), e)
            })?;
        fs::write(cert_path, &cert_pem).map_err(|e| {
            Error::io(format!("write {}", cert_path.display()), e)
        })?;

        Ok(KeyCert {
            key: PemFile::new(key_path, key_pem),
            cert: PemFile::new(cert_path, cert_pem),
        })
    }

    fn create_ca(&self) -> Result<KeyCert> {
        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String(CA_COMMON_NAME.into()));
        dn.push(
            DnType::OrganizationName,
            DnValue::Utf8String(ORGANIZATION.into()),
        );
        params.distinguished_name = dn;

        params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let now = OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + CA_LIFETIME;

        let key_pair = KeyPair::generate()
            .map_err(|e| issuance("failed to generate CA key", e))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| issuance("failed to create CA certificate", e))?;

        let (key_path, cert_path) = self.ca_paths();
        self.store(&key_path, key_pair.serialize_pem(), &cert_path, cert.pem())
    }

    fn issue_server(
        &self,
        ca: &KeyCert,
        sans: &[DomainName],
    ) -> Result<KeyCert> {
        let first = sans.first().ok_or_else(|| {
            Error::PkiIssuanceFailure(
                "a server certificate needs at least one hostname".to_string(),
            )
        })?;

        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String(first.to_string()));
        dn.push(
            DnType::OrganizationName,
            DnValue::Utf8String(ORGANIZATION.into()),
        );
        params.distinguished_name = dn;

        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::Other(IKE_INTERMEDIATE_OID.to_vec()),
        ];

        params.subject_alt_names = sans
            .iter()
            .map(|name| {
                Ia5String::try_from(name.to_string())
                    .map(SanType::DnsName)
                    .map_err(|e| issuance(&format!("bad SAN {name}"), e))
            })
            .collect::<Result<Vec<_>>>()?;

        let now = OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + SERVER_LIFETIME;

        let ca_key = KeyPair::from_pem(&ca.key.pem)
            .map_err(|e| issuance("failed to load CA key", e))?;
        let issuer = Issuer::from_ca_cert_pem(&ca.cert.pem, ca_key)
            .map_err(|e| issuance("failed to load CA certificate", e))?;

        let key_pair = KeyPair::generate()
            .map_err(|e| issuance("failed to generate server key", e))?;
        let cert = params
            .signed_by(&key_pair, &issuer)
            .map_err(|e| issuance("failed to sign server certificate", e))?;

        let (key_path, cert_path) = self.server_paths();
        self.store(&key_path, key_pair.serialize_pem(), &cert_path, cert.pem())
    }

    /// Why a stored server certificate cannot be reused, if it can't.
    fn stale_reason(
        &self,
        ca: &KeyCert,
        server: &KeyCert,
        sans: &[DomainName],
    ) -> Option<String> {
        let (ca_summary, summary) = match (
            CertSummary::from_pem(&ca.cert.pem),
            CertSummary::from_pem(&server.cert.pem),
        ) {
            (Ok(c), Ok(s)) => (c, s),
            (Err(e), _) | (_, Err(e)) => return Some(e),
        };

        if summary.issuer != ca_summary.subject {
            return Some(format!(
                "issued by {} instead of {}",
                summary.issuer, ca_summary.subject
            ));
        }

        let have: BTreeSet<&str> =
            summary.dns_names.iter().map(String::as_str).collect();
        let want: BTreeSet<&str> = sans.iter().map(DomainName::as_str).collect();
        if have != want {
            return Some(format!(
                "DNS names changed from {:?} to {:?}",
                have, want
            ));
        }

        let renew_at = OffsetDateTime::now_utc() + RENEWAL_WINDOW;
        if summary.expires_at <= renew_at.unix_timestamp() {
            return Some(format!("expires {}", summary.not_after));
        }

        None
    }
}

impl CertificateAuthority for FileCa {
    fn get_or_create_ca_material(&self) -> Result<KeyCert> {
        let (key_path, cert_path) = self.ca_paths();

        if let Some(kc) = self.load(&key_path, &cert_path) {
            info!(self.log, "using existing CA";
                "path" => %cert_path.display());
            return Ok(kc);
        }

        info!(self.log, "creating CA"; "dir" => %self.dir.display());
        self.create_ca()
    }

    fn get_or_create_server_material(
        &self,
        sans: &[DomainName],
    ) -> Result<KeyCert> {
        let ca = self.get_or_create_ca_material()?;
        let (key_path, cert_path) = self.server_paths();

        if let Some(server) = self.load(&key_path, &cert_path) {
            match self.stale_reason(&ca, &server, sans) {
                None => {
                    info!(self.log, "using existing server certificate";
                        "path" => %cert_path.display());
                    return Ok(server);
                }

                Some(reason) => {
                    info!(self.log, "reissuing server certificate";
                        "reason" => reason);
                }
            }
        }

        self.issue_server(&ca, sans)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn names(list: &[&str]) -> Vec<DomainName> {
        list.iter().map(|s| s.parse().unwrap()).collect()
    }

    fn logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    #[test]
    fn issues_and_reuses() {
        let dir = tempfile::tempdir().unwrap();
        let ca = FileCa::new(dir.path(), &logger());
        let sans = names(&["vpn.example.com", "vpn2.example.com"]);

        let first = ca.get_or_create_server_material(&sans).unwrap();
        let summary = CertSummary::from_pem(&first.cert.pem).unwrap();
        assert_eq!(summary.dns_names, vec!["vpn.example.com", "vpn2.example.com"]);
        assert!(summary.subject.contains("vpn.example.com"));
        assert!(summary.issuer.contains(CA_COMMON_NAME));

        let mode = fs::metadata(&first.key.path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        // Same names in another order: the certificate is kept.
        let again = ca
            .get_or_create_server_material(&names(&[
                "vpn2.example.com",
                "vpn.example.com",
            ]))
            .unwrap();
        assert_eq!(first, again);
    }

    #[test]
    fn reissues_on_changed_names() {
        let dir = tempfile::tempdir().unwrap();
        let ca = FileCa::new(dir.path(), &logger());

        let first = ca
            .get_or_create_server_material(&names(&["vpn.example.com"]))
            .unwrap();
        let second = ca
            .get_or_create_server_material(&names(&["gw.example.com"]))
            .unwrap();

        assert_ne!(first.cert.pem, second.cert.pem);
        let summary = CertSummary::from_pem(&second.cert.pem).unwrap();
        assert_eq!(summary.dns_names, vec!["gw.example.com"]);
    }

    #[test]
    fn ca_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let ca = FileCa::new(dir.path(), &logger());
        let a = ca.get_or_create_ca_material().unwrap();
        let b = ca.get_or_create_ca_material().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.cert.path, dir.path().join("ca/cert.pem"));
    }

    #[test]
    fn corrupt_ca_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("ca")).unwrap();
        fs::write(dir.path().join("ca/key.pem"), "garbage").unwrap();
        fs::write(dir.path().join("ca/cert.pem"), "garbage").unwrap();

        let ca = FileCa::new(dir.path(), &logger());
        let kc = ca.get_or_create_ca_material().unwrap();
        assert!(CertSummary::from_pem(&kc.cert.pem).is_ok());
    }

    #[test]
    fn no_hostnames() {
        let dir = tempfile::tempdir().unwrap();
        let ca = FileCa::new(dir.path(), &logger());
        assert!(matches!(
            ca.get_or_create_server_material(&[]),
            Err(Error::PkiIssuanceFailure(_))
        ));
    }
}
