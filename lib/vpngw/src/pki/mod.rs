// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The gateway's certificate material.
//!
//! In internal mode a [`CertificateAuthority`] owned by the gateway
//! fetches or mints the CA and server key pairs. In external mode the
//! operator drops pre-issued material at fixed paths and the gateway
//! only validates it; no CA key is available in that case.

use crate::Error;
use crate::Result;
use serde::Serialize;
use slog::Logger;
use slog::info;
use std::path::Path;
use std::path::PathBuf;
use vpngw_api::DomainName;
use x509_parser::prelude::FromDer;
use x509_parser::prelude::GeneralName;
use x509_parser::prelude::X509Certificate;

mod ca;
mod external;

pub use ca::DEFAULT_CA_DIR;
pub use ca::FileCa;
pub use external::ExternalPaths;

/// PEM text together with the path it is stored at.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct PemFile {
    pub path: PathBuf,

    #[serde(skip)]
    pub pem: String,
}

impl PemFile {
    pub fn new(path: impl Into<PathBuf>, pem: impl Into<String>) -> Self {
        Self { path: path.into(), pem: pem.into() }
    }
}

/// A private key and the certificate for it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyCert {
    pub key: PemFile,
    pub cert: PemFile,
}

/// Everything the IPsec daemon needs to authenticate itself.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct PkiMaterial {
    /// Absent when the CA is operated externally.
    pub ca_key: Option<PemFile>,
    pub ca_cert: PemFile,
    pub server_key: PemFile,
    pub server_cert: PemFile,
}

/// Where the gateway's certificates come from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PkiMode {
    /// The gateway runs its own CA and issues a server certificate
    /// whose DNS names are exactly `hostnames`.
    Internal { hostnames: Vec<DomainName> },

    /// Pre-issued material is read from `paths`.
    External { paths: ExternalPaths },
}

/// A certificate authority able to provide the gateway's material.
///
/// Implementations own persistence and renewal; callers only ask.
pub trait CertificateAuthority {
    /// Fetch the CA key and certificate, creating them if necessary.
    fn get_or_create_ca_material(&self) -> Result<KeyCert>;

    /// Fetch the server key and a certificate carrying exactly `sans`
    /// as DNS subject alternative names, issuing a new one if
    /// necessary.
    fn get_or_create_server_material(
        &self,
        sans: &[DomainName],
    ) -> Result<KeyCert>;
}

/// Obtain the gateway's PKI material for `mode`.
///
/// `ca` is only consulted in internal mode.
pub fn provision(
    mode: &PkiMode,
    ca: &dyn CertificateAuthority,
    log: &Logger,
) -> Result<PkiMaterial> {
    let material = match mode {
        PkiMode::Internal { hostnames } => {
            let ca_material = ca.get_or_create_ca_material()?;
            let server = ca.get_or_create_server_material(hostnames)?;

            PkiMaterial {
                ca_key: Some(ca_material.key),
                ca_cert: ca_material.cert,
                server_key: server.key,
                server_cert: server.cert,
            }
        }

        PkiMode::External { paths } => external::load(paths)?,
    };

    let summary = CertSummary::from_pem(&material.server_cert.pem)
        .map_err(|e| Error::PkiIssuanceFailure(e.to_string()))?;

    info!(log, "certificate of the VPN server";
        "path" => %material.server_cert.path.display(),
        "subject" => &summary.subject,
        "issuer" => &summary.issuer,
        "serial" => &summary.serial,
        "not_before" => &summary.not_before,
        "not_after" => &summary.not_after,
        "dns_names" => summary.dns_names.join(","),
    );

    Ok(material)
}

/// Decode the first PEM block of `text` into DER.
pub fn parse_pem(text: &str) -> core::result::Result<pem::Pem, String> {
    pem::parse(text.as_bytes()).map_err(|e| format!("failed to parse PEM: {e}"))
}

/// The fields of a certificate worth showing an operator.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CertSummary {
    pub subject: String,
    pub issuer: String,
    pub serial: String,
    pub not_before: String,
    pub not_after: String,

    /// Unix timestamp of `not_after`.
    pub expires_at: i64,

    pub dns_names: Vec<String>,
}

impl CertSummary {
    pub fn from_pem(text: &str) -> core::result::Result<Self, String> {
        let block = parse_pem(text)?;
        if block.tag() != "CERTIFICATE" {
            return Err(format!(
                "expected a CERTIFICATE PEM block, found {}",
                block.tag()
            ));
        }
        Self::from_der(block.contents())
    }

    pub fn from_der(der: &[u8]) -> core::result::Result<Self, String> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| format!("failed to parse certificate: {e}"))?;

        let dns_names = match cert.subject_alternative_name() {
            Ok(Some(ext)) => ext
                .value
                .general_names
                .iter()
                .filter_map(|n| match n {
                    GeneralName::DNSName(name) => Some(name.to_string()),
                    _ => None,
                })
                .collect(),
            Ok(None) => vec![],
            Err(e) => {
                return Err(format!(
                    "bad subject alternative name extension: {e}"
                ));
            }
        };

        Ok(Self {
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            serial: cert.raw_serial_as_string(),
            not_before: cert.validity().not_before.to_string(),
            not_after: cert.validity().not_after.to_string(),
            expires_at: cert.validity().not_after.timestamp(),
            dns_names,
        })
    }
}

pub(crate) fn read_pem_file(path: &Path) -> std::io::Result<PemFile> {
    let pem = std::fs::read_to_string(path)?;
    Ok(PemFile::new(path, pem))
}
