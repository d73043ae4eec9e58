// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Externally issued certificate material.

use super::CertSummary;
use super::PemFile;
use super::PkiMaterial;
use super::parse_pem;
use super::read_pem_file;
use crate::Error;
use crate::Result;
use std::path::Path;
use std::path::PathBuf;

pub const DEFAULT_CA_CERT: &str = "/data/external_ca/ca-cert.pem";
pub const DEFAULT_SERVER_CERT: &str = "/data/external_ca/server/cert.pem";
pub const DEFAULT_SERVER_KEY: &str = "/data/external_ca/server/key.pem";

/// Where the operator places externally issued material.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExternalPaths {
    pub ca_cert: PathBuf,
    pub server_cert: PathBuf,
    pub server_key: PathBuf,
}

impl Default for ExternalPaths {
    fn default() -> Self {
        Self {
            ca_cert: DEFAULT_CA_CERT.into(),
            server_cert: DEFAULT_SERVER_CERT.into(),
            server_key: DEFAULT_SERVER_KEY.into(),
        }
    }
}

impl ExternalPaths {
    /// The default layout relocated below `dir`.
    pub fn under(dir: &Path) -> Self {
        Self {
            ca_cert: dir.join("ca-cert.pem"),
            server_cert: dir.join("server/cert.pem"),
            server_key: dir.join("server/key.pem"),
        }
    }
}

fn missing(path: &Path, reason: impl Into<String>) -> Error {
    Error::MissingExternalPki {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn load_cert(path: &Path) -> Result<PemFile> {
    let file = read_pem_file(path).map_err(|e| missing(path, e.to_string()))?;
    CertSummary::from_pem(&file.pem).map_err(|e| missing(path, e))?;
    Ok(file)
}

fn load_key(path: &Path) -> Result<PemFile> {
    let file = read_pem_file(path).map_err(|e| missing(path, e.to_string()))?;
    let block = parse_pem(&file.pem).map_err(|e| missing(path, e))?;

    if !block.tag().ends_with("PRIVATE KEY") {
        return Err(missing(
            path,
            format!("expected a private key PEM block, found {}", block.tag()),
        ));
    }

    Ok(file)
}

/// Read and validate externally issued material.
pub(crate) fn load(paths: &ExternalPaths) -> Result<PkiMaterial> {
    Ok(PkiMaterial {
        ca_key: None,
        ca_cert: load_cert(&paths.ca_cert)?,
        server_key: load_key(&paths.server_key)?,
        server_cert: load_cert(&paths.server_cert)?,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pki::CertificateAuthority;
    use crate::pki::FileCa;
    use std::fs;

    fn issue_into(dir: &Path) -> ExternalPaths {
        let log = slog::Logger::root(slog::Discard, slog::o!());
        let ca = FileCa::new(dir.join("issuer"), &log);
        let server = ca
            .get_or_create_server_material(&["vpn.example.com".parse().unwrap()])
            .unwrap();
        let ca = ca.get_or_create_ca_material().unwrap();

        let paths = ExternalPaths::under(&dir.join("external"));
        fs::create_dir_all(paths.server_cert.parent().unwrap()).unwrap();
        fs::write(&paths.ca_cert, &ca.cert.pem).unwrap();
        fs::write(&paths.server_cert, &server.cert.pem).unwrap();
        fs::write(&paths.server_key, &server.key.pem).unwrap();
        paths
    }

    #[test]
    fn loads_valid_material() {
        let dir = tempfile::tempdir().unwrap();
        let paths = issue_into(dir.path());
        let material = load(&paths).unwrap();
        assert!(material.ca_key.is_none());
        assert_eq!(material.server_cert.path, paths.server_cert);
    }

    #[test]
    fn missing_file_is_named() {
        let dir = tempfile::tempdir().unwrap();
        let paths = issue_into(dir.path());
        fs::remove_file(&paths.server_key).unwrap();

        match load(&paths) {
            Err(Error::MissingExternalPki { path, .. }) => {
                assert_eq!(path, paths.server_key)
            }
            res => panic!("unexpected {res:?}"),
        }
    }

    #[test]
    fn key_in_place_of_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let paths = issue_into(dir.path());
        let key = fs::read_to_string(&paths.server_key).unwrap();
        fs::write(&paths.ca_cert, key).unwrap();

        assert!(matches!(
            load(&paths),
            Err(Error::MissingExternalPki { path, .. }) if path == paths.ca_cert
        ));
    }

    #[test]
    fn default_layout() {
        let paths = ExternalPaths::default();
        assert_eq!(paths, ExternalPaths::under(Path::new("/data/external_ca")));
    }
}
