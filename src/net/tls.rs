//! Upstream TLS material.
//!
//! Loads a CA bundle and an optional client identity for backends that use a
//! private PKI. Files are parsed with rustls-pemfile first so that a bad file
//! fails at startup with a precise error instead of at the first request.

use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors raised while loading TLS files.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("invalid TLS material: {0}")]
    Invalid(String),
}

/// Trust roots and client identity for one backend.
#[derive(Debug, Clone)]
pub struct UpstreamTls {
    roots: Vec<reqwest::Certificate>,
    identity: Option<reqwest::Identity>,
}

impl UpstreamTls {
    /// Load a CA bundle and, when both paths are given, a client certificate.
    pub fn load(ca_file: &Path, client: Option<(&Path, &Path)>) -> Result<Self, TlsError> {
        let ca_pem = read(ca_file)?;
        count_certs(&ca_pem, ca_file)?;
        let roots = reqwest::Certificate::from_pem_bundle(&ca_pem)
            .map_err(|e| TlsError::Invalid(e.to_string()))?;

        let identity = match client {
            Some((cert_file, key_file)) => Some(load_identity(cert_file, key_file)?),
            None => None,
        };

        Ok(Self { roots, identity })
    }

    pub fn has_client_identity(&self) -> bool {
        self.identity.is_some()
    }

    /// Trust only the loaded roots and present the client identity, if any.
    pub fn apply(&self, mut builder: reqwest::ClientBuilder) -> reqwest::ClientBuilder {
        builder = builder.tls_built_in_root_certs(false);
        for root in &self.roots {
            builder = builder.add_root_certificate(root.clone());
        }
        if let Some(identity) = &self.identity {
            builder = builder.identity(identity.clone());
        }
        builder
    }
}

fn read(path: &Path) -> Result<Vec<u8>, TlsError> {
    fs::read(path).map_err(|source| TlsError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn count_certs(pem: &[u8], path: &Path) -> Result<usize, TlsError> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Invalid(format!("{}: {}", path.display(), e)))?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs.len())
}

fn load_identity(cert_file: &Path, key_file: &Path) -> Result<reqwest::Identity, TlsError> {
    let cert_pem = read(cert_file)?;
    count_certs(&cert_pem, cert_file)?;

    let key_pem = read(key_file)?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_pem.as_slice()))
        .map_err(|e| TlsError::Invalid(format!("{}: {}", key_file.display(), e)))?;
    if key.is_none() {
        return Err(TlsError::NoPrivateKey(key_file.to_path_buf()));
    }

    let mut bundle = cert_pem;
    bundle.push(b'\n');
    bundle.extend_from_slice(&key_pem);
    reqwest::Identity::from_pem(&bundle).map_err(|e| TlsError::Invalid(e.to_string()))
}
