//! Certificate and private key loading for mTLS party identities.

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::RootCertStore;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::identity::{certificate_identity, CertificateIdentity};

#[derive(Clone)]
enum CertificateSource {
    Files {
        ca_cert_path: PathBuf,
        cert_path: PathBuf,
        key_path: PathBuf,
    },
    Pem {
        ca_cert_pem: String,
        cert_pem: String,
        key_pem: String,
    },
}

/// Loads a party's certificate chain, private key and the shared root CA.
///
/// Material can come from PEM files on disk or from in-memory PEM strings
/// (freshly issued by [`crate::pki::CertificateAuthority`]).
#[derive(Clone)]
pub struct CertificateManager {
    source: CertificateSource,
}

impl CertificateManager {
    /// Create a certificate manager backed by PEM files.
    ///
    /// # Arguments
    /// * `ca_path` - Path to the shared root CA certificate
    /// * `cert_path` - Path to this party's certificate (chain)
    /// * `key_path` - Path to this party's private key
    pub fn new(
        ca_path: impl Into<PathBuf>,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source: CertificateSource::Files {
                ca_cert_path: ca_path.into(),
                cert_path: cert_path.into(),
                key_path: key_path.into(),
            },
        }
    }

    /// Create a certificate manager from PEM text already held in memory.
    pub fn from_pem(
        ca_cert_pem: impl Into<String>,
        cert_pem: impl Into<String>,
        key_pem: impl Into<String>,
    ) -> Self {
        Self {
            source: CertificateSource::Pem {
                ca_cert_pem: ca_cert_pem.into(),
                cert_pem: cert_pem.into(),
                key_pem: key_pem.into(),
            },
        }
    }

    /// Load everything needed for mTLS.
    ///
    /// Returns `(party certificate chain, party private key, CA certificates)`.
    pub fn load_certificates(
        &self,
    ) -> anyhow::Result<(
        Vec<CertificateDer<'static>>,
        PrivateKeyDer<'static>,
        Vec<CertificateDer<'static>>,
    )> {
        debug!("Loading certificates from {}", self.describe());

        let certs = self.load_cert_chain()?;
        let key = self.load_private_key()?;
        let ca_certs = self.load_ca_certs()?;

        info!(
            "Loaded {} party certificate(s) and {} CA certificate(s)",
            certs.len(),
            ca_certs.len()
        );
        Ok((certs, key, ca_certs))
    }

    pub fn load_cert_chain(&self) -> anyhow::Result<Vec<CertificateDer<'static>>> {
        let (bytes, origin) = match &self.source {
            CertificateSource::Files { cert_path, .. } => (read_file(cert_path)?, display(cert_path)),
            CertificateSource::Pem { cert_pem, .. } => {
                (cert_pem.as_bytes().to_vec(), "in-memory certificate".to_string())
            }
        };
        parse_certs(&bytes, &origin)
    }

    pub fn load_ca_certs(&self) -> anyhow::Result<Vec<CertificateDer<'static>>> {
        let (bytes, origin) = match &self.source {
            CertificateSource::Files { ca_cert_path, .. } => {
                (read_file(ca_cert_path)?, display(ca_cert_path))
            }
            CertificateSource::Pem { ca_cert_pem, .. } => {
                (ca_cert_pem.as_bytes().to_vec(), "in-memory CA".to_string())
            }
        };
        parse_certs(&bytes, &origin)
    }

    /// Load the private key. PKCS#8, PKCS#1 and SEC1 encodings are accepted.
    pub fn load_private_key(&self) -> anyhow::Result<PrivateKeyDer<'static>> {
        let (bytes, origin) = match &self.source {
            CertificateSource::Files { key_path, .. } => (read_file(key_path)?, display(key_path)),
            CertificateSource::Pem { key_pem, .. } => {
                (key_pem.as_bytes().to_vec(), "in-memory key".to_string())
            }
        };

        let key = rustls_pemfile::private_key(&mut bytes.as_slice())
            .map_err(|e| anyhow::anyhow!("Failed to parse private key from {}: {}", origin, e))?
            .ok_or_else(|| anyhow::anyhow!("No valid private key found in {}", origin))?;

        debug!("Loaded private key from {}", origin);
        Ok(key)
    }

    /// Root store holding the shared CA, for verifying peers.
    pub fn root_store(&self) -> anyhow::Result<RootCertStore> {
        let mut root_store = RootCertStore::empty();
        for cert in self.load_ca_certs()? {
            root_store
                .add(cert)
                .map_err(|e| anyhow::anyhow!("Failed to add CA certificate to root store: {}", e))?;
        }
        Ok(root_store)
    }

    /// Names carried by this party's own leaf certificate.
    pub fn local_identity(&self) -> anyhow::Result<CertificateIdentity> {
        let certs = self.load_cert_chain()?;
        let leaf = certs
            .first()
            .ok_or_else(|| anyhow::anyhow!("Empty certificate chain"))?;
        certificate_identity(leaf)
    }

    /// Returns true if the party certificate expires within 30 days.
    pub fn verify_certificate_expiry(&self) -> anyhow::Result<bool> {
        use x509_parser::prelude::*;

        let certs = self.load_cert_chain()?;
        let leaf = certs
            .first()
            .ok_or_else(|| anyhow::anyhow!("Empty certificate chain"))?;

        let (_, parsed) = X509Certificate::from_der(leaf.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to parse certificate: {}", e))?;

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)?
            .as_secs() as i64;
        let thirty_days = 30 * 24 * 60 * 60;
        let expires_soon = parsed
            .validity()
            .not_after
            .timestamp()
            .checked_sub(now)
            .map(|secs| secs < thirty_days)
            .unwrap_or(true);

        if expires_soon {
            info!("Certificate from {} expires soon", self.describe());
        }
        Ok(expires_soon)
    }

    fn describe(&self) -> String {
        match &self.source {
            CertificateSource::Files { cert_path, .. } => display(cert_path),
            CertificateSource::Pem { .. } => "in-memory PEM".to_string(),
        }
    }
}

fn read_file(path: &PathBuf) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| anyhow::anyhow!("Failed to open {}: {}", path.display(), e))
}

fn display(path: &PathBuf) -> String {
    path.display().to_string()
}

fn parse_certs(bytes: &[u8], origin: &str) -> anyhow::Result<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut &bytes[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow::anyhow!("Failed to parse certificates from {}: {}", origin, e))?;

    if certs.is_empty() {
        return Err(anyhow::anyhow!("No certificates found in {}", origin));
    }
    Ok(certs)
}
