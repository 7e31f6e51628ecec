//! Throwaway certificate authority for provisioning a cluster.
//!
//! ```text
//! Cluster CA (self-signed)
//!     ├── p0 (CN=p0, SAN=p0 + hostnames)
//!     ├── p1
//!     └── ...
//! ```
//!
//! Every party certificate carries its party name as both CN and DNS SAN, so
//! dialers can verify the server by name and listeners can bind the client
//! certificate to the role it claims.

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, SanType,
};
use rustls::pki_types::CertificateDer;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

use crate::cert_manager::CertificateManager;

const DEFAULT_VALIDITY_DAYS: u64 = 365;
const ORG_NAME: &str = "MPC Cluster";

pub struct CertificateAuthority {
    cert: Certificate,
    key_pair: KeyPair,
}

impl CertificateAuthority {
    pub fn generate(common_name: &str) -> anyhow::Result<Self> {
        info!("Generating cluster CA {}", common_name);

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name);
        dn.push(DnType::OrganizationName, ORG_NAME);
        params.distinguished_name = dn;

        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        set_validity(&mut params);

        let key_pair = KeyPair::generate()
            .map_err(|e| anyhow::anyhow!("Failed to generate CA key pair: {}", e))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| anyhow::anyhow!("Failed to self-sign CA certificate: {}", e))?;

        Ok(Self { cert, key_pair })
    }

    pub fn cert_pem(&self) -> String {
        self.cert.pem()
    }

    pub fn cert_der(&self) -> CertificateDer<'static> {
        self.cert.der().clone()
    }

    /// Issue a certificate for `party_name`, valid for TLS client and server auth.
    ///
    /// `hostnames` are extra SANs; entries that parse as IP addresses become IP SANs.
    pub fn issue(&self, party_name: &str, hostnames: &[String]) -> anyhow::Result<IssuedCertificate> {
        debug!("Issuing certificate for party {}", party_name);

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, party_name);
        dn.push(DnType::OrganizationName, ORG_NAME);
        params.distinguished_name = dn;

        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];

        params.subject_alt_names.push(dns_san(party_name)?);
        for hostname in hostnames.iter().filter(|h| h.as_str() != party_name) {
            match hostname.parse::<std::net::IpAddr>() {
                Ok(ip) => params.subject_alt_names.push(SanType::IpAddress(ip)),
                Err(_) => params.subject_alt_names.push(dns_san(hostname)?),
            }
        }
        set_validity(&mut params);

        let key_pair = KeyPair::generate()
            .map_err(|e| anyhow::anyhow!("Failed to generate key pair for {}: {}", party_name, e))?;
        let cert = params
            .signed_by(&key_pair, &self.cert, &self.key_pair)
            .map_err(|e| anyhow::anyhow!("Failed to sign certificate for {}: {}", party_name, e))?;

        Ok(IssuedCertificate {
            party_name: party_name.to_string(),
            cert_pem: cert.pem(),
            key_pem: key_pair.serialize_pem(),
            ca_cert_pem: self.cert.pem(),
            cert_der: cert.der().clone(),
        })
    }

    pub fn write_ca_pem(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join("ca.pem");
        std::fs::write(&path, self.cert_pem())?;
        Ok(path)
    }
}

/// A CA-signed party certificate with its private key.
pub struct IssuedCertificate {
    pub party_name: String,
    pub cert_pem: String,
    pub key_pem: String,
    pub ca_cert_pem: String,
    cert_der: CertificateDer<'static>,
}

#[derive(Debug, Clone)]
pub struct PemPaths {
    pub ca_cert: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl IssuedCertificate {
    pub fn cert_der(&self) -> CertificateDer<'static> {
        self.cert_der.clone()
    }

    pub fn certificate_manager(&self) -> CertificateManager {
        CertificateManager::from_pem(&self.ca_cert_pem, &self.cert_pem, &self.key_pem)
    }

    /// Write `ca.pem`, `<name>.pem` and `<name>.key` into `dir`.
    pub fn write_pem_files(&self, dir: &Path) -> anyhow::Result<PemPaths> {
        std::fs::create_dir_all(dir)?;
        let paths = PemPaths {
            ca_cert: dir.join("ca.pem"),
            cert: dir.join(format!("{}.pem", self.party_name)),
            key: dir.join(format!("{}.key", self.party_name)),
        };
        std::fs::write(&paths.ca_cert, &self.ca_cert_pem)?;
        std::fs::write(&paths.cert, &self.cert_pem)?;
        std::fs::write(&paths.key, &self.key_pem)?;
        Ok(paths)
    }
}

fn dns_san(name: &str) -> anyhow::Result<SanType> {
    let dns = rcgen::Ia5String::try_from(name.to_string())
        .map_err(|e| anyhow::anyhow!("Invalid DNS name {}: {:?}", name, e))?;
    Ok(SanType::DnsName(dns))
}

fn set_validity(params: &mut CertificateParams) {
    let now = SystemTime::now();
    // Backdated an hour to tolerate clock skew between hosts.
    params.not_before = (now - Duration::from_secs(60 * 60)).into();
    params.not_after = (now + Duration::from_secs(DEFAULT_VALIDITY_DAYS * 24 * 60 * 60)).into();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_writes_loadable_files() {
        let ca = CertificateAuthority::generate("test-ca").unwrap();
        let issued = ca
            .issue("p0", &["localhost".to_string(), "127.0.0.1".to_string()])
            .unwrap();

        assert!(issued.cert_pem.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(issued.key_pem.contains("PRIVATE KEY"));
        assert_eq!(issued.ca_cert_pem, ca.cert_pem());

        let dir = tempfile::tempdir().unwrap();
        let paths = issued.write_pem_files(dir.path()).unwrap();
        assert!(paths.cert.ends_with("p0.pem"));
        assert!(paths.key.exists());
        assert_eq!(ca.write_ca_pem(dir.path()).unwrap(), paths.ca_cert);
    }

    #[test]
    fn test_rejects_invalid_dns_name() {
        let ca = CertificateAuthority::generate("test-ca").unwrap();
        assert!(ca.issue("p\u{e9}", &[]).is_err());
    }
}
