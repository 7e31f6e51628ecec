//! Binding authenticated certificates to party names.

use rustls::pki_types::CertificateDer;
use x509_parser::prelude::*;

/// Names a certificate can be bound to: its subject CN and DNS SANs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateIdentity {
    pub common_name: Option<String>,
    pub dns_names: Vec<String>,
}

impl CertificateIdentity {
    /// True if `party_name` is the certificate's primary name.
    ///
    /// Additional SANs are host names shared across parties and never bind.
    pub fn binds(&self, party_name: &str) -> bool {
        self.primary_name() == Some(party_name)
    }

    /// The CN, falling back to the first DNS SAN.
    pub fn primary_name(&self) -> Option<&str> {
        self.common_name
            .as_deref()
            .or_else(|| self.dns_names.first().map(String::as_str))
    }
}

/// Extract the identity names from a DER certificate.
pub fn certificate_identity(cert: &CertificateDer<'_>) -> anyhow::Result<CertificateIdentity> {
    let (_, parsed) = X509Certificate::from_der(cert.as_ref())
        .map_err(|e| anyhow::anyhow!("Failed to parse certificate: {}", e))?;

    let common_name = match parsed.subject().iter_common_name().next() {
        Some(cn) => Some(
            cn.as_str()
                .map_err(|e| anyhow::anyhow!("Failed to extract CN: {}", e))?
                .to_string(),
        ),
        None => None,
    };

    let mut dns_names = Vec::new();
    let san = parsed
        .subject_alternative_name()
        .map_err(|e| anyhow::anyhow!("Failed to parse subjectAltName: {}", e))?;
    if let Some(san) = san {
        for name in &san.value.general_names {
            if let GeneralName::DNSName(dns) = name {
                dns_names.push(dns.to_string());
            }
        }
    }

    Ok(CertificateIdentity {
        common_name,
        dns_names,
    })
}

/// The party name a certificate was issued to.
pub fn party_name_from_certificate(cert: &CertificateDer<'_>) -> anyhow::Result<String> {
    let identity = certificate_identity(cert)?;
    identity
        .primary_name()
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Certificate carries neither a CN nor a DNS name"))
}

/// Check that the peer's leaf certificate is issued to `expected_name`.
pub fn verify_peer_binding(
    peer_certs: &[CertificateDer<'_>],
    expected_name: &str,
) -> anyhow::Result<()> {
    let leaf = peer_certs
        .first()
        .ok_or_else(|| anyhow::anyhow!("Peer presented no certificate"))?;
    let identity = certificate_identity(leaf)?;
    if identity.binds(expected_name) {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "certificate issued to {:?} does not match expected party {}",
            identity.primary_name().unwrap_or("<unnamed>"),
            expected_name
        ))
    }
}
