//! Certificate handling and mTLS configuration for MPC party connections.
//!
//! - [`CertificateManager`]: loads the party certificate, key and cluster CA
//! - [`ServerConfigBuilder`] / [`ClientConfigBuilder`]: mutual TLS configs
//! - [`identity`]: binds a peer certificate to a party name
//! - [`pki`]: generates a cluster CA and party certificates

pub mod cert_manager;
pub mod identity;
pub mod pki;
pub mod tls_config;

pub use cert_manager::CertificateManager;
pub use identity::{
    certificate_identity, party_name_from_certificate, verify_peer_binding, CertificateIdentity,
};
pub use pki::{CertificateAuthority, IssuedCertificate, PemPaths};
pub use tls_config::{ClientConfigBuilder, MtlsConfig, ServerConfigBuilder};
