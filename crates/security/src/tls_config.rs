//! rustls configuration builders for the party mesh.
//!
//! Both sides authenticate: the listener requires a client certificate chained
//! to the cluster CA, and the dialer verifies the listener's chain and its
//! name against the expected party name.

use rustls::crypto::CryptoProvider;
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, ServerConfig, SupportedProtocolVersion};
use std::sync::Arc;
use tracing::{debug, info};

use crate::cert_manager::CertificateManager;

static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn protocol_versions(tls13_only: bool) -> &'static [&'static SupportedProtocolVersion] {
    if tls13_only {
        TLS13_ONLY
    } else {
        rustls::ALL_VERSIONS
    }
}

/// Builder for the accepting side of an mTLS connection.
pub struct ServerConfigBuilder {
    cert_manager: CertificateManager,
    tls13_only: bool,
}

impl ServerConfigBuilder {
    pub fn new(cert_manager: CertificateManager) -> Self {
        Self {
            cert_manager,
            tls13_only: false,
        }
    }

    /// Refuse TLS 1.2 handshakes.
    pub fn tls13_only(mut self, enabled: bool) -> Self {
        self.tls13_only = enabled;
        self
    }

    /// Build a server config that requires and verifies client certificates.
    pub fn build(&self) -> anyhow::Result<ServerConfig> {
        debug!("Building mTLS server configuration");

        let (certs, key, _) = self.cert_manager.load_certificates()?;
        let roots = Arc::new(self.cert_manager.root_store()?);
        let provider = provider();

        let client_verifier = WebPkiClientVerifier::builder_with_provider(roots, provider.clone())
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build client verifier: {}", e))?;

        let config = ServerConfig::builder_with_provider(provider)
            .with_protocol_versions(protocol_versions(self.tls13_only))
            .map_err(|e| anyhow::anyhow!("Unsupported protocol versions: {}", e))?
            .with_client_cert_verifier(client_verifier)
            .with_single_cert(certs, key)
            .map_err(|e| anyhow::anyhow!("Failed to build server config: {}", e))?;

        info!(tls13_only = self.tls13_only, "mTLS server configuration ready");
        Ok(config)
    }
}

/// Builder for the dialing side of an mTLS connection.
pub struct ClientConfigBuilder {
    cert_manager: CertificateManager,
    tls13_only: bool,
}

impl ClientConfigBuilder {
    pub fn new(cert_manager: CertificateManager) -> Self {
        Self {
            cert_manager,
            tls13_only: false,
        }
    }

    pub fn tls13_only(mut self, enabled: bool) -> Self {
        self.tls13_only = enabled;
        self
    }

    /// Build a client config that presents our certificate and verifies the
    /// server against the cluster CA and the `ServerName` given at connect time.
    pub fn build(&self) -> anyhow::Result<ClientConfig> {
        debug!("Building mTLS client configuration");

        let (certs, key, _) = self.cert_manager.load_certificates()?;
        let roots = self.cert_manager.root_store()?;

        let config = ClientConfig::builder_with_provider(provider())
            .with_protocol_versions(protocol_versions(self.tls13_only))
            .map_err(|e| anyhow::anyhow!("Unsupported protocol versions: {}", e))?
            .with_root_certificates(roots)
            .with_client_auth_cert(certs, key)
            .map_err(|e| anyhow::anyhow!("Failed to build client config: {}", e))?;

        info!(tls13_only = self.tls13_only, "mTLS client configuration ready");
        Ok(config)
    }
}

/// Server and client configs for one party, shared by every connection.
#[derive(Clone)]
pub struct MtlsConfig {
    pub server: Arc<ServerConfig>,
    pub client: Arc<ClientConfig>,
}

impl MtlsConfig {
    pub fn from_manager(cert_manager: &CertificateManager, tls13_only: bool) -> anyhow::Result<Self> {
        let server = ServerConfigBuilder::new(cert_manager.clone())
            .tls13_only(tls13_only)
            .build()?;
        let client = ClientConfigBuilder::new(cert_manager.clone())
            .tls13_only(tls13_only)
            .build()?;
        Ok(Self {
            server: Arc::new(server),
            client: Arc::new(client),
        })
    }
}
