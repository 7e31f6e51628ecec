use crate::config::NodeConfig;
use anyhow::Context;
use mpc_job::{agree_random, multi_agree_random, Job2P, JobMP, JobResult};
use mpc_network::{TlsTransport, TlsTransportConfig, Transport};
use mpc_security::{CertificateAuthority, CertificateManager, MtlsConfig};
use mpc_types::{validate_party_names, ClusterTopology, Role, RoleId};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// One party of a configured cluster.
pub struct MpcNode {
    config: NodeConfig,
    role: RoleId,
    topology: ClusterTopology,
}

impl MpcNode {
    pub fn new(config: NodeConfig, party: Option<u32>) -> anyhow::Result<Self> {
        config.validate()?;

        let role = party
            .or(config.party_index)
            .map(RoleId)
            .context("Party index not set; pass --party or MPC_PARTY_INDEX")?;
        let topology = config.topology()?;
        topology.validate_self(role)?;

        info!("Initializing MPC node");
        info!("  Role: {}", role);
        info!("  Parties: {}", topology.len());
        info!("  Bit length: {}", config.bit_length);
        info!("  Timeout: {}s", config.timeout_seconds);

        Ok(Self {
            config,
            role,
            topology,
        })
    }

    pub fn role(&self) -> RoleId {
        self.role
    }

    fn certificate_manager(&self) -> anyhow::Result<CertificateManager> {
        let party = self.config.party(self.role)?;
        Ok(CertificateManager::new(
            &self.config.ca_cert_path,
            &party.cert_path,
            &party.key_path,
        ))
    }

    /// Establish mTLS connections to every other party.
    pub async fn connect(&self) -> anyhow::Result<TlsTransport> {
        let manager = self.certificate_manager()?;
        if !manager.verify_certificate_expiry()? {
            warn!("Party certificate expires within 30 days");
        }
        let mtls = MtlsConfig::from_manager(&manager, self.config.transport.tls13_only)?;

        let transport = TlsTransport::connect(TlsTransportConfig {
            topology: self.topology.clone(),
            self_role: self.role,
            mtls,
            settings: self.config.transport.clone(),
        })
        .await
        .context("Failed to establish transport")?;
        Ok(transport)
    }

    /// Run agree-random with every other party and return the shared value.
    pub async fn agree_random(&self, bits: usize) -> anyhow::Result<Vec<u8>> {
        let tls = Arc::new(self.connect().await?);
        let transport: Arc<dyn Transport> = tls.clone();
        let names = self.topology.names();
        let timeout = self.config.timeout();

        let outcome = if let [first, second] = names.as_slice() {
            let job = Job2P::new(
                transport,
                Role::try_from(self.role)?,
                [first.clone(), second.clone()],
            )?;
            info!("Job {} started", job.id());
            let outcome = tokio::time::timeout(timeout, agree_random(&job, bits)).await;
            job.close()?;
            outcome
        } else {
            let job = JobMP::new(transport, self.role, names)?;
            info!("Job {} started", job.id());
            let outcome = tokio::time::timeout(timeout, multi_agree_random(&job, bits)).await;
            job.close()?;
            outcome
        };

        // Let queued frames reach the peers before we return.
        tls.shutdown().await;

        let result: JobResult<Vec<u8>> =
            outcome.map_err(|_| anyhow::anyhow!("agree-random timed out after {:?}", timeout))?;
        Ok(result?)
    }
}

/// Write `ca.pem` plus `<name>.pem` / `<name>.key` for each party into `out`.
pub fn generate_certificates(
    out: &Path,
    names: &[String],
    hosts: &[String],
) -> anyhow::Result<Vec<PathBuf>> {
    validate_party_names(names)?;

    let ca = CertificateAuthority::generate("MPC Cluster CA")?;
    let mut written = vec![ca.write_ca_pem(out)?];
    for name in names {
        let issued = ca
            .issue(name, hosts)
            .with_context(|| format!("Failed to issue certificate for {}", name))?;
        let paths = issued.write_pem_files(out)?;
        info!("Issued certificate for {}", name);
        written.push(paths.cert);
        written.push(paths.key);
    }
    Ok(written)
}
