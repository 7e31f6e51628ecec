use anyhow::{bail, Context};
use mpc_job::AgreeRandom;
use mpc_network::TransportSettings;
use mpc_types::{ClusterTopology, PartyEntry, RoleId, TopologyError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub parties: Vec<PartyConfig>,
    pub ca_cert_path: String,
    /// Our index when `--party` is not given.
    #[serde(default)]
    pub party_index: Option<u32>,
    #[serde(default = "default_bit_length")]
    pub bit_length: usize,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub transport: TransportSettings,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartyConfig {
    pub index: u32,
    pub name: String,
    pub address: String,
    pub cert_path: String,
    pub key_path: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

fn default_bit_length() -> usize {
    256
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl NodeConfig {
    /// Load a JSON or TOML cluster file, then apply `MPC_*` environment overrides.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .with_context(|| format!("Failed to load config file {}", path.display()))?;

        let mut node_config: NodeConfig = settings
            .try_deserialize()
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        node_config.override_from(|key| std::env::var(key).ok())?;
        Ok(node_config)
    }

    fn override_from<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(index) = lookup("MPC_PARTY_INDEX") {
            self.party_index = Some(
                index
                    .parse()
                    .with_context(|| format!("Invalid MPC_PARTY_INDEX: {}", index))?,
            );
        }

        if let Some(path) = lookup("MPC_CA_CERT_PATH") {
            self.ca_cert_path = path;
        }

        if let Some(bits) = lookup("MPC_BIT_LENGTH") {
            self.bit_length = bits
                .parse()
                .with_context(|| format!("Invalid MPC_BIT_LENGTH: {}", bits))?;
        }

        if let Some(timeout) = lookup("MPC_TIMEOUT_SECONDS") {
            self.timeout_seconds = timeout
                .parse()
                .with_context(|| format!("Invalid MPC_TIMEOUT_SECONDS: {}", timeout))?;
        }

        if let Some(level) = lookup("MPC_LOG_LEVEL") {
            self.log_level = level;
        }

        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.topology()?;
        AgreeRandom::new(self.bit_length)?;

        if self.timeout_seconds == 0 {
            bail!("timeout_seconds cannot be 0");
        }
        if self.ca_cert_path.is_empty() {
            bail!("ca_cert_path cannot be empty");
        }
        for party in &self.parties {
            if party.cert_path.is_empty() || party.key_path.is_empty() {
                bail!("party {} ({}) is missing cert_path or key_path", party.index, party.name);
            }
        }
        if self.transport.queue_depth == 0 {
            bail!("transport.queue_depth cannot be 0");
        }

        Ok(())
    }

    pub fn topology(&self) -> Result<ClusterTopology, TopologyError> {
        ClusterTopology::new(
            self.parties
                .iter()
                .map(|p| PartyEntry::new(p.index, p.name.clone(), p.address.clone()))
                .collect(),
        )
    }

    pub fn party(&self, role: RoleId) -> anyhow::Result<&PartyConfig> {
        self.parties
            .iter()
            .find(|p| p.index == role.0)
            .with_context(|| format!("No party with index {} in config", role))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}
