use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mpc-node")]
#[command(version, about = "mTLS transport node for multi-party computation jobs", long_about = None)]
#[command(author = "MPC Wallet Team")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Join the cluster and agree on a shared random value
    Run {
        #[arg(short, long, help = "Our party index (overrides MPC_PARTY_INDEX)")]
        party: Option<u32>,

        #[arg(short, long, help = "Cluster config file (JSON or TOML)")]
        config: PathBuf,

        #[arg(short, long, help = "Output length in bits (overrides bit_length)")]
        bits: Option<usize>,
    },

    /// Generate a CA and one certificate per party
    GenCerts {
        #[arg(short, long, help = "Output directory")]
        out: PathBuf,

        #[arg(short, long, value_delimiter = ',', required = true, help = "Comma-separated party names")]
        names: Vec<String>,

        #[arg(long, value_delimiter = ',', default_value = "localhost", help = "Extra DNS names for every certificate")]
        hosts: Vec<String>,
    },

    /// Validate a cluster config and print its topology
    Topology {
        #[arg(short, long, help = "Cluster config file (JSON or TOML)")]
        config: PathBuf,
    },
}
