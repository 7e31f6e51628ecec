mod app;
mod cli;
mod config;

use anyhow::Context;
use app::{generate_certificates, MpcNode};
use clap::Parser;
use cli::{Cli, Commands};
use config::{LogFormat, NodeConfig};
use std::path::Path;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        if tracing::dispatcher::has_been_set() {
            error!("Application error: {:#}", e);
        } else {
            eprintln!("Application error: {:#}", e);
        }
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            party,
            config,
            bits,
        } => {
            let config = load_config(&config)?;
            init_tracing(&config.log_level, config.log_format);
            run_node(config, party, bits).await?;
        }
        Commands::GenCerts { out, names, hosts } => {
            init_tracing("info", LogFormat::Plain);
            gen_certs(&out, &names, &hosts)?;
        }
        Commands::Topology { config } => {
            let config = load_config(&config)?;
            init_tracing(&config.log_level, config.log_format);
            show_topology(&config)?;
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<NodeConfig> {
    let config = NodeConfig::load(path)?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    Ok(config)
}

async fn run_node(config: NodeConfig, party: Option<u32>, bits: Option<usize>) -> anyhow::Result<()> {
    let bits = bits.unwrap_or(config.bit_length);
    let node = MpcNode::new(config, party)?;

    info!("===================================");
    info!("MPC node {} joining cluster", node.role());
    info!("===================================");

    let value = node.agree_random(bits).await?;

    info!("Agreed on {} random bits", bits);
    println!("{}", hex::encode(&value));
    Ok(())
}

fn gen_certs(out: &Path, names: &[String], hosts: &[String]) -> anyhow::Result<()> {
    let written = generate_certificates(out, names, hosts)?;

    println!("\nCertificates written to {}", out.display());
    println!("─────────────────────────────────────");
    for path in written {
        println!("  {}", path.display());
    }
    Ok(())
}

fn show_topology(config: &NodeConfig) -> anyhow::Result<()> {
    let topology = config.topology()?;

    println!("\nCluster Topology");
    println!("─────────────────────────────────────");
    println!("  Parties:     {}", topology.len());
    println!("  CA Cert:     {}", config.ca_cert_path);
    println!("  Bit Length:  {}", config.bit_length);
    println!("  Timeout:     {}s", config.timeout_seconds);
    println!();
    for entry in topology.parties() {
        let dials: Vec<String> = topology
            .peers_of(entry.role)
            .filter(|peer| peer.role > entry.role)
            .map(|peer| peer.name.clone())
            .collect();
        println!("  [{}] {:<12} {}", entry.role, entry.name, entry.address);
        if dials.is_empty() {
            println!("      dials:   -");
        } else {
            println!("      dials:   {}", dials.join(", "));
        }
    }
    Ok(())
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    // Logs go to stderr so stdout carries only command output.
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Plain => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}
