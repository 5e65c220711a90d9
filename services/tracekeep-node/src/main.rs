use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tracekeep_core::{logging, Config, KEYSTORE_PASSWORD_ENV};
use tracekeep_keystore::{provision_keystore, KdfParams};
use tracekeep_scoring::RiskScoringEngine;
use tracing::info;

mod cli;
mod node;

use cli::{Cli, Command};
use node::{Node, Scoring};

const NODE_PROTOCOL_VERSION: u32 = 1;
const NODE_RUNTIME_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct NodeVersionHandshake {
    version: &'static str,
    runtime_version: u32,
    protocol_version: u32,
}

#[derive(Debug, Serialize)]
struct CacheStatus {
    provider: String,
    keys: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Cli { config, command } = cli::parse_args(&args)?;

    let config = config
        .map(|path| {
            Config::from_file(&path).with_context(|| format!("loading {}", path.display()))
        })
        .transpose()?;
    match &config {
        Some(config) => logging::init_with(&config.logging),
        // stdout carries only the handshake line
        None if command == Command::VersionJson => {}
        None => logging::init(),
    }

    match command {
        Command::Serve => {
            let config = config.context("serve requires --config")?;
            let node = Arc::new(Node::build(config)?);
            node.serve().await
        }
        Command::CacheStatus => {
            let config = config.context("cache-status requires --config")?;
            let node = Node::build(config)?;
            let status = CacheStatus {
                provider: node.store().provider().name,
                keys: node.store().hsm_cache_status(),
            };
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Command::Provision { out, from, days } => {
            let password = match &config {
                Some(config) => config.keystore.resolve_password()?,
                None => std::env::var(KEYSTORE_PASSWORD_ENV)
                    .with_context(|| format!("{} is not set", KEYSTORE_PASSWORD_ENV))?,
            };
            let written = provision_keystore(&out, &password, from, days, KdfParams::default())
                .with_context(|| format!("writing {}", out.display()))?;
            info!(path = %out.display(), keys = written.len(), "Keystore provisioned");
            Ok(())
        }
        Command::Resolve {
            venue_type,
            category1,
            category2,
        } => {
            let config = config.context("resolve requires --config")?;
            let scoring = Scoring::from_config(&config.scoring)?;
            let resolved = scoring.resolve(venue_type, category1, category2);
            println!("{}", serde_json::to_string_pretty(&resolved)?);
            Ok(())
        }
        Command::Proximity {
            latest_risk_epoch,
            exposures,
        } => {
            let config = config.context("proximity requires --config")?;
            let scoring = Scoring::from_config(&config.scoring)?;
            let rule = scoring
                .proximity
                .context("proximity requires a [scoring.proximity] section")?;
            let verdict =
                RiskScoringEngine::new().score_proximity(&rule, &exposures, latest_risk_epoch);
            println!("{}", serde_json::to_string_pretty(&verdict)?);
            Ok(())
        }
        Command::VersionJson => print_version_handshake(),
    }
}

fn print_version_handshake() -> Result<()> {
    let handshake = NodeVersionHandshake {
        version: env!("CARGO_PKG_VERSION"),
        runtime_version: NODE_RUNTIME_VERSION,
        protocol_version: NODE_PROTOCOL_VERSION,
    };
    println!("{}", serde_json::to_string(&handshake)?);
    Ok(())
}
