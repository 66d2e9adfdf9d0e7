//! nuo - Node Upgrade Orchestrator.
//!
//! Watches `Cluster` and `Node` resources and rolls worker node plan changes
//! through each cluster under an availability budget.

use std::sync::Arc;

use anyhow::Result;
use kube::CustomResourceExt;
use tracing::{error, info};

use nuo::config::{Command, Config, LogFormat};
use nuo::crd::{Cluster, Node};
use nuo::{controller, telemetry};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    let config = Config::from_args();

    match config.command {
        Some(Command::Version) => {
            println!("nuo {VERSION}");
            return;
        }
        Some(Command::Crd) => {
            match crd_yaml() {
                Ok(yaml) => print!("{yaml}"),
                Err(e) => {
                    eprintln!("Failed to render CRDs: {e}");
                    std::process::exit(1);
                }
            }
            return;
        }
        None => {}
    }

    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {e}");
        std::process::exit(1);
    }

    if let Err(e) = init_tracing(&config) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    info!("Starting nuo v{}", VERSION);

    if let Err(e) = run(config).await {
        error!("Operator failed: {}", e);
        std::process::exit(1);
    }
}

/// Initialize tracing subscriber. `RUST_LOG` overrides the configured level.
fn init_tracing(config: &Config) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| anyhow::anyhow!("Failed to initialize log filter: {e}"))?;

    match config.log_format {
        LogFormat::Json => fmt()
            .with_env_filter(filter)
            .json()
            .with_target(true)
            .init(),
        LogFormat::Pretty => fmt().with_env_filter(filter).with_target(true).init(),
    }

    Ok(())
}

/// Both CRDs as a multi-document YAML stream.
fn crd_yaml() -> Result<String> {
    let cluster = serde_yaml::to_string(&Cluster::crd())?;
    let node = serde_yaml::to_string(&Node::crd())?;
    Ok(format!("---\n{cluster}---\n{node}"))
}

/// Main operator loop.
async fn run(config: Config) -> Result<()> {
    let client = kube::Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let mut registry = prometheus_client::registry::Registry::default();
    let metrics = Arc::new(telemetry::metrics::Metrics::new(&mut registry));
    let registry = Arc::new(registry);

    let health_state = telemetry::health::HealthState::new();
    let health_port = config.health_port;
    let health_state_clone = health_state.clone();
    tokio::spawn(async move {
        if let Err(e) = telemetry::health::serve(health_port, health_state_clone).await {
            error!("Health server failed: {}", e);
        }
    });

    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = telemetry::metrics::serve(metrics_port, registry).await {
            error!("Metrics server failed: {}", e);
        }
    });

    controller::run(
        client,
        metrics,
        health_state,
        config.resync_interval(),
        config.error_requeue(),
    )
    .await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crd_yaml_contains_both_kinds() {
        let yaml = crd_yaml().unwrap();
        assert!(yaml.contains("name: clusters.nuo.io"));
        assert!(yaml.contains("name: nodes.nuo.io"));
        assert!(yaml.contains("kind: Node"));
    }
}
