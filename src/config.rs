//! Command-line and environment configuration.

use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

// ============================================
// Environment variable name constants
// ============================================
pub mod env {
    pub const LOG_FORMAT: &str = "LOG_FORMAT";
    pub const LOG_LEVEL: &str = "LOG_LEVEL";
    pub const HEALTH_PORT: &str = "HEALTH_PORT";
    pub const METRICS_PORT: &str = "METRICS_PORT";
    pub const RESYNC_INTERVAL_SECS: &str = "RESYNC_INTERVAL_SECS";
    pub const ERROR_REQUEUE_SECS: &str = "ERROR_REQUEUE_SECS";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print the Cluster and Node CustomResourceDefinitions as YAML
    Crd,
    /// Show version information
    Version,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "nuo",
    version,
    about = "Node Upgrade Orchestrator",
    long_about = "A Kubernetes operator that rolls new worker node plans across managed clusters without taking more nodes out of service than each cluster's budget allows."
)]
pub struct Config {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Log format: json or pretty
    #[arg(long, env = env::LOG_FORMAT, value_enum, default_value = "json")]
    pub log_format: LogFormat,

    /// Log level: trace, debug, info, warn, error (RUST_LOG takes precedence)
    #[arg(long, env = env::LOG_LEVEL, default_value = "info")]
    pub log_level: String,

    /// Health check server port
    #[arg(long, env = env::HEALTH_PORT, default_value = "8080")]
    pub health_port: u16,

    /// Prometheus metrics server port
    #[arg(long, env = env::METRICS_PORT, default_value = "8081")]
    pub metrics_port: u16,

    /// Seconds between periodic cluster resyncs
    #[arg(long, env = env::RESYNC_INTERVAL_SECS, default_value = "30")]
    pub resync_interval_secs: u64,

    /// Seconds before retrying a failed reconcile
    #[arg(long, env = env::ERROR_REQUEUE_SECS, default_value = "10")]
    pub error_requeue_secs: u64,
}

impl Config {
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Validate values clap cannot check on its own.
    pub fn validate(&self) -> Result<(), String> {
        if self.resync_interval_secs == 0 {
            return Err("RESYNC_INTERVAL_SECS must be greater than 0".to_string());
        }
        if self.error_requeue_secs == 0 {
            return Err("ERROR_REQUEUE_SECS must be greater than 0".to_string());
        }
        if self.health_port == self.metrics_port {
            return Err("HEALTH_PORT and METRICS_PORT must differ".to_string());
        }
        Ok(())
    }

    pub const fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub const fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_config() -> Config {
        Config::parse_from(["nuo"])
    }

    #[test]
    fn test_defaults() {
        let config = default_config();
        assert_eq!(config.command, None);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.health_port, 8080);
        assert_eq!(config.metrics_port, 8081);
        assert_eq!(config.resync_interval(), Duration::from_secs(30));
        assert_eq!(config.error_requeue(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_subcommands() {
        let config = Config::parse_from(["nuo", "crd"]);
        assert_eq!(config.command, Some(Command::Crd));
        let config = Config::parse_from(["nuo", "version"]);
        assert_eq!(config.command, Some(Command::Version));
    }

    #[test]
    fn test_flags() {
        let config = Config::parse_from([
            "nuo",
            "--log-format",
            "pretty",
            "--resync-interval-secs",
            "5",
        ]);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.resync_interval_secs, 5);
    }

    #[test]
    fn test_validate_zero_resync() {
        let mut config = default_config();
        config.resync_interval_secs = 0;
        assert_eq!(
            config.validate().unwrap_err(),
            "RESYNC_INTERVAL_SECS must be greater than 0"
        );
    }

    #[test]
    fn test_validate_port_clash() {
        let mut config = default_config();
        config.metrics_port = config.health_port;
        assert!(config.validate().is_err());
    }
}
