// src/config/cli.rs
use super::Config;
use clap::Parser;
use std::path::PathBuf;
use url::Url;

/// Command-line interface for the load balancer.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "rotor-lb")]
#[command(about = "Round-robin TCP-health-checked HTTP load balancer")]
#[command(version)]
pub struct Cli {
    /// Path to a YAML or JSON configuration file
    #[arg(short, long, env = "ROTOR_LB_CONFIG")]
    pub config: Option<PathBuf>,

    /// Backend URLs, comma separated. Replaces the backends from the file.
    #[arg(short, long, value_delimiter = ',')]
    pub backends: Vec<Url>,

    /// Port to serve on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Seconds between health check rounds
    #[arg(long)]
    pub check_interval: Option<u64>,

    /// Validate config and exit
    #[arg(long)]
    pub check: bool,
}

impl Cli {
    pub fn apply(&self, config: &mut Config) {
        if !self.backends.is_empty() {
            config.backends = self.backends.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(secs) = self.check_interval {
            config.health_check.interval_secs = secs;
        }
    }
}
