//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::ForwardConfig;
use crate::forward::Service;

/// Port-forwarding helper for Pachyderm clusters
#[derive(Parser, Debug)]
#[command(name = "pach-forward")]
#[command(version)]
#[command(about = "Forward local ports to the pods of a Pachyderm cluster")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (YAML or JSON)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Forward local ports to the cluster until interrupted
    Forward(ForwardArgs),

    /// List forwardable services and their ports
    Services,

    /// Show supported environment variables
    Env,
}

/// Arguments for forward command
#[derive(Parser, Debug, Default)]
pub struct ForwardArgs {
    /// Kubernetes namespace the cluster is deployed in
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Local port for pachd
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Local port for SAML ACS
    #[arg(long)]
    pub saml_port: Option<u16>,

    /// Local port for the dash UI
    #[arg(short, long)]
    pub ui_port: Option<u16>,

    /// Local port for the dash websocket
    #[arg(short = 'x', long)]
    pub proxy_port: Option<u16>,

    /// Local port for PFS over HTTP
    #[arg(short = 'f', long)]
    pub pfs_port: Option<u16>,

    /// Services to forward (comma-separated; default all)
    #[arg(short, long, value_delimiter = ',')]
    pub service: Vec<String>,

    /// Pid file guarding against concurrent forwarders
    #[arg(long)]
    pub lock_file: Option<PathBuf>,

    /// Skip the single-instance lock
    #[arg(long)]
    pub no_lock: bool,
}

impl ForwardArgs {
    /// Apply command-line overrides on top of `config`
    pub fn apply(self, mut config: ForwardConfig) -> Result<ForwardConfig> {
        if let Some(namespace) = self.namespace {
            config.namespace = namespace;
        }
        if let Some(lock_file) = self.lock_file {
            config.lock_file = Some(lock_file);
        }
        if self.no_lock {
            config.lock = false;
        }

        config.ports.set(Service::Daemon, self.port);
        config.ports.set(Service::SamlAcs, self.saml_port);
        config.ports.set(Service::DashUi, self.ui_port);
        config.ports.set(Service::DashWebSocket, self.proxy_port);
        config.ports.set(Service::Pfs, self.pfs_port);

        if !self.service.is_empty() {
            config.services = self
                .service
                .iter()
                .map(|name| {
                    Service::from_str(name)
                        .ok_or_else(|| anyhow::anyhow!("Unknown service: {name}"))
                })
                .collect::<Result<_>>()?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        let args = Args::parse_from(["pach-forward", "services", "--verbose"]);
        assert!(args.verbose);
        assert!(matches!(args.command, Command::Services));
    }

    #[test]
    fn test_forward_args() {
        let args = Args::parse_from([
            "pach-forward",
            "forward",
            "--namespace",
            "pachyderm",
            "-p",
            "31650",
            "--service",
            "pachd,ui",
            "--no-lock",
        ]);
        match args.command {
            Command::Forward(forward) => {
                let config = forward.apply(ForwardConfig::default()).unwrap();
                assert_eq!(config.namespace, "pachyderm");
                assert_eq!(config.ports.get(Service::Daemon), 31650);
                assert_eq!(config.ports.get(Service::DashUi), 0);
                assert_eq!(config.services, vec![Service::Daemon, Service::DashUi]);
                assert!(!config.lock);
            }
            _ => panic!("Expected Forward command"),
        }
    }

    #[test]
    fn test_flags_override_config() {
        let mut config = ForwardConfig::default();
        config.namespace = "from-file".to_string();
        config.ports.set(Service::Pfs, Some(4652));

        let args = ForwardArgs {
            ui_port: Some(4080),
            ..Default::default()
        };
        let config = args.apply(config).unwrap();

        assert_eq!(config.namespace, "from-file");
        assert_eq!(config.ports.get(Service::Pfs), 4652);
        assert_eq!(config.ports.get(Service::DashUi), 4080);
        assert!(config.lock);
    }

    #[test]
    fn test_unknown_service() {
        let args = ForwardArgs {
            service: vec!["grafana".to_string()],
            ..Default::default()
        };
        let err = args.apply(ForwardConfig::default()).unwrap_err();
        assert_eq!(err.to_string(), "Unknown service: grafana");
    }
}
