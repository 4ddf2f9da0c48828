//! pach-forward - local port forwarding to a Pachyderm cluster
//!
//! Picks a running pod for each service of the cluster, forwards a local
//! port to it over the Kubernetes `portforward` subresource and keeps the
//! tunnels up until interrupted. A pid file keeps a second instance from
//! fighting over the same ports.
//!
//! ## Usage
//!
//! ```bash
//! # Forward every service with default local ports
//! pach-forward forward --namespace pachyderm
//!
//! # Forward only pachd, on a custom port
//! pach-forward forward --service pachd --port 31650
//!
//! # List services and their ports
//! pach-forward services
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

mod cli;
mod config;
mod forward;
mod k8s;
mod utils;

use cli::Args;
use config::{EnvConfig, ForwardConfig};
use forward::{PortForwarder, Service, Sinks};
use utils::{init_logger, wait_for_shutdown, LogLevel};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let env = EnvConfig::load();

    init_logger(LogLevel::from_verbose(
        args.verbose || env.verbose.unwrap_or(false),
    ));

    match args.command {
        cli::Command::Forward(forward_args) => {
            let config_path = args.config.or_else(|| env.config_file.clone());
            let config = ForwardConfig::load_or_default(config_path.as_deref())?.with_env(&env);
            let config = forward_args.apply(config)?;
            port_forward(config).await?;
        }
        cli::Command::Services => {
            list_services();
        }
        cli::Command::Env => {
            config::env::print_env_help();
        }
    }

    Ok(())
}

async fn port_forward(config: ForwardConfig) -> Result<()> {
    let forwarder = PortForwarder::new(&config.namespace, Sinks::stdio())
        .await
        .context("Failed to create port forwarder")?;

    let pidfile = if config.lock {
        let path = config.lock_path()?;
        Some(
            forwarder
                .lock(&path)
                .with_context(|| format!("Failed to lock {}", path.display()))?,
        )
    } else {
        None
    };

    info!(namespace = forwarder.namespace(), "Forwarding ports");

    let result = start_services(&forwarder, &config).await;
    if result.is_ok() {
        info!(tunnels = forwarder.tunnel_count(), "All services forwarded");
        println!("CTRL-C to exit");
        if let Err(e) = wait_for_shutdown().await {
            warn!(error = %e, "Failed to wait for shutdown signal");
        }
    }

    let closed = forwarder.close();
    info!(tunnels = closed, "Port forwarding stopped");

    if let Some(pidfile) = pidfile {
        if let Err(e) = pidfile.remove() {
            warn!(error = %e, "Failed to remove pid file");
        }
    }

    result
}

async fn start_services(forwarder: &PortForwarder, config: &ForwardConfig) -> Result<()> {
    for service in &config.services {
        let local_port = config.ports.get(*service);

        match forwarder.run_service(*service, local_port).await {
            Ok(()) => {}
            Err(e) if service.is_dash() && e.is_no_pods() => {
                warn!("Dash deployment not found, not forwarding {service}");
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to forward {service}"));
            }
        }
    }
    Ok(())
}

fn list_services() {
    println!("\nForwardable services\n");
    println!("  {:16} {:8} {:>8} {:>12}", "SERVICE", "APP", "REMOTE", "LOCAL");
    println!("──────────────────────────────────────────────────");

    for service in Service::all() {
        let spec = service.spec(0);
        println!(
            "  {:16} {:8} {:>8} {:>12}",
            service.name(),
            spec.app,
            spec.remote_port,
            spec.local_port
        );
    }
    println!();
}
