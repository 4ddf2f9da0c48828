//! Configuration module
//!
//! Handles loading and layering configuration: defaults, then the config
//! file, then environment variables, then command-line flags.

pub mod env;
mod file;

pub use env::EnvConfig;
pub use file::{default_config_path, default_lock_path};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::forward::{Service, DEFAULT_NAMESPACE};

/// Forwarder configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardConfig {
    /// Namespace the cluster is deployed in
    pub namespace: String,

    /// Pid file guarding against concurrent forwarders
    pub lock_file: Option<PathBuf>,

    /// Whether to take the pid-file lock at all
    pub lock: bool,

    /// Local ports per service, 0 meaning the service default
    pub ports: PortConfig,

    /// Services to forward
    pub services: Vec<Service>,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            lock_file: None,
            lock: true,
            ports: PortConfig::default(),
            services: Service::all(),
        }
    }
}

impl ForwardConfig {
    /// Apply environment overrides
    pub fn with_env(mut self, env: &EnvConfig) -> Self {
        if let Some(namespace) = &env.namespace {
            self.namespace = namespace.clone();
        }
        if let Some(lock_file) = &env.lock_file {
            self.lock_file = Some(lock_file.clone());
        }
        self
    }

    /// Pid file path, falling back to `~/.pachyderm/port-forward.pid`
    pub fn lock_path(&self) -> anyhow::Result<PathBuf> {
        match &self.lock_file {
            Some(path) => Ok(path.clone()),
            None => default_lock_path(),
        }
    }
}

/// Local port per forwarded service
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    pub pachd: u16,
    pub saml_acs: u16,
    pub dash_ui: u16,
    pub dash_websocket: u16,
    pub pfs: u16,
}

impl PortConfig {
    /// Configured local port for `service`
    pub fn get(&self, service: Service) -> u16 {
        match service {
            Service::Daemon => self.pachd,
            Service::SamlAcs => self.saml_acs,
            Service::DashUi => self.dash_ui,
            Service::DashWebSocket => self.dash_websocket,
            Service::Pfs => self.pfs,
        }
    }

    /// Override the port for `service` when `port` is set
    pub fn set(&mut self, service: Service, port: Option<u16>) {
        let Some(port) = port else {
            return;
        };
        let slot = match service {
            Service::Daemon => &mut self.pachd,
            Service::SamlAcs => &mut self.saml_acs,
            Service::DashUi => &mut self.dash_ui,
            Service::DashWebSocket => &mut self.dash_websocket,
            Service::Pfs => &mut self.pfs,
        };
        *slot = port;
    }
}
