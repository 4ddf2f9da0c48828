//! Forwarded services
//!
//! Each service pins the app selector, the pod port and the local port used
//! when the caller passes 0.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Services of the cluster that can be forwarded
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Service {
    Daemon,
    SamlAcs,
    DashUi,
    #[serde(rename = "dash-websocket")]
    DashWebSocket,
    Pfs,
}

impl Service {
    /// Get service display name
    pub fn name(&self) -> &'static str {
        match self {
            Service::Daemon => "pachd",
            Service::SamlAcs => "SAML ACS",
            Service::DashUi => "dash UI",
            Service::DashWebSocket => "dash websocket",
            Service::Pfs => "PFS over HTTP",
        }
    }

    /// Value of the `app` label on the service's pods
    pub fn app(&self) -> &'static str {
        match self {
            Service::Daemon | Service::SamlAcs | Service::Pfs => "pachd",
            Service::DashUi | Service::DashWebSocket => "dash",
        }
    }

    /// Port inside the pod
    pub fn remote_port(&self) -> u16 {
        match self {
            Service::Daemon => 650,
            Service::SamlAcs => 654,
            Service::DashUi => 8080,
            Service::DashWebSocket => 8081,
            Service::Pfs => 30652,
        }
    }

    /// Local port used when none is requested
    pub fn default_local_port(&self) -> u16 {
        match self {
            Service::Daemon => 30650,
            Service::SamlAcs => 30654,
            Service::DashUi => 30080,
            Service::DashWebSocket => 30081,
            Service::Pfs => 30652,
        }
    }

    /// Whether the service belongs to the optional dash deployment
    pub fn is_dash(&self) -> bool {
        matches!(self, Service::DashUi | Service::DashWebSocket)
    }

    /// Resolve the forwarding parameters for `local_port`, 0 meaning default
    pub fn spec(&self, local_port: u16) -> ForwardSpec {
        let local_port = if local_port == 0 {
            self.default_local_port()
        } else {
            local_port
        };

        ForwardSpec {
            app: self.app(),
            local_port,
            remote_port: self.remote_port(),
        }
    }

    /// Get all services
    pub fn all() -> Vec<Service> {
        vec![
            Service::Daemon,
            Service::SamlAcs,
            Service::DashUi,
            Service::DashWebSocket,
            Service::Pfs,
        ]
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Service> {
        match s.to_lowercase().as_str() {
            "daemon" | "pachd" => Some(Service::Daemon),
            "saml-acs" | "saml" => Some(Service::SamlAcs),
            "dash-ui" | "ui" => Some(Service::DashUi),
            "dash-websocket" | "websocket" | "ws" => Some(Service::DashWebSocket),
            "pfs" => Some(Service::Pfs),
            _ => None,
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Resolved parameters of one forward
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ForwardSpec {
    pub app: &'static str,
    pub local_port: u16,
    pub remote_port: u16,
}
