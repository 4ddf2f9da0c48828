//! Forwarder errors

use std::io;
use thiserror::Error;

use crate::k8s::ClusterError;
use crate::utils::PidFileError;

/// Port forwarder errors
#[derive(Error, Debug)]
pub enum ForwardError {
    #[error(transparent)]
    Config(#[from] ClusterError),

    #[error("failed to list pods for app {app}: {source}")]
    Discovery {
        app: String,
        #[source]
        source: kube::Error,
    },

    #[error("No pods found for app {0}")]
    NoPods(String),

    #[error("failed to build transport for {target}: {source}")]
    Transport {
        target: String,
        #[source]
        source: kube::Error,
    },

    #[error("port forwarding failed: {0}")]
    Forward(#[source] TunnelError),

    #[error("port forwarder is shutdown")]
    AlreadyShutdown,

    #[error(transparent)]
    Lock(#[from] PidFileError),
}

impl ForwardError {
    /// Whether the app simply has no running pods
    pub fn is_no_pods(&self) -> bool {
        matches!(self, ForwardError::NoPods(_))
    }
}

/// Errors raised by a tunnel before it becomes ready
#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("unable to dial pod: {0:#}")]
    Dial(#[source] anyhow::Error),

    #[error("unable to listen on port {port}: {source}")]
    Listen {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("tunnel stopped before becoming ready")]
    Stopped,

    #[error("tunnel task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
