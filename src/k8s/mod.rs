//! Kubernetes API client module
//!
//! Provides pod discovery and port-forward dialing for the forwarder.

mod client;
mod selector;

pub use client::{Cluster, ClusterError, Dialer, KubeCluster};
pub use selector::{PortForwardTarget, Selector};
