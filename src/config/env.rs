//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;
use std::path::PathBuf;

/// Environment variable prefix
const ENV_PREFIX: &str = "PACH_FORWARD";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnvConfig {
    /// Namespace from PACH_FORWARD_NAMESPACE
    pub namespace: Option<String>,
    /// Lock file from PACH_FORWARD_LOCK_FILE
    pub lock_file: Option<PathBuf>,
    /// Config file from PACH_FORWARD_CONFIG
    pub config_file: Option<PathBuf>,
    /// Verbose from PACH_FORWARD_VERBOSE
    pub verbose: Option<bool>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, keyed by full variable name
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}_{name}")).filter(|v| !v.is_empty());

        Self {
            namespace: get("NAMESPACE"),
            lock_file: get("LOCK_FILE").map(PathBuf::from),
            config_file: get("CONFIG").map(PathBuf::from),
            verbose: get("VERBOSE").map(|v| parse_bool(&v)),
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "1" | "true" | "yes" | "on" | "enabled"
    )
}

/// Print all PACH_FORWARD environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_NAMESPACE   Kubernetes namespace of the cluster");
    println!("  {ENV_PREFIX}_LOCK_FILE   Path of the single-instance pid file");
    println!("  {ENV_PREFIX}_CONFIG      Path to configuration file");
    println!("  {ENV_PREFIX}_VERBOSE     Enable verbose output (true/false)");
    println!();
    println!("  KUBECONFIG is read by the cluster client to locate the kubeconfig.");
}
