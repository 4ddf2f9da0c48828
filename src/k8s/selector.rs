//! Label selectors and port-forward targets

use std::collections::BTreeMap;
use std::fmt;

/// Label every pod of the deployment carries
pub const SUITE_LABEL: (&str, &str) = ("suite", "pachyderm");

/// Equality-based label selector
///
/// Labels are kept sorted so the formatted selector matches what `kubectl`
/// prints for the same set, e.g. `app=pachd,suite=pachyderm`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector {
    labels: BTreeMap<String, String>,
}

impl Selector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Selector for the pods of one application of the suite
    pub fn for_app(app: &str) -> Self {
        Self::new()
            .with_label(SUITE_LABEL.0, SUITE_LABEL.1)
            .with_label("app", app)
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.labels {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            write!(f, "{key}={value}")?;
        }
        Ok(())
    }
}

/// A single pod port reached through the `portforward` subresource
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortForwardTarget {
    pub namespace: String,
    pub pod: String,
    pub port: u16,
}

impl PortForwardTarget {
    pub fn new(namespace: impl Into<String>, pod: impl Into<String>, port: u16) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
            port,
        }
    }

    /// API server path of the pod's `portforward` subresource
    pub fn url(&self) -> String {
        format!(
            "/api/v1/namespaces/{}/pods/{}/portforward?ports={}",
            self.namespace, self.pod, self.port
        )
    }
}

impl fmt::Display for PortForwardTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.namespace, self.pod, self.port)
    }
}
