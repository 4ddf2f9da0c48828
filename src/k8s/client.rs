//! Kubernetes client wrapper
//!
//! Provides the cluster operations the forwarder needs: listing pods by
//! label and dialing a pod port over the upgraded `portforward` connection.

use anyhow::Context;
use futures::future::{BoxFuture, FutureExt};
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Api, ListParams, Portforwarder},
    core::Request,
    Client, Config, Resource, ResourceExt,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, trace};

use super::{PortForwardTarget, Selector};

/// Cluster client construction errors
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("failed to load cluster configuration: {0}")]
    Config(#[from] kube::config::InferConfigError),

    #[error("failed to construct cluster client: {0}")]
    Client(#[from] kube::Error),
}

/// Cluster operations used by the port forwarder
pub trait Cluster: Send + Sync + 'static {
    /// Names of the running pods in `namespace` matching `selector`
    fn list_pods<'a>(
        &'a self,
        namespace: &'a str,
        selector: &'a Selector,
    ) -> BoxFuture<'a, Result<Vec<String>, kube::Error>>;

    /// Build a dialer for the upgradeable connection to `target`
    fn dialer(&self, target: &PortForwardTarget) -> Result<Arc<dyn Dialer>, kube::Error>;
}

/// Carries local connections to a pod port
pub trait Dialer: Send + Sync + 'static {
    /// Open and close one upgraded connection to the pod port
    fn check(&self) -> BoxFuture<'static, anyhow::Result<()>>;

    /// Forward `conn` until either side closes
    fn forward(&self, conn: TcpStream) -> BoxFuture<'static, anyhow::Result<()>>;
}

/// Kubernetes client backed by the ambient kubeconfig
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    /// Create a client from the local kubeconfig, `KUBECONFIG` or the
    /// in-cluster environment
    pub async fn infer() -> Result<Self, ClusterError> {
        let config = Config::infer().await?;
        Self::with_config(config)
    }

    /// Create client with custom config
    pub fn with_config(config: Config) -> Result<Self, ClusterError> {
        debug!(cluster_url = %config.cluster_url, "Creating Kubernetes client");
        let client = Client::try_from(config)?;
        Ok(Self { client })
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

impl Cluster for KubeCluster {
    fn list_pods<'a>(
        &'a self,
        namespace: &'a str,
        selector: &'a Selector,
    ) -> BoxFuture<'a, Result<Vec<String>, kube::Error>> {
        async move {
            let params = ListParams::default()
                .labels(&selector.to_string())
                .fields("status.phase=Running");

            let pods = self.pods(namespace).list(&params).await?;
            trace!(%selector, namespace, count = pods.items.len(), "Listed pods");

            Ok(pods.items.iter().map(|pod| pod.name_any()).collect())
        }
        .boxed()
    }

    fn dialer(&self, target: &PortForwardTarget) -> Result<Arc<dyn Dialer>, kube::Error> {
        // Invalid targets fail here, not on the first accepted connection.
        let request = Request::new(Pod::url_path(&(), Some(target.namespace.as_str())))
            .portforward(&target.pod, &[target.port])
            .map_err(kube::Error::BuildRequest)?;
        debug!(uri = %request.uri(), "Built port-forward request");

        Ok(Arc::new(KubeDialer {
            pods: self.pods(&target.namespace),
            pod: target.pod.clone(),
            port: target.port,
        }))
    }
}

/// Dialer over the pod `portforward` subresource
struct KubeDialer {
    pods: Api<Pod>,
    pod: String,
    port: u16,
}

impl KubeDialer {
    async fn open(pods: &Api<Pod>, pod: &str, port: u16) -> anyhow::Result<Portforwarder> {
        pods.portforward(pod, &[port])
            .await
            .with_context(|| format!("failed to open port-forward to {pod}:{port}"))
    }
}

impl Dialer for KubeDialer {
    fn check(&self) -> BoxFuture<'static, anyhow::Result<()>> {
        let pods = self.pods.clone();
        let pod = self.pod.clone();
        let port = self.port;

        async move {
            let mut forwarder = Self::open(&pods, &pod, port).await?;
            drop(forwarder.take_stream(port));
            forwarder
                .join()
                .await
                .with_context(|| format!("port-forward to {pod}:{port} failed"))?;
            debug!(pod, port, "Pod port is reachable");
            Ok(())
        }
        .boxed()
    }

    fn forward(&self, mut conn: TcpStream) -> BoxFuture<'static, anyhow::Result<()>> {
        let pods = self.pods.clone();
        let pod = self.pod.clone();
        let port = self.port;

        async move {
            let mut forwarder = Self::open(&pods, &pod, port).await?;

            let mut upstream = forwarder
                .take_stream(port)
                .context("port not found in forwarder")?;

            if let Err(error) = tokio::io::copy_bidirectional(&mut conn, &mut upstream).await {
                trace!(pod, port, ?error, "connection error");
            }

            drop(upstream);
            forwarder.join().await?;
            Ok(())
        }
        .boxed()
    }
}
