//! Port forwarding to cluster pods
//!
//! [`PortForwarder`] resolves a pod by label, starts a [`Tunnel`] to it and
//! keeps the tunnel's stop handle so every tunnel can be torn down together
//! with [`PortForwarder::close`].

mod error;
mod preset;
pub(crate) mod sink;
mod tunnel;

pub use error::{ForwardError, TunnelError};
pub use preset::{ForwardSpec, Service};
pub use sink::Sinks;
pub use tunnel::Tunnel;

use rand::seq::IndexedRandom;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tokio::task::JoinError;
use tracing::{debug, info};

use crate::k8s::{Cluster, KubeCluster, PortForwardTarget, Selector};
use crate::utils::PidFile;

/// Namespace used when none is given
pub const DEFAULT_NAMESPACE: &str = "default";

/// Stop handles of the running tunnels, guarded together with the shutdown
/// flag. Once `shutdown` is set the list is only ever drained.
#[derive(Default)]
struct State {
    stop_handles: Vec<oneshot::Sender<()>>,
    shutdown: bool,
}

/// Forwards local ports to pods of the cluster
pub struct PortForwarder {
    cluster: Arc<dyn Cluster>,
    namespace: String,
    sinks: Sinks,
    state: Mutex<State>,
}

impl PortForwarder {
    /// Create a forwarder using the ambient cluster configuration
    pub async fn new(namespace: &str, sinks: Sinks) -> Result<Self, ForwardError> {
        let cluster = KubeCluster::infer().await?;
        Ok(Self::with_cluster(Arc::new(cluster), namespace, sinks))
    }

    /// Create a forwarder over an existing cluster client
    pub fn with_cluster(cluster: Arc<dyn Cluster>, namespace: &str, sinks: Sinks) -> Self {
        let namespace = if namespace.is_empty() {
            DEFAULT_NAMESPACE
        } else {
            namespace
        };

        Self {
            cluster,
            namespace: namespace.to_string(),
            sinks,
            state: Mutex::new(State::default()),
        }
    }

    /// Get the namespace
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Number of tunnels that will be signalled on close
    pub fn tunnel_count(&self) -> usize {
        self.state().stop_handles.len()
    }

    /// Forward `local_port` to `remote_port` of a random running pod of
    /// `app_name`.
    ///
    /// Returns once the local listener is ready; the tunnel keeps running in
    /// the background until [`close`](Self::close).
    pub async fn run(
        &self,
        app_name: &str,
        local_port: u16,
        remote_port: u16,
    ) -> Result<(), ForwardError> {
        let selector = Selector::for_app(app_name);
        let pods = self
            .cluster
            .list_pods(&self.namespace, &selector)
            .await
            .map_err(|source| ForwardError::Discovery {
                app: app_name.to_string(),
                source,
            })?;

        let pod = pods
            .choose(&mut rand::rng())
            .ok_or_else(|| ForwardError::NoPods(app_name.to_string()))?
            .clone();

        let target = PortForwardTarget::new(&self.namespace, pod, remote_port);
        debug!(url = %target.url(), candidates = pods.len(), "Selected pod");

        let dialer = self
            .cluster
            .dialer(&target)
            .map_err(|source| ForwardError::Transport {
                target: target.to_string(),
                source,
            })?;

        let (stop_tx, stop_rx) = oneshot::channel();
        {
            let mut state = self.state();
            if state.shutdown {
                return Err(ForwardError::AlreadyShutdown);
            }
            state.stop_handles.push(stop_tx);
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let tunnel = Tunnel::new(dialer, local_port, remote_port, self.sinks.clone());
        let mut task = tokio::spawn(tunnel.run(stop_rx, ready_tx));

        let ready = tokio::select! {
            ready = ready_rx => ready.is_ok(),
            result = &mut task => return Err(ForwardError::Forward(startup_error(result))),
        };
        if !ready {
            return Err(ForwardError::Forward(startup_error(task.await)));
        }

        info!(
            app = app_name,
            pod = %target.pod,
            local_port,
            remote_port,
            "Port forwarding ready"
        );
        Ok(())
    }

    /// Forward one of the preset services; 0 selects its default local port
    pub async fn run_service(&self, service: Service, local_port: u16) -> Result<(), ForwardError> {
        let spec = service.spec(local_port);
        self.run(spec.app, spec.local_port, spec.remote_port).await
    }

    /// Take the single-instance lock at `path`
    pub fn lock(&self, path: impl AsRef<Path>) -> Result<PidFile, ForwardError> {
        let pidfile = PidFile::new(path.as_ref());
        pidfile.write()?;
        Ok(pidfile)
    }

    /// Signal every running tunnel to stop and refuse new ones.
    ///
    /// Returns the number of tunnels signalled. Does not wait for them to
    /// finish.
    ///
    /// # Panics
    ///
    /// Panics if the forwarder was already closed.
    pub fn close(&self) -> usize {
        let mut state = self.state();
        if state.shutdown {
            panic!("port forwarder already shutdown");
        }
        state.shutdown = true;

        let mut signalled = 0;
        for stop in state.stop_handles.drain(..) {
            // A tunnel that already exited has dropped its receiver.
            let _ = stop.send(());
            signalled += 1;
        }
        debug!(signalled, "Closed port forwarder");
        signalled
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Per-service entry points. The binary goes through [`PortForwarder::run_service`].
#[allow(dead_code)]
impl PortForwarder {
    /// Forward the pachd daemon
    pub async fn run_for_daemon(&self, local_port: u16) -> Result<(), ForwardError> {
        self.run_service(Service::Daemon, local_port).await
    }

    /// Forward SAML ACS
    pub async fn run_for_saml_acs(&self, local_port: u16) -> Result<(), ForwardError> {
        // Keeps the suite selector the other services use.
        self.run_service(Service::SamlAcs, local_port).await
    }

    /// Forward the dash UI
    pub async fn run_for_dash_ui(&self, local_port: u16) -> Result<(), ForwardError> {
        self.run_service(Service::DashUi, local_port).await
    }

    /// Forward the dash websocket
    pub async fn run_for_dash_websocket(&self, local_port: u16) -> Result<(), ForwardError> {
        self.run_service(Service::DashWebSocket, local_port).await
    }

    /// Forward PFS over HTTP
    pub async fn run_for_pfs(&self, local_port: u16) -> Result<(), ForwardError> {
        self.run_service(Service::Pfs, local_port).await
    }
}

fn startup_error(result: Result<Result<(), TunnelError>, JoinError>) -> TunnelError {
    match result {
        Ok(Err(error)) => error,
        Ok(Ok(())) => TunnelError::Stopped,
        Err(error) => TunnelError::Task(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::sink::Captured;
    use crate::k8s::Dialer;
    use futures::future::{BoxFuture, FutureExt};
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio_test::assert_err;

    #[derive(Default)]
    struct FakeCluster {
        pods: Vec<String>,
        fail_list: bool,
        fail_dialer: bool,
        fail_check: bool,
        selectors: Mutex<Vec<String>>,
        dialed: Mutex<Vec<PortForwardTarget>>,
    }

    impl FakeCluster {
        fn with_pods(pods: &[&str]) -> Self {
            Self {
                pods: pods.iter().map(|p| p.to_string()).collect(),
                ..Default::default()
            }
        }

        fn dialed(&self) -> Vec<PortForwardTarget> {
            self.dialed.lock().unwrap().clone()
        }
    }

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "forbidden".to_string(),
            reason: "Forbidden".to_string(),
            code,
        })
    }

    impl Cluster for FakeCluster {
        fn list_pods<'a>(
            &'a self,
            _namespace: &'a str,
            selector: &'a Selector,
        ) -> BoxFuture<'a, Result<Vec<String>, kube::Error>> {
            self.selectors.lock().unwrap().push(selector.to_string());
            let result = if self.fail_list {
                Err(api_error(403))
            } else {
                Ok(self.pods.clone())
            };
            async move { result }.boxed()
        }

        fn dialer(&self, target: &PortForwardTarget) -> Result<Arc<dyn Dialer>, kube::Error> {
            if self.fail_dialer {
                return Err(api_error(500));
            }
            self.dialed.lock().unwrap().push(target.clone());
            Ok(Arc::new(Echo {
                reachable: !self.fail_check,
            }))
        }
    }

    struct Echo {
        reachable: bool,
    }

    impl Dialer for Echo {
        fn check(&self) -> BoxFuture<'static, anyhow::Result<()>> {
            let reachable = self.reachable;
            async move {
                anyhow::ensure!(reachable, "pods \"pachd-a\" is forbidden");
                Ok(())
            }
            .boxed()
        }

        fn forward(&self, mut conn: TcpStream) -> BoxFuture<'static, anyhow::Result<()>> {
            async move {
                let (mut rx, mut tx) = conn.split();
                tokio::io::copy(&mut rx, &mut tx).await?;
                Ok(())
            }
            .boxed()
        }
    }

    fn forwarder(cluster: FakeCluster) -> (Arc<FakeCluster>, PortForwarder) {
        let cluster = Arc::new(cluster);
        let forwarder = PortForwarder::with_cluster(cluster.clone(), "pachyderm", Sinks::sink());
        (cluster, forwarder)
    }

    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn test_default_namespace() {
        let forwarder =
            PortForwarder::with_cluster(Arc::new(FakeCluster::default()), "", Sinks::sink());
        assert_eq!(forwarder.namespace(), "default");
    }

    #[tokio::test]
    async fn test_run_selects_matching_pod() {
        let pods = ["pachd-a", "pachd-b", "pachd-c"];
        let (cluster, forwarder) = forwarder(FakeCluster::with_pods(&pods));

        for _ in 0..5 {
            forwarder.run("pachd", 0, 650).await.unwrap();
        }

        let dialed = cluster.dialed();
        assert_eq!(dialed.len(), 5);
        for target in dialed {
            assert!(pods.contains(&target.pod.as_str()));
            assert_eq!(target.namespace, "pachyderm");
            assert_eq!(target.port, 650);
        }
        assert_eq!(
            cluster.selectors.lock().unwrap()[0],
            "app=pachd,suite=pachyderm"
        );
        assert_eq!(forwarder.tunnel_count(), 5);
        assert_eq!(forwarder.close(), 5);
    }

    #[tokio::test]
    async fn test_run_without_pods() {
        let (cluster, forwarder) = forwarder(FakeCluster::with_pods(&[]));

        let err = forwarder.run("dash", 0, 8080).await.unwrap_err();
        assert!(matches!(err, ForwardError::NoPods(ref app) if app == "dash"));
        assert!(cluster.dialed().is_empty());
        assert_eq!(forwarder.tunnel_count(), 0);
    }

    #[tokio::test]
    async fn test_run_discovery_error() {
        let (_, forwarder) = forwarder(FakeCluster {
            fail_list: true,
            ..Default::default()
        });

        let err = forwarder.run("pachd", 0, 650).await.unwrap_err();
        assert!(matches!(err, ForwardError::Discovery { .. }));
        assert_eq!(forwarder.tunnel_count(), 0);
    }

    #[tokio::test]
    async fn test_run_transport_error() {
        let (_, forwarder) = forwarder(FakeCluster {
            pods: vec!["pachd-a".to_string()],
            fail_dialer: true,
            ..Default::default()
        });

        let err = forwarder.run("pachd", 0, 650).await.unwrap_err();
        match err {
            ForwardError::Transport { target, .. } => {
                assert_eq!(target, "pachyderm/pachd-a:650")
            }
            other => panic!("Expected Transport error, got {other:?}"),
        }
        assert_eq!(forwarder.tunnel_count(), 0);
    }

    #[tokio::test]
    async fn test_run_after_close() {
        let (cluster, forwarder) = forwarder(FakeCluster::with_pods(&["pachd-a"]));

        assert_eq!(forwarder.close(), 0);

        let result = forwarder.run("pachd", 0, 650).await;
        assert_err!(&result);
        assert!(matches!(result, Err(ForwardError::AlreadyShutdown)));
        assert_eq!(forwarder.tunnel_count(), 0);
        assert_eq!(cluster.dialed().len(), 1);
    }

    #[test]
    #[should_panic(expected = "port forwarder already shutdown")]
    fn test_double_close_panics() {
        let (_, forwarder) = forwarder(FakeCluster::default());
        forwarder.close();
        forwarder.close();
    }

    #[tokio::test]
    async fn test_port_in_use_is_forward_error() {
        let (_, forwarder) = forwarder(FakeCluster::with_pods(&["pachd-a"]));
        let v4 = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = v4.local_addr().unwrap().port();
        let _v6 = std::net::TcpListener::bind(("::1", port));

        let err = forwarder.run("pachd", port, 650).await.unwrap_err();
        assert!(matches!(
            err,
            ForwardError::Forward(TunnelError::Listen { .. })
        ));
        // The handle is registered before the tunnel starts.
        assert_eq!(forwarder.tunnel_count(), 1);
    }

    #[tokio::test]
    async fn test_run_for_dash_ui_uses_preset() {
        let (cluster, forwarder) = forwarder(FakeCluster::with_pods(&["dash-a"]));

        forwarder.run_for_dash_ui(free_port()).await.unwrap();

        assert_eq!(
            cluster.selectors.lock().unwrap()[0],
            "app=dash,suite=pachyderm"
        );
        assert_eq!(cluster.dialed()[0].port, 8080);
        forwarder.close();
    }

    #[tokio::test]
    async fn test_close_stops_listeners() {
        let out = Captured::default();
        let cluster = Arc::new(FakeCluster::with_pods(&["pachd-a"]));
        let forwarder =
            PortForwarder::with_cluster(cluster, "pachyderm", Sinks::new(out.clone(), std::io::sink()));
        let port = free_port();

        forwarder.run("pachd", port, 650).await.unwrap();
        assert!(out
            .contents()
            .contains(&format!("Forwarding from 127.0.0.1:{port} -> 650")));

        let mut conn = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        conn.write_all(b"pfs").await.unwrap();
        let mut buf = [0u8; 3];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pfs");

        assert_eq!(forwarder.close(), 1);

        let mut refused = false;
        for _ in 0..100 {
            if TcpStream::connect(("127.0.0.1", port)).await.is_err() {
                refused = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(refused, "listener on {port} still accepting after close");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_runs_and_close() {
        let pods = ["pachd-a", "pachd-b"];
        let (_, forwarder) = forwarder(FakeCluster::with_pods(&pods));
        let forwarder = Arc::new(forwarder);

        let mut handles = Vec::new();
        for _ in 0..32 {
            let forwarder = forwarder.clone();
            handles.push(tokio::spawn(async move {
                forwarder.run("pachd", 0, 650).await
            }));
        }

        tokio::task::yield_now().await;
        let signalled = forwarder.close();

        let mut started = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => started += 1,
                Err(ForwardError::AlreadyShutdown) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(signalled, started);
        assert_eq!(forwarder.tunnel_count(), 0);
    }

    #[tokio::test]
    async fn test_distinct_tunnels_get_distinct_handles() {
        let (_, forwarder) = forwarder(FakeCluster::with_pods(&["pachd-a"]));
        let mut ports = HashSet::new();

        for _ in 0..3 {
            let port = free_port();
            ports.insert(port);
            forwarder.run("pachd", port, 650).await.unwrap();
        }

        assert_eq!(forwarder.tunnel_count(), ports.len());
        assert_eq!(forwarder.close(), ports.len());
    }

    #[tokio::test]
    async fn test_run_unreachable_pod_is_forward_error() {
        let out = Captured::default();
        let cluster = Arc::new(FakeCluster {
            pods: vec!["pachd-a".to_string()],
            fail_check: true,
            ..Default::default()
        });
        let forwarder =
            PortForwarder::with_cluster(cluster, "pachyderm", Sinks::new(out.clone(), std::io::sink()));

        let err = forwarder.run("pachd", 0, 650).await.unwrap_err();
        assert!(matches!(err, ForwardError::Forward(TunnelError::Dial(_))));
        assert!(err.to_string().starts_with("port forwarding failed: "));
        assert!(!out.contents().contains("Forwarding from"));
        assert_eq!(forwarder.close(), 1);
    }

    #[tokio::test]
    async fn test_close_stops_open_connections() {
        let (_, forwarder) = forwarder(FakeCluster::with_pods(&["pachd-a"]));
        let port = free_port();
        forwarder.run("pachd", port, 650).await.unwrap();

        let mut conn = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        conn.write_all(b"a").await.unwrap();
        let mut buf = [0u8; 1];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"a");

        assert_eq!(forwarder.close(), 1);

        let _ = conn.write_all(b"z").await;
        let read = tokio::time::timeout(Duration::from_secs(5), conn.read(&mut buf))
            .await
            .expect("connection still open after close");
        assert!(
            matches!(read, Ok(0) | Err(_)),
            "connection still forwarding after close"
        );
    }
}
