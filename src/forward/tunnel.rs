//! Local listener side of a port-forward
//!
//! A tunnel checks that the pod port can be dialed, listens on the loopback
//! addresses and hands every accepted connection to the pod dialer until it
//! is told to stop. Stopping also aborts the connections still in flight.

use futures::StreamExt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio_stream::wrappers::TcpListenerStream;
use tracing::{debug, error, trace};

use super::{Sinks, TunnelError};
use crate::k8s::Dialer;

/// One `local:remote` forward
pub struct Tunnel {
    dialer: Arc<dyn Dialer>,
    local_port: u16,
    remote_port: u16,
    sinks: Sinks,
}

impl Tunnel {
    pub fn new(dialer: Arc<dyn Dialer>, local_port: u16, remote_port: u16, sinks: Sinks) -> Self {
        Self {
            dialer,
            local_port,
            remote_port,
            sinks,
        }
    }

    /// Dial the pod, listen, signal `ready`, then forward connections until
    /// `stop` fires or its sender is dropped.
    pub async fn run(
        self,
        mut stop: oneshot::Receiver<()>,
        ready: oneshot::Sender<()>,
    ) -> Result<(), TunnelError> {
        self.dialer.check().await.map_err(TunnelError::Dial)?;

        let (listeners, local_port) = self.listen().await?;
        let _ = ready.send(());

        let mut incoming =
            futures::stream::select_all(listeners.into_iter().map(TcpListenerStream::new));
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = &mut stop => break,
                conn = incoming.next() => match conn {
                    Some(Ok(conn)) => self.handle(&mut connections, conn, local_port),
                    Some(Err(error)) => {
                        self.sinks.error(format_args!(
                            "error accepting connection on port {local_port}: {error}"
                        ));
                    }
                    None => break,
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        drop(incoming);
        connections.abort_all();
        while connections.join_next().await.is_some() {}

        debug!(local_port, remote_port = self.remote_port, "Stopped forwarding");
        Ok(())
    }

    /// Bind IPv4 and IPv6 loopback; at least one must succeed.
    async fn listen(&self) -> Result<(Vec<TcpListener>, u16), TunnelError> {
        let mut listeners = Vec::with_capacity(2);
        let mut port = self.local_port;
        let mut first_error = None;

        let addrs = [
            SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            SocketAddr::from((Ipv6Addr::LOCALHOST, 0)),
        ];
        for mut addr in addrs {
            addr.set_port(port);
            match bind(addr).await {
                Ok((listener, bound)) => {
                    self.sinks.info(format_args!(
                        "Forwarding from {bound} -> {}",
                        self.remote_port
                    ));
                    port = bound.port();
                    listeners.push(listener);
                }
                Err(error) => {
                    debug!(%addr, ?error, "Unable to listen");
                    first_error.get_or_insert(error);
                }
            }
        }

        if listeners.is_empty() {
            let source = first_error
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no address"));
            return Err(TunnelError::Listen {
                port: self.local_port,
                source,
            });
        }
        Ok((listeners, port))
    }

    fn handle(&self, connections: &mut JoinSet<()>, conn: TcpStream, local_port: u16) {
        if let Ok(peer_addr) = conn.peer_addr() {
            trace!(%peer_addr, "new connection");
        }
        self.sinks
            .info(format_args!("Handling connection for {local_port}"));

        let remote_port = self.remote_port;
        let sinks = self.sinks.clone();
        let forward = self.dialer.forward(conn);

        connections.spawn(async move {
            if let Err(e) = forward.await {
                error!(local_port, remote_port, error = %e, "failed to forward connection");
                sinks.error(format_args!(
                    "an error occurred forwarding {local_port} -> {remote_port}: {e:#}"
                ));
            }
        });
    }
}

async fn bind(addr: SocketAddr) -> io::Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind(addr).await?;
    let bound = listener.local_addr()?;
    Ok((listener, bound))
}
