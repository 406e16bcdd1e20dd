//! TCP acceptor (spec.md §4.2 startup step 1): binds a listening socket
//! and applies `SocketTuning` to each accepted stream before handing it
//! to `run_connection`. Without this module `SocketTuning::apply` has
//! no caller — `run_connection` itself stays generic over
//! `AsyncRead + AsyncWrite` so the literal scenarios in spec.md §8 can
//! run over `tokio::io::duplex`, and a real `TcpStream` only exists at
//! this boundary.
//!
//! Grounded on `spark-transport-tcp::listener::TcpListener`'s
//! bind/accept wrapper, narrowed to the bind/accept/tune/spawn sequence
//! this engine's startup step needs (no `CallContext` cancellation —
//! this engine cancels a connection by aborting its tasks, not by
//! threading a token through `accept`).

use crate::config::EngineConfig;
use crate::connection::{run_connection, ConnectionContext};
use crate::free_list::FreeList;
use crate::handler::HandlerRegistry;
use roc_core::error::{EngineError, Result};
use roc_wire::{AuthClock, CredentialStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};
use tracing::warn;

/// A bound listening socket. `accept` applies `config.socket()` to every
/// stream it hands back, so a caller using this type (rather than
/// constructing a `ConnectionContext` straight from a bare
/// `TcpStream::connect`) gets spec.md §4.2's socket tuning for free.
pub struct TcpAcceptor {
    inner: TokioTcpListener,
    local_addr: SocketAddr,
}

impl TcpAcceptor {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let inner = TokioTcpListener::bind(addr)
            .await
            .map_err(|err| EngineError::io("acceptor.bind", err))?;
        let local_addr = inner
            .local_addr()
            .map_err(|err| EngineError::io("acceptor.local_addr", err))?;
        Ok(Self { inner, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts one connection and tunes its socket before returning it.
    pub async fn accept(&self, config: &EngineConfig) -> Result<(TcpStream, SocketAddr)> {
        let (stream, peer_addr) = self
            .inner
            .accept()
            .await
            .map_err(|err| EngineError::io("acceptor.accept", err))?;
        config
            .socket()
            .apply(&stream)
            .map_err(|err| EngineError::io("acceptor.apply_socket_tuning", err))?;
        Ok((stream, peer_addr))
    }

    /// Runs the accept loop until the listener itself errors out,
    /// spawning one `run_connection` task per accepted stream. Returns
    /// the error that stopped the loop; it never returns `Ok` because an
    /// accept loop has no orderly exit short of the process shutting
    /// down around it.
    pub async fn serve(
        &self,
        registry: Arc<HandlerRegistry>,
        credentials: Arc<dyn CredentialStore>,
        clock: Arc<dyn AuthClock>,
        config: EngineConfig,
        container_pool: Arc<FreeList<Vec<u8>>>,
    ) -> EngineError {
        loop {
            let (stream, peer_addr) = match self.accept(&config).await {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(target: "roc_engine::acceptor", error = %err, "accept loop stopped");
                    return err;
                }
            };
            let ctx = ConnectionContext {
                registry: registry.clone(),
                credentials: credentials.clone(),
                clock: clock.clone(),
                config: config.clone(),
                container_pool: container_pool.clone(),
                peer_label: peer_addr.to_string(),
            };
            tokio::spawn(run_connection(stream, ctx, |_err| {}));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accept_applies_socket_tuning_to_the_accepted_stream() {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = acceptor.local_addr();

        let config = EngineConfig::new().with_socket_tuning(
            crate::config::SocketTuning::new().with_nodelay(true).with_keepalive(false),
        );

        let client = tokio::spawn(TcpStream::connect(addr));
        let (accepted, _peer) = acceptor.accept(&config).await.unwrap();
        let _client_stream = client.await.unwrap().unwrap();

        let sock = socket2::SockRef::from(&accepted);
        assert!(sock.nodelay().unwrap());
        assert!(!sock.keepalive().unwrap());
    }

    #[tokio::test]
    async fn bind_reports_the_actual_assigned_port() {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        assert_ne!(acceptor.local_addr().port(), 0);
    }
}
