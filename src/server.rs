//! WebSocket signaling server
//!
//! Accepts transport connections and runs one read loop per connection.
//! Outbound traffic goes through a per-connection writer task fed by an
//! unbounded channel, so routing code never awaits a socket send.

use crate::config::RelayConfig;
use crate::protocol::ServerMessage;
use crate::registry::ConnectionHandle;
use crate::router::MessageRouter;
use crate::{Error, Result};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// WebSocket signaling relay server
pub struct SignalingServer {
    config: RelayConfig,
    router: Arc<MessageRouter>,
}

impl SignalingServer {
    /// Create a server from validated configuration
    pub fn new(config: RelayConfig) -> Result<Self> {
        config.validate()?;
        let router = Arc::new(MessageRouter::new(&config));
        Ok(Self { config, router })
    }

    /// Shared router (for introspection and tests)
    pub fn router(&self) -> Arc<MessageRouter> {
        Arc::clone(&self.router)
    }

    /// Bind the listener and start the accept loop and expiry sweep
    ///
    /// Returns a handle carrying the bound address (useful with port 0)
    /// that can be used to shut the server down.
    pub async fn start(self) -> Result<ServerHandle> {
        let bind_addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let router = Arc::clone(&self.router);
        let sweep_interval = self.config.sweep_interval();

        let (startup_tx, startup_rx) = oneshot::channel::<Result<SocketAddr>>();
        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        let accept_shutdown = shutdown_tx.subscribe();
        let accept_router = Arc::clone(&router);
        let accept_task = tokio::spawn(async move {
            let listener = match TcpListener::bind(&bind_addr).await {
                Ok(l) => l,
                Err(e) => {
                    error!(addr = %bind_addr, error = %e, "Failed to bind signaling listener");
                    let _ = startup_tx.send(Err(e.into()));
                    return;
                }
            };

            let local_addr = match listener.local_addr() {
                Ok(a) => a,
                Err(e) => {
                    let _ = startup_tx.send(Err(e.into()));
                    return;
                }
            };

            info!(addr = %local_addr, "Signaling relay listening");
            let _ = startup_tx.send(Ok(local_addr));

            accept_loop(listener, accept_router, accept_shutdown).await;
        });

        let mut sweep_shutdown = shutdown_tx.subscribe();
        let sweep_router = Arc::clone(&router);
        let sweep_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let expired = sweep_router.sweep_expired().await;
                        if expired > 0 {
                            info!(expired, "Expiry sweep destroyed sessions");
                        }
                    }
                    _ = sweep_shutdown.recv() => break,
                }
            }
        });

        match startup_rx.await {
            Ok(Ok(local_addr)) => Ok(ServerHandle {
                local_addr,
                shutdown_tx,
                accept_task,
                sweep_task,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::WebSocketError(
                "Server startup channel closed unexpectedly".to_string(),
            )),
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    router: Arc<MessageRouter>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        debug!(peer = %peer_addr, "Accepted connection");
                        let router = Arc::clone(&router);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, router).await {
                                debug!(peer = %peer_addr, error = %e, "Connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Signaling relay accept loop shutting down");
                break;
            }
        }
    }
}

/// Serve one WebSocket connection until it closes
async fn handle_connection(stream: TcpStream, router: Arc<MessageRouter>) -> Result<()> {
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| Error::WebSocketError(format!("Handshake failed: {}", e)))?;
    let (mut sink, mut frames) = ws.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let handle = ConnectionHandle::new(Uuid::new_v4(), tx);
    let conn_id = handle.id();
    router.register(handle.clone()).await;

    // Writer task: drains the outbound queue into the socket
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match msg.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(connection = %conn_id, error = %e, "Skipping unencodable message");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // Read loop: frames from one connection are processed in receipt order
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(Message::Text(text)) => router.handle(&handle, &text).await,
            Ok(Message::Close(_)) => break,
            // Ping/pong handled by tungstenite; binary frames are not part
            // of the protocol and are ignored
            Ok(_) => {}
            Err(e) => {
                debug!(connection = %conn_id, error = %e, "Transport error, closing");
                break;
            }
        }
    }

    // Close is an asynchronous signal: tear down promptly and exactly once
    router.disconnect(conn_id).await;
    writer.abort();
    Ok(())
}

/// Handle for a running signaling server
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    accept_task: JoinHandle<()>,
    sweep_task: JoinHandle<()>,
}

impl ServerHandle {
    /// The bound listener address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signal shutdown and wait for the server tasks to exit
    pub async fn shutdown(self) {
        info!("Shutting down signaling relay");
        let _ = self.shutdown_tx.send(());
        let _ = self.accept_task.await;
        let _ = self.sweep_task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_server_binds_ephemeral_port() {
        let config = RelayConfig {
            bind_address: "127.0.0.1".to_string(),
            port: 0,
            ..Default::default()
        };

        let server = SignalingServer::new(config).unwrap();
        let handle = server.start().await.unwrap();
        assert_ne!(handle.local_addr().port(), 0);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = RelayConfig {
            bind_address: String::new(),
            ..Default::default()
        };
        assert!(SignalingServer::new(config).is_err());
    }
}
