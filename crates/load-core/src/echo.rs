//! WebSocket echo responder.
//!
//! Every accepted connection runs its own read-echo loop: each text or
//! binary message is counted and written back unchanged, with the same
//! frame type, before the next one is read. The first read or write error
//! ends that connection only. Control frames (ping, pong, close) are
//! answered by the protocol layer and are neither counted nor echoed.

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, warn};

use crate::counters::ResponderCounters;

pub struct EchoResponder {
    listener: TcpListener,
    counters: Arc<ResponderCounters>,
}

impl EchoResponder {
    /// Bind the listening socket. Failure here is fatal for the responder.
    pub async fn bind(addr: &str, counters: Arc<ResponderCounters>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        Ok(Self { listener, counters })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever, one task per connection.
    pub async fn serve(self) -> anyhow::Result<()> {
        info!(address = %self.local_addr()?, "Echo responder listening");

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "New connection");
                    let counters = Arc::clone(&self.counters);
                    tokio::spawn(async move {
                        handle_connection(stream, peer, counters).await;
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, counters: Arc<ResponderCounters>) {
    // Any path and any origin are accepted.
    let mut ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!(peer = %peer, error = %e, "WebSocket handshake failed");
            return;
        }
    };

    let _active = counters.open_connection();

    loop {
        let msg = match ws.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(tungstenite::Error::ConnectionClosed)) | None => {
                debug!(peer = %peer, "Connection closed");
                break;
            }
            Some(Err(e)) => {
                warn!(peer = %peer, error = %e, "Read failed");
                break;
            }
        };

        match msg {
            Message::Text(_) | Message::Binary(_) => {
                counters.record_received();
                if let Err(e) = ws.send(msg).await {
                    warn!(peer = %peer, error = %e, "Echo write failed");
                    break;
                }
                counters.record_echoed();
            }
            // The close reply is flushed by the next read, which then ends the stream.
            Message::Close(frame) => {
                debug!(peer = %peer, frame = ?frame, "Close frame received");
            }
            _ => {}
        }
    }
}

/// Log the responder counters every `every` until the task is aborted.
pub fn spawn_reporter(counters: Arc<ResponderCounters>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let snap = counters.snapshot();
            info!(
                "Active connections: {}, Messages received: {}",
                snap.active_connections, snap.messages_received
            );
        }
    })
}
