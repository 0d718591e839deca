//! The Transport Listener (§4.1): the Manager's single TCP accept loop. Each
//! inbound connection is classified, without consuming it, as either a node
//! registration or a client task submission, then handed off to the
//! matching session handler.
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::shutdown::Shutdown;
use crate::state::SharedState;
use crate::{client_session, node_session};

/// Limit the number of sessions concurrently being classified/dispatched.
/// Registered nodes and in-flight client bursts each hold a permit for the
/// lifetime of their handler task, same shape as the teacher's connection
/// cap.
const MAX_CONNECTIONS: usize = 250;

/// Prefix that distinguishes a node registration from a client submission on
/// the shared transport port (§4.1, §6).
const REGISTER_PREFIX: &[u8] = b"REGISTER";

/// Bound on how long classification waits for `REGISTER_PREFIX.len()` bytes
/// to arrive before giving up on the connection. A real sender delivers its
/// whole first line in one or two TCP segments; this only guards against a
/// peer that opens a connection and then never writes anything.
const CLASSIFY_TIMEOUT: Duration = Duration::from_secs(5);

struct Listener {
    state: SharedState,
    listener: TcpListener,
    limit_connections: Arc<Semaphore>,
    notify_shutdown: broadcast::Sender<()>,
    shutdown_complete_tx: mpsc::Sender<()>,
}

/// Run the Transport Listener until `shutdown` completes, then wait for all
/// spawned session handlers to finish.
pub async fn run(listener: TcpListener, state: SharedState, mut shutdown: Shutdown) {
    let (notify_shutdown, _) = broadcast::channel(1);
    let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel(1);

    let mut server = Listener {
        state,
        listener,
        limit_connections: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
        notify_shutdown,
        shutdown_complete_tx,
    };

    tokio::select! {
        res = server.accept_loop() => {
            if let Err(err) = res {
                error!(%err, "transport listener giving up accepting connections");
            }
        }
        _ = shutdown.recv() => {
            info!("transport listener shutting down");
        }
    }

    let Listener {
        shutdown_complete_tx,
        notify_shutdown,
        ..
    } = server;

    drop(notify_shutdown);
    drop(shutdown_complete_tx);
    let _ = shutdown_complete_rx.recv().await;
}

impl Listener {
    async fn accept_loop(&mut self) -> crate::Result<()> {
        info!("transport listener accepting connections");

        loop {
            let permit = self.limit_connections.clone().acquire_owned().await.unwrap();
            let (socket, peer) = self.accept().await?;

            let state = self.state.clone();
            let shutdown = Shutdown::new(self.notify_shutdown.subscribe());
            let _shutdown_complete = self.shutdown_complete_tx.clone();

            tokio::spawn(async move {
                dispatch(socket, peer, state, shutdown).await;
                drop(permit);
                drop(_shutdown_complete);
            });
        }
    }

    /// Accept with the teacher's exponential backoff: 1s, 2s, 4s, ... giving
    /// up after the 6th retry.
    async fn accept(&mut self) -> crate::Result<(TcpStream, std::net::SocketAddr)> {
        let mut backoff = 1;

        loop {
            match self.listener.accept().await {
                Ok(pair) => {
                    debug!("successfully accepted inbound connection");
                    return Ok(pair);
                }
                Err(err) => {
                    if backoff > 64 {
                        error!(%err, "failed to accept inbound connection too many times");
                        return Err(err.into());
                    }
                    warn!(%err, "got error accepting inbound connection, trying again in {backoff} seconds");
                }
            }

            tokio::time::sleep(Duration::from_secs(backoff)).await;
            backoff *= 2;
        }
    }
}

/// Classify a freshly accepted socket by peeking, without consuming, the
/// first bytes on the wire (§4.1): `REGISTER` routes to the Node Session
/// Handler, anything else to the Client Session Handler.
///
/// A single `peek` can return fewer than `REGISTER_PREFIX.len()` bytes if
/// the sender's first line arrived split across TCP segments, so this polls
/// until enough bytes are buffered, the peer closes, or `CLASSIFY_TIMEOUT`
/// elapses.
async fn dispatch(socket: TcpStream, peer: std::net::SocketAddr, state: SharedState, shutdown: Shutdown) {
    let is_register = match timeout(CLASSIFY_TIMEOUT, peek_is_register(&socket)).await {
        Ok(Some(is_register)) => is_register,
        Ok(None) => {
            debug!(%peer, "connection closed before enough bytes to classify");
            return;
        }
        Err(_) => {
            warn!(%peer, "timed out classifying inbound connection");
            return;
        }
    };

    if is_register {
        node_session::handle(socket, peer, state, shutdown).await;
    } else {
        client_session::handle(socket, state).await;
    }
}

/// Peek until `REGISTER_PREFIX.len()` bytes are available (`Some(is_match)`)
/// or the peer closes with fewer bytes than that (`None`), in which case it
/// cannot have been a `REGISTER` line regardless.
async fn peek_is_register(socket: &TcpStream) -> Option<bool> {
    let mut probe = [0u8; REGISTER_PREFIX.len()];
    loop {
        match socket.peek(&mut probe).await {
            Ok(0) => return None,
            Ok(n) if n >= REGISTER_PREFIX.len() => return Some(probe == *REGISTER_PREFIX),
            Ok(_) => tokio::time::sleep(Duration::from_millis(5)).await,
            Err(_) => return None,
        }
    }
}
