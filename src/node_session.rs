//! The Node Session Handler (§4.3): owns a registered node's persistent
//! socket for the lifetime of its registration. Parses the initial
//! `REGISTER` line, then loops reading `TASK_DONE` lines until the peer
//! disconnects, the Health Monitor/a duplicate `REGISTER` evicts it, or the
//! Manager shuts down.
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::connection::LineConnection;
use crate::shutdown::Shutdown;
use crate::state::SharedState;

/// Handle one accepted node connection. The Transport Listener has already
/// peeked enough of the stream to classify it as a node registration; the
/// `REGISTER` line itself is still unread and is consumed here.
pub async fn handle(socket: TcpStream, peer: SocketAddr, state: SharedState, mut shutdown: Shutdown) {
    let mut conn = LineConnection::new(socket);

    let first_line = match conn.read_line().await {
        Ok(Some(line)) => line,
        Ok(None) => {
            warn!("node connection closed before REGISTER");
            return;
        }
        Err(err) => {
            warn!(%err, "failed reading REGISTER line");
            return;
        }
    };

    let (node_id, listen_port, memory_mb) = match parse_register(&first_line) {
        Some(fields) => fields,
        None => {
            warn!(line = %first_line, "malformed REGISTER, dropping connection");
            return;
        }
    };

    let ip = match peer {
        SocketAddr::V4(addr) => *addr.ip(),
        SocketAddr::V6(_) => {
            warn!(%peer, "node connected over IPv6, unsupported");
            return;
        }
    };

    let evict = Arc::new(Notify::new());
    state
        .register_node(node_id.clone(), ip, listen_port, memory_mb, evict.clone())
        .await;
    info!(node = %node_id, %ip, listen_port, memory_mb, "node registered");

    loop {
        tokio::select! {
            line = conn.read_line() => {
                match line {
                    Ok(Some(line)) => {
                        if let Some(task_id) = parse_task_done(&line) {
                            state.complete_task(&node_id, &task_id).await;
                        } else {
                            warn!(node = %node_id, %line, "unrecognized message on node socket");
                        }
                    }
                    Ok(None) => {
                        info!(node = %node_id, "node disconnected");
                        state.evict_node(&node_id).await;
                        return;
                    }
                    Err(err) => {
                        warn!(node = %node_id, %err, "node session read error");
                        state.evict_node(&node_id).await;
                        return;
                    }
                }
            }
            _ = evict.notified() => {
                info!(node = %node_id, "node session evicted");
                return;
            }
            _ = shutdown.recv() => {
                // The `SHUTDOWN` message itself goes out over a fresh
                // one-shot connection to the node's listen port (§5), not
                // this persistent REGISTER socket. See `shutdown_nodes`.
                return;
            }
        }
    }
}

/// Parse `REGISTER <node_id> <listen_port> <available_memory_mb>` (§6). The
/// node's IP is never taken from the payload: it is the accepted socket's
/// peer address, which cannot be spoofed by the registering node.
fn parse_register(line: &str) -> Option<(String, u16, i64)> {
    let mut fields = line.split_whitespace();
    if fields.next()? != "REGISTER" {
        return None;
    }
    let node_id = fields.next()?.to_string();
    let listen_port = fields.next()?.parse().ok()?;
    let memory_mb = fields.next()?.parse().ok()?;
    Some((node_id, listen_port, memory_mb))
}

/// Parse `TASK_DONE <task_id>` (§6).
fn parse_task_done(line: &str) -> Option<String> {
    let mut fields = line.split_whitespace();
    if fields.next()? != "TASK_DONE" {
        return None;
    }
    Some(fields.next()?.to_string())
}
