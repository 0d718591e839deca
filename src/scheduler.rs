//! The Scheduler (§4.4): a cooperative loop that wakes on a fixed cadence
//! and drains the ready queue by matching head-of-queue tasks to nodes
//! with sufficient free memory.
use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::connection::LineConnection;
use crate::shutdown::Shutdown;
use crate::state::{SharedState, TaskId};

/// Tick cadence: "wakes on a fixed cadence (≈ 200 ms)" (§4.4).
pub const TICK_INTERVAL: Duration = Duration::from_millis(200);

/// Per-dispatch-connection timeout, bounding `connect` + send. §5's SHOULD:
/// "implementations SHOULD impose a bounded per-operation timeout (≤ 2 s)".
pub const DISPATCH_TIMEOUT: Duration = Duration::from_secs(2);

/// Run the Scheduler loop until the shutdown signal fires.
pub async fn run(state: SharedState, mut shutdown: Shutdown) {
    let mut interval = tokio::time::interval(TICK_INTERVAL);

    while !shutdown.is_shutdown() {
        tokio::select! {
            _ = interval.tick() => {
                state.run_dispatch_tick(|node_id, ip, port, task_id| {
                    dispatch_one(ip, port, task_id, node_id)
                }).await;
            }
            _ = shutdown.recv() => return,
        }
    }
}

/// Open a fresh one-shot TCP connection to the node's listen port, send the
/// task ID as a raw unframed payload, and close (§4.4 step 3, §6). Returns
/// whether the send succeeded; failures are logged and the caller tries the
/// next candidate node (§4.4 step 4).
async fn dispatch_one(ip: Ipv4Addr, port: u16, task_id: TaskId, node_id: String) -> bool {
    let attempt = async {
        let socket = TcpStream::connect((ip, port)).await?;
        let mut conn = LineConnection::new(socket);
        conn.write_raw(task_id.as_bytes()).await
    };

    match timeout(DISPATCH_TIMEOUT, attempt).await {
        Ok(Ok(())) => {
            info!(node = %node_id, task = %task_id, "dispatched task");
            true
        }
        Ok(Err(err)) => {
            warn!(node = %node_id, task = %task_id, %err, "dispatch connection failed");
            false
        }
        Err(_) => {
            warn!(node = %node_id, task = %task_id, "dispatch connection timed out");
            false
        }
    }
}

/// Best-effort fanout of the literal `SHUTDOWN` payload to every currently
/// registered node's listen port, one fresh one-shot connection each (§5).
/// Called once by the top-level orchestration as it unwinds; failures are
/// logged and otherwise ignored since the Manager is exiting regardless.
pub async fn shutdown_nodes(state: &SharedState) {
    for (node_id, ip, port) in state.all_node_addrs().await {
        let attempt = async {
            let socket = TcpStream::connect((ip, port)).await?;
            let mut conn = LineConnection::new(socket);
            conn.write_raw(b"SHUTDOWN").await
        };
        match timeout(DISPATCH_TIMEOUT, attempt).await {
            Ok(Ok(())) => info!(node = %node_id, "sent SHUTDOWN"),
            Ok(Err(err)) => warn!(node = %node_id, %err, "failed to send SHUTDOWN"),
            Err(_) => warn!(node = %node_id, "SHUTDOWN connection timed out"),
        }
    }
}
