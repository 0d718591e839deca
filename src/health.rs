//! The Health Monitor (§4.5): a periodic liveness probe against every
//! registered node. A node that fails the probe is evicted and its
//! unfinished tasks are requeued.
use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{error, warn};

use crate::shutdown::Shutdown;
use crate::state::SharedState;

/// Probe cadence: "runs on a longer cadence (≈ 10 s)" (§4.5).
pub const TICK_INTERVAL: Duration = Duration::from_secs(10);

/// Per-probe connect timeout, same bound as the Scheduler's dispatch
/// timeout (§5's SHOULD).
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Run the Health Monitor loop until the shutdown signal fires.
pub async fn run(state: SharedState, mut shutdown: Shutdown) {
    let mut interval = tokio::time::interval(TICK_INTERVAL);

    while !shutdown.is_shutdown() {
        tokio::select! {
            _ = interval.tick() => tick(&state).await,
            _ = shutdown.recv() => return,
        }
    }
}

async fn tick(state: &SharedState) {
    let candidates = state.all_node_addrs().await;

    let mut down = Vec::new();
    for (id, ip, port) in candidates {
        if !probe(ip, port).await {
            warn!(node = %id, "health probe failed, marking down");
            down.push(id);
        }
    }

    for id in &down {
        state.evict_node(id).await;
    }

    if state.node_count().await == 0 {
        error!("no active node");
    }
}

/// A single failed `connect` is sufficient to declare a node down: no
/// retry, no backoff, no hysteresis (§4.5, §9's resolved open question).
async fn probe(ip: Ipv4Addr, port: u16) -> bool {
    match timeout(PROBE_TIMEOUT, TcpStream::connect((ip, port))).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(_)) => false,
        Err(_) => false,
    }
}
