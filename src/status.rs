//! The Status Publisher (§4.6): serves the Dashboard a plain-text snapshot
//! of the state tables on each connection, then closes.
use std::fmt::Write as _;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::shutdown::Shutdown;
use crate::state::{SharedState, TaskStatus};

/// Render the NODES/TASKS snapshot in the exact wire format of §6:
///
/// ```text
/// NODES
/// <id>,<ip>,<port>,<available_memory_mb>,<health=UP|DOWN>
/// ...
/// TASKS
/// <id>,<status=QUEUED|ASSIGNED|COMPLETED>,<assigned_node>,<memory_mb>
/// ...
/// ```
///
/// Nodes present in the table are, by invariant 4 of §3, exactly the ones
/// whose session is live, so every line reports `health=UP`.
pub(crate) async fn render(state: &SharedState) -> String {
    let (nodes, tasks) = state.snapshot().await;

    let mut out = String::new();
    out.push_str("NODES\n");
    for node in nodes {
        let _ = writeln!(
            out,
            "{},{},{},{},UP",
            node.id, node.ip, node.port, node.available_memory_mb
        );
    }

    out.push_str("TASKS\n");
    for task in tasks {
        let status = match task.status {
            TaskStatus::Queued => "QUEUED",
            TaskStatus::Assigned => "ASSIGNED",
            TaskStatus::Completed => "COMPLETED",
        };
        let _ = writeln!(
            out,
            "{},{},{},{}",
            task.id,
            status,
            task.assigned_node.as_deref().unwrap_or(""),
            task.memory_required_mb
        );
    }

    out
}

/// Run the Status Publisher accept loop until the shutdown signal fires.
/// Connections are served one at a time, matching "accepts connections one
/// at a time" in §4.6.
pub async fn run(listener: TcpListener, state: SharedState, mut shutdown: Shutdown) {
    info!(addr = %listener.local_addr().map(|a| a.to_string()).unwrap_or_default(), "status publisher listening");

    while !shutdown.is_shutdown() {
        let accepted = tokio::select! {
            res = listener.accept() => res,
            _ = shutdown.recv() => return,
        };

        let mut socket = match accepted {
            Ok((socket, _)) => socket,
            Err(err) => {
                warn!(%err, "status publisher failed to accept");
                continue;
            }
        };

        let snapshot = render(&state).await;
        if let Err(err) = socket.write_all(snapshot.as_bytes()).await {
            error!(%err, "failed writing status snapshot");
        }
        debug!("served dashboard snapshot");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::DEFAULT_TASK_MEMORY_MB;
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn renders_nodes_and_tasks_sections() {
        let state = SharedState::new();
        state
            .register_node(
                "n1".into(),
                Ipv4Addr::new(127, 0, 0, 1),
                7001,
                512,
                Arc::new(Notify::new()),
            )
            .await;
        state
            .submit_task("t1".into(), "compute".into(), DEFAULT_TASK_MEMORY_MB, vec![])
            .await;

        let rendered = render(&state).await;
        assert!(rendered.starts_with("NODES\n"));
        assert!(rendered.contains("n1,127.0.0.1,7001,512,UP\n"));
        assert!(rendered.contains("TASKS\n"));
        assert!(rendered.contains("t1,QUEUED,,128\n"));
    }
}
