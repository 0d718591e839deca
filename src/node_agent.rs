//! Node Agent library logic (§1.1, grounded in `original_source/src/node/
//! node_agent.cpp`): connects to the Manager, registers, then serves
//! one-shot task-assignment connections on its own listen port until told
//! to shut down.
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::NodeConfig;
use crate::connection::LineConnection;
use crate::Result;

/// How long `execute_task` pretends to work before replying `TASK_DONE`,
/// matching the prototype's fixed one-second sleep.
const SIMULATED_EXECUTION: Duration = Duration::from_secs(1);

pub async fn run(config: NodeConfig) -> Result<()> {
    let manager_addr = (config.manager_ip, config.manager_port);
    let manager_socket = TcpStream::connect(manager_addr).await?;
    info!(node = %config.node_id, manager = ?manager_addr, "connected to manager");

    let mut manager_conn = LineConnection::new(manager_socket);
    let register = format!("REGISTER {} {} {}", config.node_id, config.listen_port, config.memory_mb);
    manager_conn.write_line(&register).await?;
    info!(node = %config.node_id, "sent registration");

    // `TASK_DONE` replies go back over this same registration socket, so
    // concurrently completing tasks share it behind a lock.
    let manager_conn = Arc::new(Mutex::new(manager_conn));

    let listener = TcpListener::bind(("0.0.0.0", config.listen_port)).await?;
    info!(node = %config.node_id, port = config.listen_port, "listening for tasks");

    loop {
        let (mut socket, _) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(node = %config.node_id, %err, "failed to accept task connection");
                continue;
            }
        };

        let mut buf = [0u8; 1024];
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => continue,
            Ok(n) => n,
        };
        let payload = String::from_utf8_lossy(&buf[..n]);
        let trimmed = payload.trim();

        if trimmed == "SHUTDOWN" {
            info!(node = %config.node_id, "received shutdown signal from manager");
            return Ok(());
        }
        if trimmed.is_empty() {
            continue;
        }

        let task_id = trimmed.to_string();
        let node_id = config.node_id.clone();
        let manager_conn = manager_conn.clone();
        tokio::spawn(async move {
            execute_task(&node_id, &task_id, &manager_conn).await;
        });
    }
}

async fn execute_task(node_id: &str, task_id: &str, manager_conn: &Arc<Mutex<LineConnection<TcpStream>>>) {
    info!(node = %node_id, task = %task_id, "received task");
    tokio::time::sleep(SIMULATED_EXECUTION).await;
    info!(node = %node_id, task = %task_id, "completed task");

    let done_msg = format!("TASK_DONE {task_id}");
    let mut conn = manager_conn.lock().await;
    if let Err(err) = conn.write_line(&done_msg).await {
        error!(node = %node_id, task = %task_id, %err, "failed to report completion");
    }
}
