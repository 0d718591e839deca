//! The Client Session Handler (§4.2): reads a burst of newline-separated
//! task descriptors from a short-lived client socket and admits each to
//! the task table and ready queue.
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::connection::LineConnection;
use crate::state::{SharedState, DEFAULT_TASK_MEMORY_MB};

/// Handle one client burst: read whatever is available in a single recv,
/// split on newlines, admit each valid descriptor, then close the socket.
/// Clients that want to submit more tasks reconnect (§4.2).
pub async fn handle(socket: TcpStream, state: SharedState) {
    let mut conn = LineConnection::new(socket);

    let lines = match conn.read_burst().await {
        Ok(lines) => lines,
        Err(err) => {
            warn!(%err, "failed reading client burst");
            return;
        }
    };

    for line in lines {
        match parse_descriptor(&line) {
            Ok((id, workload, memory_mb, deps)) => {
                debug!(task = %id, memory_mb, "admitting task");
                state.submit_task(id, workload, memory_mb, deps).await;
            }
            Err(reason) => {
                warn!(line = %line, %reason, "skipping malformed task descriptor");
            }
        }
    }
    // Socket (and `conn`) drop here, closing the connection.
}

/// Parse `<task_id>:<workload>:<memory_mb>:<deps>` (§4.2). Fields after the
/// first are optional. A missing `memory_mb` defaults to 128; a malformed
/// one fails the whole line (caller skips and continues with the next).
/// `deps` is split on `;` into individual dependency IDs, carried on the
/// record but never consulted for admission (§9).
fn parse_descriptor(line: &str) -> Result<(String, String, i64, Vec<String>), &'static str> {
    let mut fields = line.splitn(4, ':');

    let task_id = fields.next().filter(|s| !s.is_empty()).ok_or("missing task id")?;
    let workload = fields.next().unwrap_or_default();
    let memory_field = fields.next();
    let deps_field = fields.next();

    let memory_mb = match memory_field {
        None | Some("") => DEFAULT_TASK_MEMORY_MB,
        Some(raw) => atoi::atoi::<i64>(raw.as_bytes()).ok_or("malformed memory_mb")?,
    };

    let deps = deps_field
        .unwrap_or_default()
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    Ok((task_id.to_string(), workload.to_string(), memory_mb, deps))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_descriptor() {
        let (id, workload, mem, deps) = parse_descriptor("t1:compute:256:a;b").unwrap();
        assert_eq!(id, "t1");
        assert_eq!(workload, "compute");
        assert_eq!(mem, 256);
        assert_eq!(deps, vec!["a", "b"]);
    }

    #[test]
    fn missing_memory_defaults_to_128() {
        let (_, _, mem, _) = parse_descriptor("t1:compute:").unwrap();
        assert_eq!(mem, 128);
        let (_, _, mem, _) = parse_descriptor("t1:compute").unwrap();
        assert_eq!(mem, 128);
    }

    #[test]
    fn malformed_memory_is_rejected() {
        assert!(parse_descriptor("t1:compute:not-a-number:").is_err());
    }

    #[test]
    fn empty_task_id_is_rejected() {
        assert!(parse_descriptor(":compute:100:").is_err());
    }
}
