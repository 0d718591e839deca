//! Dashboard library logic (§1.1, grounded in `original_source/src/manager/
//! dashboard.cpp`): polls the Manager's status port at 1 Hz, reconnecting
//! each time, and renders a fixed-width terminal table. Unlike the Manager
//! and Node Agent, the Dashboard is a terminal UI and writes directly to
//! stdout rather than through `tracing`.
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::sleep;

use crate::config::DashboardConfig;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
struct NodeRow {
    id: String,
    ip: String,
    port: String,
    memory_mb: String,
    health: String,
}

#[derive(Debug, Clone)]
struct TaskRow {
    id: String,
    status: String,
    assigned_node: String,
    memory_mb: String,
}

/// Poll the Manager forever. Returns only if every poll iteration is given
/// up on, which in practice never happens: connection failures are logged
/// to stderr and retried after `POLL_INTERVAL`, matching the prototype's
/// `while (true)` loop.
pub async fn run(config: DashboardConfig) {
    loop {
        match poll_once(&config).await {
            Ok(Some(snapshot)) => {
                let (nodes, tasks) = parse_snapshot(&snapshot);
                render(&nodes, &tasks);
            }
            Ok(None) => eprintln!("[DASHBOARD] empty snapshot from manager, retrying"),
            Err(err) => eprintln!("[DASHBOARD] {err}"),
        }
        sleep(POLL_INTERVAL).await;
    }
}

async fn poll_once(config: &DashboardConfig) -> std::io::Result<Option<String>> {
    let mut socket = TcpStream::connect((config.manager_ip, config.status_port)).await?;
    let mut data = String::new();
    socket.read_to_string(&mut data).await?;
    Ok(if data.is_empty() { None } else { Some(data) })
}

/// Parse the NODES/TASKS snapshot, skipping any line that doesn't split
/// into the expected field count rather than failing outright, matching
/// the prototype's tolerance for malformed lines.
fn parse_snapshot(data: &str) -> (Vec<NodeRow>, Vec<TaskRow>) {
    let mut nodes = Vec::new();
    let mut tasks = Vec::new();
    let mut section = "";

    for line in data.lines() {
        match line {
            "NODES" => {
                section = "NODES";
                continue;
            }
            "TASKS" => {
                section = "TASKS";
                continue;
            }
            "" => continue,
            _ => {}
        }

        let fields: Vec<&str> = line.split(',').collect();
        match section {
            "NODES" if fields.len() == 5 => nodes.push(NodeRow {
                id: fields[0].to_string(),
                ip: fields[1].to_string(),
                port: fields[2].to_string(),
                memory_mb: fields[3].to_string(),
                health: fields[4].to_string(),
            }),
            "TASKS" if fields.len() == 4 => tasks.push(TaskRow {
                id: fields[0].to_string(),
                status: fields[1].to_string(),
                assigned_node: fields[2].to_string(),
                memory_mb: fields[3].to_string(),
            }),
            _ => continue,
        }
    }

    (nodes, tasks)
}

fn render(nodes: &[NodeRow], tasks: &[TaskRow]) {
    print!("\x1B[2J\x1B[1;1H"); // clear screen, home cursor

    println!("+------------------- Nodes -----------------------------+");
    println!("| ID     | IP         | Port | Mem(MB) | Health |");
    println!("+--------+------------+------+---------+--------+");
    for n in nodes {
        let (color, reset) = if n.health == "UP" { ("\x1B[32m", "\x1B[0m") } else { ("\x1B[31m", "\x1B[0m") };
        println!(
            "| {:<6} | {:<10} | {:<4} | {:<7} | {color}{:<6}{reset} |",
            n.id, n.ip, n.port, n.memory_mb, n.health
        );
    }

    println!("+------------------- Tasks -------------------+");
    println!("| ID     | Status   | Node     | Mem(MB) |");
    println!("+--------+----------+----------+---------+");
    for t in tasks {
        println!("| {:<6} | {:<8} | {:<8} | {:<7} |", t.id, t.status, t.assigned_node, t.memory_mb);
    }
    println!("+---------------------------------------------+");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_sections_and_skips_malformed_lines() {
        let data = "NODES\nn1,127.0.0.1,7001,512,UP\nbad,line\nTASKS\nt1,QUEUED,,128\n";
        let (nodes, tasks) = parse_snapshot(data);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id, "n1");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, "QUEUED");
    }

    #[test]
    fn empty_input_yields_empty_sections() {
        let (nodes, tasks) = parse_snapshot("");
        assert!(nodes.is_empty());
        assert!(tasks.is_empty());
    }
}
