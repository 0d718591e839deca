//! CLI argument parsing for the three binaries, one `clap::Parser` struct
//! each, mirroring the teacher's `loja-cli` derive style.
use std::net::Ipv4Addr;

use clap::Parser;

pub const DEFAULT_MANAGER_PORT: u16 = 5000;
pub const DEFAULT_STATUS_PORT: u16 = 6000;
pub const DEFAULT_HOST: Ipv4Addr = Ipv4Addr::new(0, 0, 0, 0);
pub const DEFAULT_MANAGER_IP: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 1);
pub const DEFAULT_NODE_MEMORY_MB: i64 = 512;

/// `manager [port]` (spec.md §6). The status port is a supplement: spec.md
/// only names it as a fixed default (6000), but an operator running more
/// than one Manager on a host needs to move it too.
#[derive(Debug, Parser)]
#[command(name = "manager", version, author)]
pub struct ManagerConfig {
    /// Transport port: node registration and client task submission.
    #[arg(default_value_t = DEFAULT_MANAGER_PORT)]
    pub port: u16,
    /// Status port: serves Dashboard snapshots.
    #[arg(long, default_value_t = DEFAULT_STATUS_PORT)]
    pub status_port: u16,
}

/// `node <node_id> <manager_ip> <manager_port> <listen_port>` (spec.md §6),
/// plus `--memory-mb` (§1.1 of SPEC_FULL.md).
#[derive(Debug, Parser)]
#[command(name = "node", version, author)]
pub struct NodeConfig {
    pub node_id: String,
    pub manager_ip: Ipv4Addr,
    pub manager_port: u16,
    pub listen_port: u16,
    /// Advertised available memory, in megabytes.
    #[arg(long, default_value_t = DEFAULT_NODE_MEMORY_MB)]
    pub memory_mb: i64,
}

/// `dashboard [manager_ip [status_port]]` (spec.md §6).
#[derive(Debug, Parser)]
#[command(name = "dashboard", version, author)]
pub struct DashboardConfig {
    #[arg(default_value_t = DEFAULT_MANAGER_IP)]
    pub manager_ip: Ipv4Addr,
    #[arg(default_value_t = DEFAULT_STATUS_PORT)]
    pub status_port: u16,
}
