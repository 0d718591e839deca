use std::future::Future;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;

pub mod config;
pub mod dashboard;
pub mod error;
pub mod logging;
pub mod node_agent;

mod client_session;
mod connection;
mod health;
mod listener;
mod node_session;
mod scheduler;
mod shutdown;
mod state;
mod status;

pub use error::{Error, Result};
use shutdown::Shutdown;
use state::SharedState;

/// Run the Manager: the Transport Listener, Scheduler, Health Monitor, and
/// Status Publisher, wired to one shared state and one shutdown broadcast,
/// until `shutdown` completes (`tokio::signal::ctrl_c()` in production).
///
/// On shutdown, every registered node is sent `SHUTDOWN` over a fresh
/// one-shot connection to its listen port (§5) before the components are
/// joined and this function returns.
pub async fn run(transport_listener: TcpListener, status_listener: TcpListener, shutdown: impl Future<Output = ()>) {
    let state = SharedState::new();
    let (notify_shutdown, _) = broadcast::channel(1);

    let listener_task = tokio::spawn(listener::run(
        transport_listener,
        state.clone(),
        Shutdown::new(notify_shutdown.subscribe()),
    ));
    let scheduler_task = tokio::spawn(scheduler::run(state.clone(), Shutdown::new(notify_shutdown.subscribe())));
    let health_task = tokio::spawn(health::run(state.clone(), Shutdown::new(notify_shutdown.subscribe())));
    let status_task = tokio::spawn(status::run(
        status_listener,
        state.clone(),
        Shutdown::new(notify_shutdown.subscribe()),
    ));

    shutdown.await;
    info!("shutdown signal received, notifying components");

    drop(notify_shutdown);
    scheduler::shutdown_nodes(&state).await;

    let _ = tokio::join!(listener_task, scheduler_task, health_task, status_task);
}
