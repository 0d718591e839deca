use anyhow::Context;
use clap::Parser;
use dispatchd::config::ManagerConfig;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _guard = dispatchd::logging::init_manager();

    let config = ManagerConfig::parse();

    let transport_listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("failed to bind transport port {}", config.port))?;
    let status_listener = TcpListener::bind(("0.0.0.0", config.status_port))
        .await
        .with_context(|| format!("failed to bind status port {}", config.status_port))?;

    tracing::info!(port = config.port, status_port = config.status_port, "manager starting");

    dispatchd::run(transport_listener, status_listener, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await;

    Ok(())
}
