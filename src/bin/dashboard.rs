use clap::Parser;
use dispatchd::config::DashboardConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = DashboardConfig::parse();
    dispatchd::dashboard::run(config).await;
    Ok(())
}
