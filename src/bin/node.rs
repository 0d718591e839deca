use clap::Parser;
use dispatchd::config::NodeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dispatchd::logging::init_stdout();

    let config = NodeConfig::parse();
    dispatchd::node_agent::run(config).await?;
    Ok(())
}
