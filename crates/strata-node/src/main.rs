//! strata-node: one overlay node.
//!
//! Single OS process running a Tokio async runtime. Operator commands
//! arrive on stdin; routing control, ring control, and search transfers
//! each use their own UDP port.

mod commands;
mod config;
mod runtime;

use tracing::info;

use crate::config::NodeConfig;
use crate::runtime::Node;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("strata=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    // 1. Load config
    let config = NodeConfig::load()?;
    info!(
        node = config.node.number,
        interfaces = config.node.interfaces.len(),
        "strata node starting"
    );

    // 2. Bind sockets, build engines, spawn readers
    let (mut node, events) = Node::new(config).await?;

    // 3. Run the serial event loop until stdin closes or ctrl-c
    node.run(events).await?;

    Ok(())
}
