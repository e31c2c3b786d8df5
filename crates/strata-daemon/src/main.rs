//! strata-daemon: one replica of the strata key-value cluster.
//!
//! Single OS process on a Tokio runtime: the UDP dispatcher, the gossip
//! scheduler and the HTTP front-end all run here. The node id doubles as
//! both bind addresses - datagrams on UDP `host:port`, client REST on TCP
//! `host:port`.

mod config;
mod http;

use std::sync::Arc;

use tracing::{error, info};

use strata_node::{proto, Node};
use strata_transport::Datagram;

use crate::config::NodeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("strata=info".parse()?),
        )
        .init();

    info!("starting the distributed key-value store");

    // 1. Configuration from the environment
    let config = NodeConfig::from_env()?;
    info!(address = %config.address, view = config.view.len(), repl_factor = config.repl_factor, "configured");

    // 2. Bind the datagram transport on this node's address
    let transport = Arc::new(Datagram::bind(&config.address).await?);

    // 3. Assemble the node (oracle, causal engine, store)
    let node = Arc::new(Node::new(
        config.address.clone(),
        config.view,
        config.repl_factor,
        transport,
    )?);

    // 4. Dispatcher loop
    let dispatcher = tokio::spawn(Arc::clone(&node).serve());

    // 5. Bring-up: make sure every node is listening before clients arrive
    proto::chain_ping(&node).await?;
    info!("cluster bring-up complete");

    // 6. Anti-entropy
    tokio::spawn(proto::gossip_scheduler(Arc::clone(&node)));

    // 7. Client HTTP surface on the TCP side of the node address
    let listener = tokio::net::TcpListener::bind(&config.address).await?;
    info!(addr = %config.address, "HTTP front-end listening");
    let app = http::router(Arc::clone(&node));

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(err) = result {
                error!(%err, "HTTP server error");
            }
        }
        result = dispatcher => {
            match result {
                Ok(Err(err)) => error!(%err, "dispatcher failed"),
                Err(err) => error!(%err, "dispatcher task panicked"),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, shutting down");
        }
    }

    info!("node stopped");
    Ok(())
}
