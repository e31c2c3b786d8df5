//! Shared helpers for in-crate tests.

use std::sync::Arc;

use strata_transport::Datagram;

use crate::Node;

/// Bind `n` loopback transports and assemble one node per address, all
/// sharing the resulting view. Serve loops run in the background for the
/// lifetime of the test runtime.
pub(crate) async fn cluster(n: usize, repl_factor: usize) -> Vec<Arc<Node>> {
    let mut transports = Vec::with_capacity(n);
    for _ in 0..n {
        transports.push(Arc::new(
            Datagram::bind("127.0.0.1:0").await.expect("bind"),
        ));
    }
    let view: Vec<String> = transports
        .iter()
        .map(|t| t.local_addr().to_string())
        .collect();

    let mut nodes = Vec::with_capacity(n);
    for transport in transports {
        let id = transport.local_addr().to_string();
        let node =
            Arc::new(Node::new(id, view.clone(), repl_factor, transport).expect("valid cluster"));
        tokio::spawn(Arc::clone(&node).serve());
        nodes.push(node);
    }
    nodes
}
