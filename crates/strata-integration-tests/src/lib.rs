//! Shared helpers for the cluster scenarios under `tests/`.
//!
//! Every scenario runs a real cluster: one [`Node`] per member, each with
//! its own UDP socket on an ephemeral loopback port, dispatcher loops
//! running as background tasks. The HTTP front-end is not involved; the
//! scenarios drive the same core operations it would.

use std::sync::Arc;
use std::time::Duration;

use strata_node::{proto, Node};
use strata_transport::Datagram;
use strata_types::{Action, Message};

/// How long scenarios wait for fire-and-forget datagrams to land.
pub const SETTLE: Duration = Duration::from_millis(400);

/// Upper bound on any blocking step in a scenario.
pub const DEADLINE: Duration = Duration::from_secs(5);

/// Bring up a cluster of `n` nodes with the given replication factor.
///
/// Every node serves its dispatcher loop in the background.
pub async fn cluster(n: usize, repl_factor: usize) -> Vec<Arc<Node>> {
    cluster_with_silence(n, repl_factor, &[]).await
}

/// Same as [`cluster`], but the nodes at the given indices (in bind order)
/// never run their dispatcher: their sockets exist, so sends to them
/// succeed, but every datagram is ignored. Models a silent replica.
pub async fn cluster_with_silence(
    n: usize,
    repl_factor: usize,
    silent: &[usize],
) -> Vec<Arc<Node>> {
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
    for (i, transport) in transports.into_iter().enumerate() {
        let id = transport.local_addr().to_string();
        let node =
            Arc::new(Node::new(id, view.clone(), repl_factor, transport).expect("valid cluster"));
        if !silent.contains(&i) {
            tokio::spawn(Arc::clone(&node).serve());
        }
        nodes.push(node);
    }
    nodes
}

/// Issue a client write at `issuer`: fan `key:value` to the owning shard
/// and apply locally when the issuer is a replica (the front-end's PUT
/// path without HTTP).
pub fn client_put(issuer: &Arc<Node>, key: &str, value: &str) {
    let msg = Message::new(
        issuer.id(),
        Action::Put,
        format!("{key}:{value}").into_bytes(),
    );
    if proto::key_op(issuer, &msg) {
        issuer.store().put(key, value);
    }
}

/// Issue a client read at `issuer` and block until quorum (the front-end's
/// GET path without HTTP).
pub async fn client_get(issuer: &Arc<Node>, key: &str) -> String {
    let (stream_id, rx) = issuer.engine().new_event_stream();
    let msg = Message::with_stream(
        issuer.id(),
        Action::Get,
        key.as_bytes().to_vec(),
        stream_id.clone(),
    );

    let local = proto::key_op(issuer, &msg);
    if local {
        let value = issuer.store().get(key).unwrap_or_default();
        let mut own = Message::with_stream(
            issuer.id(),
            Action::Read,
            value.into_bytes(),
            stream_id.clone(),
        );
        own.context = issuer.engine().clock_snapshot();
        issuer.engine().deliver(own).expect("stream just opened");
    }

    issuer.engine().order_events(&stream_id, rx).await.payload_str()
}

/// Find a key that the cluster maps to the wanted shard.
pub fn key_for_shard(node: &Node, shard: usize) -> String {
    (0..10_000)
        .map(|i| format!("key-{i}"))
        .find(|key| node.oracle().get_match(key) == shard)
        .unwrap_or_default()
}

/// The node owning a given id.
pub fn node_by_id<'a>(nodes: &'a [Arc<Node>], id: &str) -> &'a Arc<Node> {
    nodes
        .iter()
        .find(|node| node.id() == id)
        .unwrap_or(&nodes[0])
}
