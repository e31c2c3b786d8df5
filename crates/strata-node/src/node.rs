//! The node dispatcher.
//!
//! One [`Node`] per process. The serve loop reads datagrams off the
//! transport and hands each decoded message to [`Node::handle`] in its own
//! task; the handler routes on the message action.
//!
//! Only `put` and `get` advance the clock: they represent fresh causal
//! history. `read` and `gossip` are observations of history already made
//! elsewhere.

use std::sync::Arc;

use tokio::sync::Mutex;

use strata_causal::CausalEngine;
use strata_ring::Oracle;
use strata_store::Store;
use strata_transport::{Datagram, TransportError};
use strata_types::{Action, Message};

use crate::{proto, Result};

/// A cluster node: identity, partitioner, causal engine, local store and
/// transport, plus the merge lock serializing gossip receptions.
pub struct Node {
    id: String,
    oracle: Oracle,
    engine: Arc<CausalEngine>,
    store: Arc<Store>,
    transport: Arc<Datagram>,
    pub(crate) gossip_merge: Mutex<()>,
}

impl Node {
    /// Assemble a node over an already-bound transport.
    ///
    /// # Errors
    ///
    /// Returns a ring error when the view and replication factor cannot
    /// form at least one shard; this is fatal at startup.
    pub fn new(
        id: impl Into<String>,
        view: Vec<String>,
        repl_factor: usize,
        transport: Arc<Datagram>,
    ) -> Result<Self> {
        let id = id.into();
        let oracle = Oracle::new(id.clone(), view.clone(), repl_factor)?;
        let engine = Arc::new(CausalEngine::new(
            id.clone(),
            view,
            oracle.num_replicas(),
            Arc::clone(&transport),
        ));

        Ok(Self {
            id,
            oracle,
            engine,
            store: Arc::new(Store::new()),
            transport,
            gossip_merge: Mutex::new(()),
        })
    }

    /// This node's logical id (`host:port`).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The partitioning oracle.
    pub fn oracle(&self) -> &Oracle {
        &self.oracle
    }

    /// The causal engine.
    pub fn engine(&self) -> &Arc<CausalEngine> {
        &self.engine
    }

    /// The local key-value store.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// The datagram transport.
    pub fn transport(&self) -> &Arc<Datagram> {
        &self.transport
    }

    /// Receive loop: decode datagrams and dispatch each message in its own
    /// task. Malformed datagrams are dropped with a log entry; socket
    /// errors are fatal.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the socket fails.
    pub async fn serve(self: Arc<Self>) -> Result<()> {
        loop {
            match self.transport.recv().await {
                Ok(msg) => {
                    let node = Arc::clone(&self);
                    tokio::spawn(async move {
                        node.handle(msg).await;
                    });
                }
                Err(TransportError::Deserialization(err)) => {
                    tracing::warn!(%err, "dropping malformed datagram");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Route one inbound message.
    pub async fn handle(&self, msg: Message) {
        tracing::trace!(action = %msg.action, src = %msg.src_addr, "dispatch");
        match msg.action {
            Action::Signal => self.transport.signal(),
            Action::Put => self.apply_put(&msg),
            Action::Get => self.answer_get(msg).await,
            Action::Read => {
                if let Err(err) = self.engine.deliver(msg) {
                    tracing::debug!(%err, "read response dropped");
                }
            }
            Action::Gossip => proto::recv_gossip(self, msg).await,
            Action::Broadcast => {
                tracing::debug!(src = %msg.src_addr, "broadcast received");
            }
        }
    }

    /// A replicated write reaching this replica: `key:value` in the
    /// payload, split at the first colon so values may contain colons.
    fn apply_put(&self, msg: &Message) {
        let payload = msg.payload_str();
        let Some((key, value)) = payload.split_once(':') else {
            tracing::warn!(src = %msg.src_addr, "put payload without separator, skipped");
            return;
        };

        if let Err(err) = self.engine.increment(&msg.src_addr) {
            tracing::warn!(%err, "clock not advanced for put");
        }
        self.store.put(key, value);
        tracing::debug!(key, src = %msg.src_addr, "replica write applied");
    }

    /// A quorum-read probe reaching this replica: look the key up locally
    /// and answer the source with a `read` carrying the original stream id.
    /// A missing key answers with an empty value; the requester's quorum
    /// decides what that means.
    async fn answer_get(&self, msg: Message) {
        if let Err(err) = self.engine.increment(&msg.src_addr) {
            tracing::warn!(%err, "clock not advanced for get");
        }

        let key = msg.payload_str();
        let value = self.store.get(&key).unwrap_or_default();

        let reply = Message::with_stream(
            self.id.clone(),
            Action::Read,
            value.into_bytes(),
            msg.stream_id,
        );
        if let Err(err) = self.engine.send(&msg.src_addr, reply).await {
            tracing::warn!(%err, to = %msg.src_addr, "read reply failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::testutil::cluster;

    #[tokio::test]
    async fn test_put_applies_and_advances_clock() {
        let nodes = cluster(2, 2).await;
        let (a, b) = (&nodes[0], &nodes[1]);

        let msg = Message::new(b.id(), Action::Put, b"foo:bar".to_vec());
        a.handle(msg).await;

        assert_eq!(a.store().get("foo").as_deref(), Some("bar"));
        assert_eq!(a.engine().clock_snapshot().entry(b.id()), Some(1));
    }

    #[tokio::test]
    async fn test_put_value_may_contain_colons() {
        let nodes = cluster(1, 1).await;
        let node = &nodes[0];

        let msg = Message::new(node.id(), Action::Put, b"url:http://host:80".to_vec());
        node.handle(msg).await;
        assert_eq!(node.store().get("url").as_deref(), Some("http://host:80"));
    }

    #[tokio::test]
    async fn test_malformed_put_skipped() {
        let nodes = cluster(2, 2).await;
        let (a, b) = (&nodes[0], &nodes[1]);

        let msg = Message::new(b.id(), Action::Put, b"no separator".to_vec());
        a.handle(msg).await;

        assert!(a.store().is_empty());
        // a skipped action leaves the clock alone
        assert!(a.engine().clock_snapshot().is_baseline());
    }

    #[tokio::test]
    async fn test_put_from_unknown_source_still_stored() {
        let nodes = cluster(1, 1).await;
        let node = &nodes[0];

        let msg = Message::new("stranger:9", Action::Put, b"k:v".to_vec());
        node.handle(msg).await;
        // view inconsistency is logged, not fatal
        assert_eq!(node.store().get("k").as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_get_answers_with_read_into_stream() {
        let nodes = cluster(2, 2).await;
        let (responder, requester) = (&nodes[0], &nodes[1]);
        responder.store().put("foo", "bar");

        let (id, rx) = requester.engine().new_event_stream();
        let get = Message::with_stream(requester.id(), Action::Get, b"foo".to_vec(), id.clone());
        requester
            .engine()
            .send_without_event(responder.id(), get)
            .await
            .expect("send get");

        // quorum of 2: inline our own (empty) answer like the read path does
        let mut own = Message::with_stream(requester.id(), Action::Read, Vec::new(), id.clone());
        own.context = requester.engine().clock_snapshot();
        requester.engine().deliver(own).expect("stream open");

        let best = tokio::time::timeout(
            Duration::from_secs(5),
            requester.engine().order_events(&id, rx),
        )
        .await
        .expect("quorum must be reached");
        assert_eq!(best.payload_str(), "bar");
        assert_eq!(best.src_addr, responder.id());
    }

    #[tokio::test]
    async fn test_get_missing_key_answers_empty() {
        let nodes = cluster(2, 2).await;
        let (responder, requester) = (&nodes[0], &nodes[1]);

        let (id, rx) = requester.engine().new_event_stream();
        let get = Message::with_stream(requester.id(), Action::Get, b"absent".to_vec(), id.clone());
        requester
            .engine()
            .send_without_event(responder.id(), get)
            .await
            .expect("send get");

        // quorum of 2: inline our own (also empty) answer
        let mut own = Message::with_stream(requester.id(), Action::Read, Vec::new(), id.clone());
        own.context = requester.engine().clock_snapshot();
        requester.engine().deliver(own).expect("stream open");

        let best = tokio::time::timeout(
            Duration::from_secs(5),
            requester.engine().order_events(&id, rx),
        )
        .await
        .expect("quorum must be reached");
        assert!(best.payload.is_empty());
    }

    #[tokio::test]
    async fn test_signal_releases_rendezvous() {
        let nodes = cluster(1, 1).await;
        let node = &nodes[0];

        node.handle(Message::new(node.id(), Action::Signal, Vec::new()))
            .await;
        tokio::time::timeout(Duration::from_secs(1), node.transport().wait_for_signal())
            .await
            .expect("signal must release the waiter");
    }
}
