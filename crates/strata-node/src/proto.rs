//! Replication protocols: write/read fan-out, gossip anti-entropy, the
//! bring-up chain ping, and the diagnostic broadcast.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use strata_store::map_from_bytes;
use strata_types::{Action, Message};

use crate::{Node, Result};

/// Cadence of the gossip election.
pub const GOSSIP_TICK: Duration = Duration::from_secs(2);

/// Delay between peers within one gossip round.
pub const GOSSIP_STEP: Duration = Duration::from_millis(100);

/// The token a key operation is partitioned on: for writes the key part of
/// the `key:value` payload, for everything else the whole payload.
pub fn partition_token(msg: &Message) -> String {
    let payload = msg.payload_str();
    match msg.action {
        Action::Put => payload
            .split_once(':')
            .map(|(key, _)| key.to_string())
            .unwrap_or(payload),
        _ => payload,
    }
}

/// Ship a key operation to its shard.
///
/// Every non-local replica of the owning shard is sent the message in a
/// spawned task (fire-and-forget: a failed send is logged and resolved by
/// quorum tolerance or gossip, never retried here). Returns whether the
/// local node is itself a replica of the owning shard and must apply the
/// operation too.
pub fn key_op(node: &Arc<Node>, msg: &Message) -> bool {
    let token = partition_token(msg);
    let shard = node.oracle().get_match(&token);
    let mut local = false;

    for replica in node.oracle().shard_replicas(shard) {
        if replica == node.id() {
            local = true;
            continue;
        }

        let engine = Arc::clone(node.engine());
        let peer = replica.clone();
        let fanned = msg.clone();
        tokio::spawn(async move {
            if let Err(err) = engine.send(&peer, fanned).await {
                tracing::warn!(%peer, %err, "replica send failed");
            }
        });
    }

    tracing::debug!(token = %token, shard, local, "key op routed");
    local
}

/// Bring-up chain ping: establish that every node in the view is listening
/// before the front-end opens.
///
/// The first node of the sorted view sends an `are you up?` probe to the
/// second; every later node blocks on its one-shot rendezvous until the
/// probe arrives, then forwards it to its successor. The last node only
/// consumes the probe. A single-node view has nothing to prove.
///
/// # Errors
///
/// Returns an engine error if the probe cannot be sent.
pub async fn chain_ping(node: &Node) -> Result<()> {
    let view = node.oracle().view();
    if view.len() <= 1 {
        return Ok(());
    }

    let Some(index) = node.oracle().view_index(node.id()) else {
        tracing::warn!(id = node.id(), "not in own view, skipping chain ping");
        return Ok(());
    };

    let probe = Message::new(node.id(), Action::Signal, b"are you up?".to_vec());

    if index == 0 {
        tracing::info!(to = %view[1], "starting bring-up chain");
        node.engine().send_without_event(&view[1], probe).await?;
        return Ok(());
    }

    node.transport().wait_for_signal().await;

    if index + 1 < view.len() {
        tracing::info!(to = %view[index + 1], "forwarding bring-up chain");
        node.engine()
            .send_without_event(&view[index + 1], probe)
            .await?;
    } else {
        tracing::info!("bring-up chain complete");
    }
    Ok(())
}

/// Gossip scheduler: every tick, hold a local lottery over the shard's
/// replica list; when it lands on this node, run one anti-entropy round.
///
/// Runs until the task is dropped.
///
/// # Errors
///
/// Returns a ring error if this node belongs to no shard (view
/// inconsistency, fatal at startup).
pub async fn gossip_scheduler(node: Arc<Node>) -> Result<()> {
    let replicas: Vec<String> = node.oracle().peer_replicas(node.id())?.to_vec();

    let mut tick = tokio::time::interval(GOSSIP_TICK);
    tick.tick().await; // consume the immediate first tick

    loop {
        tick.tick().await;

        if replicas.len() <= 1 {
            continue;
        }

        let elected = {
            let i = rand::thread_rng().gen_range(0..replicas.len());
            replicas[i].clone()
        };
        if elected == node.id() {
            tracing::debug!("gossip round starting");
            if let Err(err) = gossip_round(&node, &replicas).await {
                tracing::warn!(%err, "gossip round aborted");
            }
        }
    }
}

/// One gossip round: visit every other replica of the shard once, in random
/// order, shipping the full local store and the current clock to each.
///
/// # Errors
///
/// Returns a store error if the local contents cannot be serialized.
pub async fn gossip_round(node: &Node, replicas: &[String]) -> Result<()> {
    let mut not_seen: Vec<String> = replicas
        .iter()
        .filter(|replica| *replica != node.id())
        .cloned()
        .collect();

    let mut step = tokio::time::interval(GOSSIP_STEP);
    while !not_seen.is_empty() {
        step.tick().await;

        let peer = {
            let i = rand::thread_rng().gen_range(0..not_seen.len());
            not_seen.swap_remove(i)
        };

        let payload = node.store().to_bytes()?;
        let msg = Message::new(node.id(), Action::Gossip, payload);
        if let Err(err) = node.engine().send_without_event(&peer, msg).await {
            tracing::warn!(%peer, %err, "gossip send failed");
        }
    }

    tracing::debug!("gossip round done");
    Ok(())
}

/// Receive a peer's gossip: when the peer's clock dominates ours, merge its
/// full state into the local store (remote wins per key).
///
/// The merge lock serializes concurrent receptions so two rounds cannot
/// interleave partial updates. Gossip observes history rather than
/// extending it, so the local clock is left untouched.
pub async fn recv_gossip(node: &Node, msg: Message) {
    let _merge = node.gossip_merge.lock().await;

    let local = node.engine().clock_snapshot();
    let (peer_ahead, _) = msg.context.dominates(&local);
    if !peer_ahead {
        tracing::debug!(from = %msg.src_addr, "gossip ignored, peer not ahead");
        return;
    }

    match map_from_bytes(&msg.payload) {
        Ok(remote) => {
            let entries = remote.len();
            node.store().merge(remote);
            tracing::info!(from = %msg.src_addr, entries, "gossip merged");
        }
        Err(err) => tracing::warn!(from = %msg.src_addr, %err, "gossip payload undecodable"),
    }
}

/// Diagnostic fan-out: tell every node in the view we are here. No clock
/// event, no reply expected.
pub async fn broadcast(node: &Node) {
    for member in node.oracle().view() {
        if member == node.id() {
            continue;
        }
        let msg = Message::new(node.id(), Action::Broadcast, b"broadcasting".to_vec());
        if let Err(err) = node.engine().send_without_event(member, msg).await {
            tracing::warn!(to = %member, %err, "broadcast send failed");
        }
    }
}
