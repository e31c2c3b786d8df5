//! Event streams and quorum arbitration.
//!
//! A read opens a stream: a bounded channel whose capacity is the read
//! quorum. Dispatcher tasks deliver `read` responses into the stream by id;
//! the issuing task consumes them and arbitrates causally. The registry
//! entry is the stream's lifetime: once removed, late deliveries drop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;

use strata_transport::Datagram;
use strata_types::{Action, Message, VectorClock};

use crate::{quorum, EngineError, Result};

/// The causal engine: owns the node's vector clock and the event-stream
/// registry, and stamps causal context onto outbound messages.
pub struct CausalEngine {
    addr: String,
    quorum: usize,
    clock: Mutex<VectorClock>,
    streams: Mutex<HashMap<String, mpsc::Sender<Message>>>,
    transport: Arc<Datagram>,
}

impl CausalEngine {
    /// Build the engine for a node.
    ///
    /// `replicas` is the per-shard replica count; the read quorum is a
    /// strict majority of it. The clock starts with a zero entry for every
    /// view member.
    pub fn new<I, S>(addr: impl Into<String>, view: I, replicas: usize, transport: Arc<Datagram>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let addr = addr.into();
        let quorum = quorum(replicas);
        tracing::info!(%addr, replicas, quorum, "causal engine ready");

        Self {
            addr,
            quorum,
            clock: Mutex::new(VectorClock::from_view(view)),
            streams: Mutex::new(HashMap::new()),
            transport,
        }
    }

    /// This node's id.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// The read quorum in effect.
    pub fn quorum(&self) -> usize {
        self.quorum
    }

    /// A copy of the current clock.
    pub fn clock_snapshot(&self) -> VectorClock {
        self.lock_clock().clone()
    }

    /// Advance the clock entry for `node` (an observed fresh event).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Clock`] if `node` is not in the view.
    pub fn increment(&self, node: &str) -> Result<()> {
        self.lock_clock().increment(node)?;
        Ok(())
    }

    /// Stamp the current clock onto `msg`, advance our own entry, and send.
    ///
    /// The stamp is taken before the increment: the receiver's refinement
    /// check expects the message to carry the history *before* this send
    /// event.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Clock`] if this node is somehow missing from
    /// its own clock, or [`EngineError::Transport`] if the send fails.
    pub async fn send(&self, addr: &str, mut msg: Message) -> Result<()> {
        {
            let mut clock = self.lock_clock();
            msg.context = clock.clone();
            clock.increment(&self.addr)?;
        }
        self.transport.send(addr, &msg).await?;
        Ok(())
    }

    /// Stamp the current clock onto `msg` and send without advancing the
    /// clock. Bring-up probes and gossip observe history, they do not
    /// extend it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Transport`] if the send fails.
    pub async fn send_without_event(&self, addr: &str, mut msg: Message) -> Result<()> {
        msg.context = self.clock_snapshot();
        self.transport.send(addr, &msg).await?;
        Ok(())
    }

    /// Open a new event stream for a read.
    ///
    /// Returns the stream id and the receiving end; the caller owns the
    /// receiver and must finish with [`CausalEngine::order_events`] (or drop
    /// it to abandon the read - late deliveries then drop).
    pub fn new_event_stream(&self) -> (String, mpsc::Receiver<Message>) {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let id = format!("{nanos}{}", self.addr);

        let (tx, rx) = mpsc::channel(self.quorum);
        self.lock_streams().insert(id.clone(), tx);
        (id, rx)
    }

    /// Deliver a `read` response into its stream.
    ///
    /// A full channel means the quorum is already satisfied; the message is
    /// dropped silently. An unknown stream id is an error the dispatcher
    /// logs: the response arrived late or the read was abandoned.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownStream`] when no stream matches.
    pub fn deliver(&self, msg: Message) -> Result<()> {
        let sender = {
            let streams = self.lock_streams();
            streams.get(&msg.stream_id).cloned()
        };

        let Some(sender) = sender else {
            return Err(EngineError::UnknownStream(msg.stream_id));
        };

        if let Err(err) = sender.try_send(msg) {
            tracing::debug!(error = %err, "stream at capacity, response dropped");
        }
        Ok(())
    }

    /// Consume the stream until quorum and return the causally dominant
    /// response.
    ///
    /// `best` starts as a sentinel (empty payload, empty clock) that any
    /// response supersedes. A response whose payload equals the current
    /// best's byte-for-byte is counted toward quorum but skips clock
    /// comparison: identical replies are agreement, not divergence. The
    /// final result depends only on the set of delivered messages, not
    /// their order.
    pub async fn order_events(&self, id: &str, mut rx: mpsc::Receiver<Message>) -> Message {
        let mut best = Message::new("", Action::Read, Vec::new());
        let mut seen = 0;

        while seen < self.quorum {
            let Some(msg) = rx.recv().await else {
                break;
            };
            tracing::debug!(src = %msg.src_addr, "arbitrating response");

            if msg.payload != best.payload
                && msg.context.causally_follows(&msg.src_addr, &best.context)
            {
                best = msg;
            }
            seen += 1;
        }

        self.lock_streams().remove(id);
        best
    }

    fn lock_clock(&self) -> std::sync::MutexGuard<'_, VectorClock> {
        self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_streams(&self) -> std::sync::MutexGuard<'_, HashMap<String, mpsc::Sender<Message>>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIEW: [&str; 3] = ["n0:1", "n1:1", "n2:1"];

    async fn engine_for(addr: &str) -> CausalEngine {
        let transport = Arc::new(Datagram::bind("127.0.0.1:0").await.expect("bind"));
        CausalEngine::new(addr, VIEW, 3, transport)
    }

    fn read_msg(src: &str, id: &str, payload: &str, context: VectorClock) -> Message {
        let mut msg = Message::with_stream(src, Action::Read, payload.as_bytes().to_vec(), id);
        msg.context = context;
        msg
    }

    fn clock(entries: &[(&str, u64)]) -> VectorClock {
        let mut vc = VectorClock::from_view(VIEW);
        for (node, count) in entries {
            for _ in 0..*count {
                vc.increment(node).expect("view member");
            }
        }
        vc
    }

    #[tokio::test]
    async fn test_send_stamps_before_increment() {
        let engine = engine_for("n0:1").await;
        let peer = Datagram::bind("127.0.0.1:0").await.expect("bind");

        let msg = Message::new("n0:1", Action::Put, b"k:v".to_vec());
        engine
            .send(&peer.local_addr().to_string(), msg)
            .await
            .expect("send");

        let received = peer.recv().await.expect("decode");
        // the wire context predates the send event
        assert_eq!(received.context.entry("n0:1"), Some(0));
        assert_eq!(engine.clock_snapshot().entry("n0:1"), Some(1));
    }

    #[tokio::test]
    async fn test_send_without_event_keeps_clock() {
        let engine = engine_for("n0:1").await;
        let peer = Datagram::bind("127.0.0.1:0").await.expect("bind");

        engine.increment("n0:1").expect("in view");
        engine
            .send_without_event(
                &peer.local_addr().to_string(),
                Message::new("n0:1", Action::Gossip, Vec::new()),
            )
            .await
            .expect("send");

        let received = peer.recv().await.expect("decode");
        // gossip carries the current clock without advancing it
        assert_eq!(received.context.entry("n0:1"), Some(1));
        assert_eq!(engine.clock_snapshot().entry("n0:1"), Some(1));
    }

    #[tokio::test]
    async fn test_deliver_unknown_stream_is_error() {
        let engine = engine_for("n0:1").await;
        let msg = read_msg("n1:1", "no-such-stream", "v", VectorClock::default());
        let err = engine.deliver(msg).expect_err("stream does not exist");
        assert!(matches!(err, EngineError::UnknownStream(_)));
    }

    #[tokio::test]
    async fn test_order_events_picks_dominant_clock() {
        let engine = engine_for("n0:1").await;
        let (id, rx) = engine.new_event_stream();

        // n1 answered before observing n2; n2 observed n1's write first
        let older = read_msg("n1:1", &id, "v1", clock(&[("n1:1", 1)]));
        let newer = read_msg("n2:1", &id, "v2", clock(&[("n1:1", 1), ("n2:1", 1)]));

        engine.deliver(older).expect("stream open");
        engine.deliver(newer).expect("stream open");

        let best = engine.order_events(&id, rx).await;
        assert_eq!(best.payload_str(), "v2");
        assert_eq!(best.src_addr, "n2:1");
    }

    #[tokio::test]
    async fn test_order_events_is_order_independent() {
        let engine = engine_for("n0:1").await;
        let (id, rx) = engine.new_event_stream();

        // same pair, delivered in the opposite order
        let newer = read_msg("n2:1", &id, "v2", clock(&[("n1:1", 1), ("n2:1", 1)]));
        let older = read_msg("n1:1", &id, "v1", clock(&[("n1:1", 1)]));

        engine.deliver(newer).expect("stream open");
        engine.deliver(older).expect("stream open");

        let best = engine.order_events(&id, rx).await;
        assert_eq!(best.payload_str(), "v2");
    }

    #[tokio::test]
    async fn test_identical_payloads_skip_clock_comparison() {
        let engine = engine_for("n0:1").await;
        let (id, rx) = engine.new_event_stream();

        // concurrent (incomparable) clocks but the same value
        engine
            .deliver(read_msg("n1:1", &id, "same", clock(&[("n1:1", 2)])))
            .expect("stream open");
        engine
            .deliver(read_msg("n2:1", &id, "same", clock(&[("n2:1", 2)])))
            .expect("stream open");

        let best = engine.order_events(&id, rx).await;
        assert_eq!(best.payload_str(), "same");
    }

    #[tokio::test]
    async fn test_sentinel_returned_when_stream_closes_empty() {
        let engine = engine_for("n0:1").await;
        let (id, rx) = engine.new_event_stream();

        // abandon: remove the producer side before anything arrives
        engine.lock_streams().remove(&id);

        let best = engine.order_events(&id, rx).await;
        assert!(best.payload.is_empty());
        assert!(best.src_addr.is_empty());
    }

    #[tokio::test]
    async fn test_stream_deregistered_after_arbitration() {
        let engine = engine_for("n0:1").await;
        let (id, rx) = engine.new_event_stream();

        engine
            .deliver(read_msg("n1:1", &id, "v", clock(&[("n1:1", 1)])))
            .expect("stream open");
        engine
            .deliver(read_msg("n2:1", &id, "v", clock(&[("n2:1", 1)])))
            .expect("stream open");
        let _ = engine.order_events(&id, rx).await;

        // late response: the stream is gone
        let late = read_msg("n2:1", &id, "v", clock(&[("n2:1", 2)]));
        assert!(matches!(
            engine.deliver(late),
            Err(EngineError::UnknownStream(_))
        ));
    }

    #[tokio::test]
    async fn test_overflow_delivery_dropped_silently() {
        let engine = engine_for("n0:1").await;
        let (id, rx) = engine.new_event_stream();
        assert_eq!(engine.quorum(), 2);

        for src in ["n0:1", "n1:1", "n2:1"] {
            // third delivery exceeds channel capacity and is dropped, not an error
            engine
                .deliver(read_msg(src, &id, "v", VectorClock::default()))
                .expect("stream open");
        }

        let best = engine.order_events(&id, rx).await;
        assert_eq!(best.payload_str(), "v");
    }
}
