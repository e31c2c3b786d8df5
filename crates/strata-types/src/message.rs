//! Wire-message envelope for node-to-node traffic.
//!
//! Every datagram exchanged between strata nodes carries exactly one
//! [`Message`]. The envelope is CBOR-serialized by the transport layer.
//!
//! ```text
//! Message {
//!     src_addr:  String,      // logical node id (host:port)
//!     stream_id: String,      // read-correlation token, empty otherwise
//!     payload:   Vec<u8>,     // interpretation depends on `action`
//!     action:    Action,      // put | get | read | gossip | signal | broadcast
//!     context:   VectorClock, // causal history carried with the message
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::clock::VectorClock;

/// The closed set of actions a [`Message`] can carry.
///
/// Serialized names are stable wire strings; adding a variant is a protocol
/// change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Replicate a `key:value` pair into the owning shard.
    Put,
    /// Ask a replica for its value of the key in the payload.
    Get,
    /// A replica's response to a `get`, delivered into an event stream.
    Read,
    /// Full-state anti-entropy transfer between shard replicas.
    Gossip,
    /// Bring-up probe; releases the receiver's one-shot rendezvous.
    Signal,
    /// Diagnostic fan-out to the whole view.
    Broadcast,
}

impl Action {
    /// The stable wire name of this action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Put => "put",
            Action::Get => "get",
            Action::Read => "read",
            Action::Gossip => "gossip",
            Action::Signal => "signal",
            Action::Broadcast => "broadcast",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tagged record carried by one datagram.
///
/// Messages are immutable after construction and transported by value; the
/// sending side stamps `context` immediately before encoding.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Logical id (`host:port`) of the originating node.
    pub src_addr: String,
    /// Correlation token tying a `read` response back to the event stream
    /// of the issuing `get`. Empty for uncorrelated messages.
    pub stream_id: String,
    /// Opaque payload bytes; interpretation depends on [`Action`].
    pub payload: Vec<u8>,
    /// What the receiver should do with this message.
    pub action: Action,
    /// The sender's causal history at send time.
    pub context: VectorClock,
}

impl Message {
    /// Build a message with an empty clock; the causal engine stamps the
    /// context on send.
    pub fn new(src_addr: impl Into<String>, action: Action, payload: Vec<u8>) -> Self {
        Self {
            src_addr: src_addr.into(),
            stream_id: String::new(),
            payload,
            action,
            context: VectorClock::default(),
        }
    }

    /// Same as [`Message::new`] with a stream correlation token attached.
    pub fn with_stream(
        src_addr: impl Into<String>,
        action: Action,
        payload: Vec<u8>,
        stream_id: impl Into<String>,
    ) -> Self {
        Self {
            stream_id: stream_id.into(),
            ..Self::new(src_addr, action, payload)
        }
    }

    /// The payload interpreted as UTF-8 text (lossy).
    ///
    /// `put`, `get` and `read` payloads are textual; gossip payloads are
    /// CBOR and should not go through this accessor.
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}
