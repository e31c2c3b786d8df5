//! # strata-node
//!
//! The node runtime: the message dispatcher gluing transport, store, clock
//! and causal engine together, and the replication protocols layered on top
//! of them (write fan-out, quorum reads, gossip anti-entropy, chain
//! bring-up, broadcast).

pub mod node;
pub mod proto;

#[cfg(test)]
pub(crate) mod testutil;

pub use node::Node;

use strata_causal::EngineError;
use strata_ring::RingError;
use strata_store::StoreError;
use strata_transport::TransportError;

/// Error types for node construction and protocol runs.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// Oracle construction or membership lookup failed.
    #[error(transparent)]
    Ring(#[from] RingError),

    /// Causal engine operation failed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Store serialization failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Transport failed fatally (the receive loop cannot continue).
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Convenience result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
