//! # strata-causal
//!
//! The causal engine: clock-stamping send wrappers, the event-stream
//! registry that collects a read's replica responses, and quorum-bounded
//! causal arbitration.
//!
//! One engine per node. The engine owns the node's vector clock and the
//! stream registry; the transport is shared with the dispatcher.

pub mod engine;

pub use engine::CausalEngine;

use strata_transport::TransportError;
use strata_types::ClockError;

/// Error types for causal-engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Delivery named a stream that is not registered: the read was
    /// abandoned, already arbitrated, or never existed here.
    #[error("stream {0} not registered")]
    UnknownStream(String),

    /// Clock mutation failed (sender not in the view).
    #[error(transparent)]
    Clock(#[from] ClockError),

    /// The underlying transport send failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Convenience result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Read quorum for a shard of `replicas` nodes: a strict majority.
pub fn quorum(replicas: usize) -> usize {
    replicas / 2 + 1
}
