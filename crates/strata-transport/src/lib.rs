//! # strata-transport
//!
//! Connectionless datagram transport for the strata cluster.
//!
//! - **CBOR codec** helpers via [`codec`]
//! - **UDP datagram** send/receive via [`udp`]
//! - **One-shot rendezvous** used by the bring-up chain ping via
//!   [`udp::Rendezvous`]
//!
//! Every datagram carries exactly one CBOR-encoded
//! [`Message`](strata_types::Message). Replication is quorum-tolerant by
//! design, so a lost datagram is never retransmitted here; the caller
//! decides whether a send failure matters.

pub mod codec;
pub mod udp;

pub use udp::{Datagram, Rendezvous};

/// Ceiling on an encoded datagram. Full-state gossip payloads are the
/// largest messages on the wire and must fit in one datagram.
pub const MAX_DATAGRAM: usize = 65_536;

/// Error types for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// CBOR serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// CBOR deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Encoded message exceeds [`MAX_DATAGRAM`].
    #[error("message too large: {size} bytes, max {max}")]
    TooLarge { size: usize, max: usize },

    /// Socket error (bind, send, receive).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransportError::Serialization("bad".to_string());
        assert_eq!(err.to_string(), "serialization error: bad");

        let err = TransportError::TooLarge {
            size: 70_000,
            max: MAX_DATAGRAM,
        };
        assert!(err.to_string().contains("70000"));
    }
}
