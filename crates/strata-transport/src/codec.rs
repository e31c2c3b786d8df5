//! CBOR serialization helpers for the wire protocol.
//!
//! Wraps [`ciborium`] so that every encode/decode site gets a typed
//! [`TransportError`] instead of a library error. CBOR maps carry the
//! vector-clock context; the clock type is an ordered map, so two decodings
//! of the same clock compare equal regardless of wire key order.

use serde::{de::DeserializeOwned, Serialize};

use crate::TransportError;

/// Serialize a value to CBOR bytes.
///
/// # Errors
///
/// Returns [`TransportError::Serialization`] if the value cannot be encoded.
pub fn to_vec<T: Serialize>(value: &T) -> Result<Vec<u8>, TransportError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| TransportError::Serialization(format!("CBOR encode failed: {e}")))?;
    Ok(buf)
}

/// Deserialize a value from CBOR bytes.
///
/// # Errors
///
/// Returns [`TransportError::Deserialization`] if the bytes do not decode
/// into the target type.
pub fn from_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T, TransportError> {
    ciborium::from_reader(data)
        .map_err(|e| TransportError::Deserialization(format!("CBOR decode failed: {e}")))
}
