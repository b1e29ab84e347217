//! Wire codec for stream messages.
//!
//! JSON throughout; the producer and consumer of a given stream must use the
//! same codec, so every stage goes through these two helpers.

use crate::error::Result;
use serde::{de::DeserializeOwned, Serialize};

/// Encode a message for a stream record payload
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(message)?)
}

/// Decode a stream record payload
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(data)?)
}
