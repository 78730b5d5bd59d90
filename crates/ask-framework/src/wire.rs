//! # Wire Frames
//!
//! Everything that crosses a [`link`](crate::link) is a [`Frame`]: a correlation id plus an
//! opaque, already-encoded body. Bodies are JSON so that a request and its reply can be
//! inspected in logs and so that any `serde` type can travel without a schema step.

use crate::error::ChannelError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Identifier linking a reply to the request that caused it.
pub type CorrelationId = u64;

/// A unit of transfer between two members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub correlation_id: CorrelationId,
    pub body: Vec<u8>,
}

impl Frame {
    /// Encodes `payload` into a frame carrying `correlation_id`.
    pub fn encode<T: Serialize>(correlation_id: CorrelationId, payload: &T) -> Result<Self, ChannelError> {
        Ok(Self {
            correlation_id,
            body: serde_json::to_vec(payload)?,
        })
    }

    /// Decodes the body as `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ChannelError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}
