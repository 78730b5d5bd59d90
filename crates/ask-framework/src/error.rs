//! # Channel Errors
//!
//! This module defines the errors a [`MessageChannel`](crate::MessageChannel) caller can observe.
//! They describe the *transport* only; whatever the remote handler considers a failure travels
//! inside the reply body and is the caller's business to interpret.

use std::time::Duration;

/// Errors that can occur while asking a remote endpoint.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum ChannelError {
    /// The outbound half of the link is gone; the request was never sent.
    #[error("Channel closed")]
    Closed,
    /// The link went down while the request was pending.
    #[error("Channel dropped pending request")]
    Dropped,
    /// No reply arrived before the deadline. The remote side may still have acted on the request.
    #[error("No reply for request {correlation_id} within {after:?}")]
    Timeout { correlation_id: u64, after: Duration },
    /// A frame body could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ChannelError {
    fn from(e: serde_json::Error) -> Self {
        ChannelError::Serialization(e.to_string())
    }
}
