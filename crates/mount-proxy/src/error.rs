//! Error types surfaced to callers of the mount.

use crate::model::{Operation, ResourceId, TransactionId, TransactionKind, TreeError};
use ask_framework::ChannelError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors a transaction, the broker or the master can report.
///
/// The type is serializable so that the master's verdict crosses the wire unchanged; a proxy
/// caller sees the same variant an owner-side caller would.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum ProxyError {
    /// A transaction message reached the master before its initialization was acknowledged.
    #[error("Master data not initialized")]
    NotInitialized,

    /// The master was asked to initialize a second time.
    #[error("Master data already initialized")]
    AlreadyInitialized,

    /// The master does not know the transaction (never opened, committed or discarded).
    #[error("No such transaction: {0}")]
    NoSuchTransaction(TransactionId),

    /// The transaction was already committed or discarded by this caller.
    #[error("Transaction {0} is already committed or discarded")]
    TransactionClosed(TransactionId),

    /// No reply before the deadline. See [`ProxyError::outcome_unknown`].
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: Operation, after: Duration },

    /// The device or the remote member failed the request.
    #[error("Remote failure: {0}")]
    RemoteFailure(String),

    /// A request or reply could not be encoded, decoded or understood.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The transaction was opened without the capability the operation needs.
    #[error("{operation} is not supported on a {kind} transaction")]
    Unsupported {
        operation: Operation,
        kind: TransactionKind,
    },

    /// Nobody currently owns the resource.
    #[error("No owner for resource {0}")]
    NoOwner(ResourceId),

    /// The master actor is closed or gone.
    #[error("Master closed")]
    MasterClosed,
}

impl ProxyError {
    /// True when the operation may or may not have taken effect.
    ///
    /// A timeout only means the reply did not arrive in time; the master may have applied the
    /// operation already. For a commit this means the data may or may not be on the device,
    /// and the caller has to read it back to find out.
    pub fn outcome_unknown(&self) -> bool {
        matches!(self, ProxyError::Timeout { operation, .. } if operation.is_mutating())
    }

    /// Maps a transport failure of `operation` into the caller-facing error.
    pub fn from_channel(operation: Operation, e: ChannelError) -> Self {
        match e {
            ChannelError::Timeout { after, .. } => ProxyError::Timeout { operation, after },
            ChannelError::Serialization(msg) => ProxyError::SerializationError(msg),
            ChannelError::Closed | ChannelError::Dropped => ProxyError::RemoteFailure(e.to_string()),
        }
    }
}

impl From<TreeError> for ProxyError {
    fn from(e: TreeError) -> Self {
        ProxyError::RemoteFailure(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_mutating_timeouts_are_ambiguous() {
        let after = Duration::from_secs(1);
        let commit = ProxyError::Timeout {
            operation: Operation::Submit,
            after,
        };
        let read = ProxyError::Timeout {
            operation: Operation::Read,
            after,
        };
        assert!(commit.outcome_unknown());
        assert!(!read.outcome_unknown());
        assert!(!ProxyError::RemoteFailure("Fail".into()).outcome_unknown());
    }

    #[test]
    fn test_channel_errors_map_to_caller_kinds() {
        let timeout = ChannelError::Timeout {
            correlation_id: 4,
            after: Duration::from_millis(10),
        };
        assert_eq!(
            ProxyError::from_channel(Operation::Exists, timeout),
            ProxyError::Timeout {
                operation: Operation::Exists,
                after: Duration::from_millis(10)
            }
        );
        assert!(matches!(
            ProxyError::from_channel(Operation::Read, ChannelError::Serialization("x".into())),
            ProxyError::SerializationError(_)
        ));
        assert!(matches!(
            ProxyError::from_channel(Operation::Read, ChannelError::Closed),
            ProxyError::RemoteFailure(_)
        ));
    }
}
