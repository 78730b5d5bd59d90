//! # Master Messages
//!
//! Two layers of messages reach the master:
//!
//! - [`TxRequest`] / [`TxReply`] are the transaction protocol. They are plain data, derive
//!   `serde`, and are what proxies on other members send over the wire.
//! - [`MasterRequest`] is the actor's in-process mailbox message. It wraps a `TxRequest` with
//!   a oneshot reply slot, and additionally carries the messages that cannot cross the wire
//!   because they hold live objects (initialization with the device factory) or that only the
//!   owning member may send (close).

use crate::device::DeviceSession;
use crate::error::ProxyError;
use crate::model::{
    DataNode, DataPath, Operation, ResourceId, SourceIdentifier, StoreKind, TransactionId, TransactionKind,
};
use crate::transaction::{SharedFactory, SharedRpc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::oneshot;

/// Transaction protocol request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TxRequest {
    /// Opens a transaction under an id chosen by the caller, so the caller can discard it
    /// even if the reply never arrives.
    NewTransaction {
        id: TransactionId,
        kind: TransactionKind,
    },
    Read {
        id: TransactionId,
        store: StoreKind,
        path: DataPath,
    },
    Exists {
        id: TransactionId,
        store: StoreKind,
        path: DataPath,
    },
    Write {
        id: TransactionId,
        store: StoreKind,
        path: DataPath,
        node: DataNode,
    },
    Merge {
        id: TransactionId,
        store: StoreKind,
        path: DataPath,
        node: DataNode,
    },
    Delete {
        id: TransactionId,
        store: StoreKind,
        path: DataPath,
    },
    Submit {
        id: TransactionId,
    },
    Discard {
        id: TransactionId,
    },
    InvokeRpc {
        name: String,
        input: Option<DataNode>,
    },
}

impl TxRequest {
    pub fn operation(&self) -> Operation {
        match self {
            TxRequest::NewTransaction { .. } => Operation::NewTransaction,
            TxRequest::Read { .. } => Operation::Read,
            TxRequest::Exists { .. } => Operation::Exists,
            TxRequest::Write { .. } => Operation::Write,
            TxRequest::Merge { .. } => Operation::Merge,
            TxRequest::Delete { .. } => Operation::Delete,
            TxRequest::Submit { .. } => Operation::Submit,
            TxRequest::Discard { .. } => Operation::Discard,
            TxRequest::InvokeRpc { .. } => Operation::InvokeRpc,
        }
    }

    /// The transaction the request belongs to, if any.
    pub fn transaction(&self) -> Option<TransactionId> {
        match self {
            TxRequest::Read { id, .. }
            | TxRequest::Exists { id, .. }
            | TxRequest::Write { id, .. }
            | TxRequest::Merge { id, .. }
            | TxRequest::Delete { id, .. }
            | TxRequest::Submit { id }
            | TxRequest::Discard { id }
            | TxRequest::NewTransaction { id, .. } => Some(*id),
            TxRequest::InvokeRpc { .. } => None,
        }
    }
}

/// Transaction protocol reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TxReply {
    TransactionCreated(TransactionId),
    ReadResult(Option<DataNode>),
    /// `None` when the device gave no answer; proxies read that as "does not exist".
    ExistsResult(Option<bool>),
    Ack,
    Submitted,
    Discarded,
    RpcResult(Option<DataNode>),
    Failure(ProxyError),
}

/// What the master needs to serve transactions: the device's real factory, the schema
/// sources it advertised and its RPC service.
#[derive(Clone)]
pub struct MasterData {
    pub factory: SharedFactory,
    pub sources: Vec<SourceIdentifier>,
    pub rpc: SharedRpc,
}

impl fmt::Debug for MasterData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterData")
            .field("sources", &self.sources)
            .finish_non_exhaustive()
    }
}

impl From<DeviceSession> for MasterData {
    fn from(session: DeviceSession) -> Self {
        Self {
            factory: session.factory,
            sources: session.sources,
            rpc: session.rpc,
        }
    }
}

/// Acknowledgment of a successful initialization.
#[derive(Debug, Clone, PartialEq)]
pub struct MasterDataInitialized {
    pub resource: ResourceId,
    pub sources: Vec<SourceIdentifier>,
}

/// Lifecycle state of a master, as reported by [`MasterRequest::Status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterState {
    Uninitialized,
    Initialized,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MasterStatus {
    pub resource: ResourceId,
    pub state: MasterState,
    pub open_transactions: usize,
    pub sources: Vec<SourceIdentifier>,
}

/// Type alias for the one-shot response channel used by the master.
pub type Response<T> = oneshot::Sender<Result<T, ProxyError>>;

/// In-process mailbox message of the master actor.
#[derive(Debug)]
pub enum MasterRequest {
    Initialize {
        data: MasterData,
        respond_to: Response<MasterDataInitialized>,
    },
    Transaction {
        request: TxRequest,
        respond_to: oneshot::Sender<TxReply>,
    },
    Status {
        respond_to: oneshot::Sender<MasterStatus>,
    },
    Close {
        respond_to: Response<()>,
    },
}
