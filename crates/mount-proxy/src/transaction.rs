//! # Transaction Contract
//!
//! The capability traits shared by real (owner-side) transactions and proxy transactions.
//! Callers hold `Box<dyn ReadTransaction>` and friends and cannot tell which one they got.
//!
//! All methods take `&self`: a transaction is used by one caller at a time, but it may be
//! moved between tasks, and proxies need interior state (the closed flag) anyway.

use crate::error::ProxyError;
use crate::model::{DataNode, DataPath, StoreKind, TransactionId, TransactionKind};
use async_trait::async_trait;
use std::sync::Arc;

/// Shared by every transaction kind.
#[async_trait]
pub trait Transaction: Send + Sync {
    fn id(&self) -> TransactionId;

    fn kind(&self) -> TransactionKind;

    /// Abandons the transaction without side effects and frees any resources it holds.
    /// Further operations fail with [`ProxyError::TransactionClosed`].
    async fn discard(&self) -> Result<(), ProxyError>;
}

#[async_trait]
pub trait ReadTransaction: Transaction {
    /// Returns the node at `path`, or `None` if nothing is stored there.
    async fn read(&self, store: StoreKind, path: &DataPath) -> Result<Option<DataNode>, ProxyError>;

    async fn exists(&self, store: StoreKind, path: &DataPath) -> Result<bool, ProxyError>;
}

#[async_trait]
pub trait WriteTransaction: Transaction {
    /// Replaces the subtree at `path` with `node`.
    async fn write(&self, store: StoreKind, path: &DataPath, node: DataNode) -> Result<(), ProxyError>;

    /// Merges `node` into the subtree at `path`.
    async fn merge(&self, store: StoreKind, path: &DataPath, node: DataNode) -> Result<(), ProxyError>;

    async fn delete(&self, store: StoreKind, path: &DataPath) -> Result<(), ProxyError>;

    /// Applies all buffered modifications to the device.
    ///
    /// The transaction is finished afterwards whatever the result. A
    /// [`Timeout`](ProxyError::Timeout) here does not mean the commit failed; see
    /// [`ProxyError::outcome_unknown`].
    async fn commit(&self) -> Result<(), ProxyError>;
}

pub trait ReadWriteTransaction: ReadTransaction + WriteTransaction {}

impl<T: ReadTransaction + WriteTransaction> ReadWriteTransaction for T {}

/// Opens transactions against one resource.
#[async_trait]
pub trait TransactionFactory: Send + Sync {
    async fn new_read_only_transaction(&self) -> Result<Box<dyn ReadTransaction>, ProxyError>;

    async fn new_write_only_transaction(&self) -> Result<Box<dyn WriteTransaction>, ProxyError>;

    async fn new_read_write_transaction(&self) -> Result<Box<dyn ReadWriteTransaction>, ProxyError>;
}

/// Invokes device RPCs.
#[async_trait]
pub trait RpcService: Send + Sync {
    async fn invoke_rpc(&self, name: &str, input: Option<DataNode>) -> Result<Option<DataNode>, ProxyError>;
}

/// Shared handle to a factory.
pub type SharedFactory = Arc<dyn TransactionFactory>;

/// Shared handle to an RPC service.
pub type SharedRpc = Arc<dyn RpcService>;
