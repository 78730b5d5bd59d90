//! # Master Resource Actor
//!
//! The single worker that touches a device's real transactions. It owns the transaction table
//! and the receiver end of its mailbox, and processes one message at a time; that sequential
//! loop is what keeps concurrent callers from stepping on each other at the device.

use super::client::MasterClient;
use super::messages::{
    MasterData, MasterDataInitialized, MasterRequest, MasterState, MasterStatus, TxReply, TxRequest,
};
use crate::error::ProxyError;
use crate::model::{DataNode, DataPath, Operation, ResourceId, StoreKind, TransactionId, TransactionKind};
use crate::transaction::{ReadTransaction, ReadWriteTransaction, WriteTransaction};
use futures::FutureExt;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Upper bound on remembered ids of transactions discarded before they were opened.
const ABANDONED_LIMIT: usize = 1024;

enum State {
    Uninitialized,
    Initialized(MasterData),
    Closed,
}

/// A real transaction held on behalf of a proxy, by capability.
enum OpenTransaction {
    ReadOnly(Box<dyn ReadTransaction>),
    WriteOnly(Box<dyn WriteTransaction>),
    ReadWrite(Box<dyn ReadWriteTransaction>),
}

impl OpenTransaction {
    fn kind(&self) -> TransactionKind {
        match self {
            OpenTransaction::ReadOnly(_) => TransactionKind::ReadOnly,
            OpenTransaction::WriteOnly(_) => TransactionKind::WriteOnly,
            OpenTransaction::ReadWrite(_) => TransactionKind::ReadWrite,
        }
    }

    fn unsupported(&self, operation: Operation) -> ProxyError {
        ProxyError::Unsupported {
            operation,
            kind: self.kind(),
        }
    }

    async fn read(&self, store: StoreKind, path: &DataPath) -> Result<Option<DataNode>, ProxyError> {
        match self {
            OpenTransaction::ReadOnly(tx) => tx.read(store, path).await,
            OpenTransaction::ReadWrite(tx) => tx.read(store, path).await,
            OpenTransaction::WriteOnly(_) => Err(self.unsupported(Operation::Read)),
        }
    }

    async fn exists(&self, store: StoreKind, path: &DataPath) -> Result<bool, ProxyError> {
        match self {
            OpenTransaction::ReadOnly(tx) => tx.exists(store, path).await,
            OpenTransaction::ReadWrite(tx) => tx.exists(store, path).await,
            OpenTransaction::WriteOnly(_) => Err(self.unsupported(Operation::Exists)),
        }
    }

    async fn write(&self, store: StoreKind, path: &DataPath, node: DataNode) -> Result<(), ProxyError> {
        match self {
            OpenTransaction::WriteOnly(tx) => tx.write(store, path, node).await,
            OpenTransaction::ReadWrite(tx) => tx.write(store, path, node).await,
            OpenTransaction::ReadOnly(_) => Err(self.unsupported(Operation::Write)),
        }
    }

    async fn merge(&self, store: StoreKind, path: &DataPath, node: DataNode) -> Result<(), ProxyError> {
        match self {
            OpenTransaction::WriteOnly(tx) => tx.merge(store, path, node).await,
            OpenTransaction::ReadWrite(tx) => tx.merge(store, path, node).await,
            OpenTransaction::ReadOnly(_) => Err(self.unsupported(Operation::Merge)),
        }
    }

    async fn delete(&self, store: StoreKind, path: &DataPath) -> Result<(), ProxyError> {
        match self {
            OpenTransaction::WriteOnly(tx) => tx.delete(store, path).await,
            OpenTransaction::ReadWrite(tx) => tx.delete(store, path).await,
            OpenTransaction::ReadOnly(_) => Err(self.unsupported(Operation::Delete)),
        }
    }

    async fn commit(&self) -> Result<(), ProxyError> {
        match self {
            OpenTransaction::WriteOnly(tx) => tx.commit().await,
            OpenTransaction::ReadWrite(tx) => tx.commit().await,
            OpenTransaction::ReadOnly(_) => Err(self.unsupported(Operation::Submit)),
        }
    }

    async fn discard(&self) -> Result<(), ProxyError> {
        match self {
            OpenTransaction::ReadOnly(tx) => tx.discard().await,
            OpenTransaction::WriteOnly(tx) => tx.discard().await,
            OpenTransaction::ReadWrite(tx) => tx.discard().await,
        }
    }
}

/// The master side of one mounted device.
///
/// # States
///
/// ```text
/// Uninitialized ──Initialize──▶ Initialized(factory, sources, rpc) ──Close──▶ Closed
/// ```
///
/// - Transaction messages before initialization fail with `NotInitialized`.
/// - A second `Initialize` fails with `AlreadyInitialized` and changes nothing.
/// - After `Close` every message fails with `MasterClosed`.
///
/// # Abandoned Opens
/// Transaction ids are chosen by the caller. A caller whose open timed out discards the id
/// right away, and that `Discard` may be processed before the `NewTransaction` it refers to.
/// The master remembers such ids and refuses to open them later.
///
/// # Failure Isolation
/// Each transaction message is processed inside `catch_unwind`. An error or even a panic in
/// the device code becomes an error reply for that one request; the loop keeps running and
/// the other open transactions are untouched.
pub struct MasterActor {
    resource: ResourceId,
    receiver: mpsc::Receiver<MasterRequest>,
    state: State,
    transactions: HashMap<TransactionId, OpenTransaction>,
    abandoned: HashSet<TransactionId>,
}

impl MasterActor {
    /// Creates the actor and its client. The actor does nothing until [`run`](Self::run) is
    /// spawned.
    pub fn new(resource: ResourceId, mailbox_size: usize) -> (Self, MasterClient) {
        let (sender, receiver) = mpsc::channel(mailbox_size);
        let actor = Self {
            resource,
            receiver,
            state: State::Uninitialized,
            transactions: HashMap::new(),
            abandoned: HashSet::new(),
        };
        (actor, MasterClient::new(sender))
    }

    /// Processes messages until every client is dropped.
    pub async fn run(mut self) {
        let resource = self.resource.clone();
        info!(%resource, "Master started");

        while let Some(msg) = self.receiver.recv().await {
            match msg {
                MasterRequest::Initialize { data, respond_to } => {
                    let _ = respond_to.send(self.initialize(data));
                }
                MasterRequest::Transaction {
                    request,
                    respond_to,
                } => {
                    let reply = self.handle_transaction(request).await;
                    let _ = respond_to.send(reply);
                }
                MasterRequest::Status { respond_to } => {
                    let _ = respond_to.send(self.status());
                }
                MasterRequest::Close { respond_to } => {
                    self.close().await;
                    let _ = respond_to.send(Ok(()));
                }
            }
        }

        info!(%resource, open = self.transactions.len(), "Master shutdown");
    }

    fn initialize(&mut self, data: MasterData) -> Result<MasterDataInitialized, ProxyError> {
        match self.state {
            State::Uninitialized => {
                let ack = MasterDataInitialized {
                    resource: self.resource.clone(),
                    sources: data.sources.clone(),
                };
                info!(resource = %self.resource, sources = data.sources.len(), "Master data initialized");
                self.state = State::Initialized(data);
                Ok(ack)
            }
            State::Initialized(_) => {
                warn!(resource = %self.resource, "Repeated initialization refused");
                Err(ProxyError::AlreadyInitialized)
            }
            State::Closed => Err(ProxyError::MasterClosed),
        }
    }

    fn status(&self) -> MasterStatus {
        let (state, sources) = match &self.state {
            State::Uninitialized => (MasterState::Uninitialized, Vec::new()),
            State::Initialized(data) => (MasterState::Initialized, data.sources.clone()),
            State::Closed => (MasterState::Closed, Vec::new()),
        };
        MasterStatus {
            resource: self.resource.clone(),
            state,
            open_transactions: self.transactions.len(),
            sources,
        }
    }

    async fn close(&mut self) {
        if matches!(self.state, State::Closed) {
            return;
        }
        self.abandoned.clear();
        let open = std::mem::take(&mut self.transactions);
        let discarded = open.len();
        for (id, tx) in open {
            if let Err(e) = tx.discard().await {
                debug!(resource = %self.resource, tx = %id, error = %e, "Discard on close failed");
            }
        }
        self.state = State::Closed;
        info!(resource = %self.resource, discarded, "Master closed");
    }

    async fn handle_transaction(&mut self, request: TxRequest) -> TxReply {
        let operation = request.operation();
        let tx = request.transaction();
        debug!(resource = %self.resource, %operation, ?tx, "Transaction request");

        match AssertUnwindSafe(self.apply(request)).catch_unwind().await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                warn!(resource = %self.resource, %operation, ?tx, error = %e, "Request failed");
                TxReply::Failure(e)
            }
            Err(panic) => {
                let cause = panic_message(panic.as_ref());
                error!(resource = %self.resource, %operation, ?tx, %cause, "Request panicked");
                TxReply::Failure(ProxyError::RemoteFailure(format!("{} panicked: {}", operation, cause)))
            }
        }
    }

    async fn apply(&mut self, request: TxRequest) -> Result<TxReply, ProxyError> {
        let data = match &self.state {
            State::Uninitialized => return Err(ProxyError::NotInitialized),
            State::Closed => return Err(ProxyError::MasterClosed),
            State::Initialized(data) => data.clone(),
        };

        match request {
            TxRequest::NewTransaction { id, kind } => {
                if self.abandoned.remove(&id) {
                    debug!(resource = %self.resource, tx = %id, "Open of abandoned transaction skipped");
                    return Err(ProxyError::TransactionClosed(id));
                }
                if self.transactions.contains_key(&id) {
                    return Err(ProxyError::RemoteFailure(format!("transaction {} is already open", id)));
                }
                let tx = match kind {
                    TransactionKind::ReadOnly => OpenTransaction::ReadOnly(data.factory.new_read_only_transaction().await?),
                    TransactionKind::WriteOnly => {
                        OpenTransaction::WriteOnly(data.factory.new_write_only_transaction().await?)
                    }
                    TransactionKind::ReadWrite => {
                        OpenTransaction::ReadWrite(data.factory.new_read_write_transaction().await?)
                    }
                };
                self.transactions.insert(id, tx);
                info!(resource = %self.resource, tx = %id, %kind, open = self.transactions.len(), "Transaction opened");
                Ok(TxReply::TransactionCreated(id))
            }
            TxRequest::Read { id, store, path } => {
                let node = self.lookup(id)?.read(store, &path).await?;
                debug!(resource = %self.resource, tx = %id, %path, found = node.is_some(), "Read");
                Ok(TxReply::ReadResult(node))
            }
            TxRequest::Exists { id, store, path } => {
                let exists = self.lookup(id)?.exists(store, &path).await?;
                Ok(TxReply::ExistsResult(Some(exists)))
            }
            TxRequest::Write {
                id,
                store,
                path,
                node,
            } => {
                self.lookup(id)?.write(store, &path, node).await?;
                Ok(TxReply::Ack)
            }
            TxRequest::Merge {
                id,
                store,
                path,
                node,
            } => {
                self.lookup(id)?.merge(store, &path, node).await?;
                Ok(TxReply::Ack)
            }
            TxRequest::Delete { id, store, path } => {
                self.lookup(id)?.delete(store, &path).await?;
                Ok(TxReply::Ack)
            }
            TxRequest::Submit { id } => {
                // A read-only transaction stays open after a refused submit.
                if !self.lookup(id)?.kind().can_write() {
                    return Err(self.lookup(id)?.unsupported(Operation::Submit));
                }
                self.take(id)?.commit().await?;
                info!(resource = %self.resource, tx = %id, "Submitted");
                Ok(TxReply::Submitted)
            }
            TxRequest::Discard { id } => {
                let Some(tx) = self.transactions.remove(&id) else {
                    self.remember_abandoned(id);
                    return Err(ProxyError::NoSuchTransaction(id));
                };
                tx.discard().await?;
                debug!(resource = %self.resource, tx = %id, "Discarded");
                Ok(TxReply::Discarded)
            }
            TxRequest::InvokeRpc { name, input } => {
                let output = data.rpc.invoke_rpc(&name, input).await?;
                Ok(TxReply::RpcResult(output))
            }
        }
    }

    fn remember_abandoned(&mut self, id: TransactionId) {
        if self.abandoned.len() >= ABANDONED_LIMIT {
            warn!(resource = %self.resource, tx = %id, "Too many abandoned ids, not remembered");
            return;
        }
        self.abandoned.insert(id);
    }

    fn lookup(&self, id: TransactionId) -> Result<&OpenTransaction, ProxyError> {
        self.transactions
            .get(&id)
            .ok_or(ProxyError::NoSuchTransaction(id))
    }

    fn take(&mut self, id: TransactionId) -> Result<OpenTransaction, ProxyError> {
        self.transactions
            .remove(&id)
            .ok_or(ProxyError::NoSuchTransaction(id))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::InMemoryDevice;
    use crate::master::MasterClient;

    fn path(s: &str) -> DataPath {
        s.parse().unwrap()
    }

    fn spawn_master(device: &InMemoryDevice) -> MasterClient {
        let (actor, client) = MasterActor::new(device.resource().clone(), 8);
        tokio::spawn(actor.run());
        client
    }

    async fn open(client: &MasterClient, kind: TransactionKind) -> TransactionId {
        let id = TransactionId::new();
        match client.request(TxRequest::NewTransaction { id, kind }).await {
            TxReply::TransactionCreated(created) => {
                assert_eq!(created, id);
                id
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_requests_before_initialize_are_refused() {
        let device = InMemoryDevice::new(ResourceId::new("r1"));
        let client = spawn_master(&device);

        let reply = client
            .request(TxRequest::NewTransaction {
                id: TransactionId::new(),
                kind: TransactionKind::ReadOnly,
            })
            .await;
        assert_eq!(reply, TxReply::Failure(ProxyError::NotInitialized));
        assert_eq!(device.opened_transactions(), 0);
    }

    #[tokio::test]
    async fn test_transaction_messages_before_initialize_are_refused() {
        let device = InMemoryDevice::new(ResourceId::new("r1"));
        let client = spawn_master(&device);
        let id = TransactionId::new();

        let requests = vec![
            TxRequest::Read {
                id,
                store: StoreKind::Config,
                path: DataPath::root(),
            },
            TxRequest::Submit { id },
            TxRequest::Discard { id },
        ];
        for request in requests {
            assert_eq!(
                client.request(request).await,
                TxReply::Failure(ProxyError::NotInitialized)
            );
        }
    }

    #[tokio::test]
    async fn test_discard_before_open_prevents_the_open() {
        let device = InMemoryDevice::new(ResourceId::new("r1"));
        let client = spawn_master(&device);
        client.initialize(device.session().into()).await.unwrap();
        let id = TransactionId::new();

        assert_eq!(
            client.request(TxRequest::Discard { id }).await,
            TxReply::Failure(ProxyError::NoSuchTransaction(id))
        );
        let reply = client
            .request(TxRequest::NewTransaction {
                id,
                kind: TransactionKind::ReadWrite,
            })
            .await;
        assert_eq!(reply, TxReply::Failure(ProxyError::TransactionClosed(id)));
        assert_eq!(client.status().await.unwrap().open_transactions, 0);
        assert_eq!(device.opened_transactions(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_open_is_refused() {
        let device = InMemoryDevice::new(ResourceId::new("r1"));
        let client = spawn_master(&device);
        client.initialize(device.session().into()).await.unwrap();

        let id = open(&client, TransactionKind::ReadOnly).await;
        let reply = client
            .request(TxRequest::NewTransaction {
                id,
                kind: TransactionKind::ReadOnly,
            })
            .await;
        assert!(matches!(reply, TxReply::Failure(ProxyError::RemoteFailure(_))));
        assert_eq!(client.status().await.unwrap().open_transactions, 1);
    }

    #[tokio::test]
    async fn test_merge_and_delete_apply_on_submit() {
        let device = InMemoryDevice::new(ResourceId::new("r1"));
        device
            .seed(
                StoreKind::Config,
                &path("/eth0"),
                DataNode::container("eth0")
                    .with_child(DataNode::leaf("mtu", "1500"))
                    .with_child(DataNode::leaf("description", "uplink")),
            )
            .unwrap();
        let client = spawn_master(&device);
        client.initialize(device.session().into()).await.unwrap();

        let tx = open(&client, TransactionKind::WriteOnly).await;
        let reply = client
            .request(TxRequest::Merge {
                id: tx,
                store: StoreKind::Config,
                path: path("/eth0"),
                node: DataNode::container("eth0").with_child(DataNode::leaf("mtu", "9000")),
            })
            .await;
        assert_eq!(reply, TxReply::Ack);
        let reply = client
            .request(TxRequest::Delete {
                id: tx,
                store: StoreKind::Config,
                path: path("/eth0/description"),
            })
            .await;
        assert_eq!(reply, TxReply::Ack);
        assert_eq!(client.request(TxRequest::Submit { id: tx }).await, TxReply::Submitted);

        assert_eq!(
            device.get(StoreKind::Config, &path("/eth0")),
            Some(DataNode::container("eth0").with_child(DataNode::leaf("mtu", "9000")))
        );
    }

    #[tokio::test]
    async fn test_second_initialize_is_refused() {
        let device = InMemoryDevice::new(ResourceId::new("r1"));
        let client = spawn_master(&device);

        let ack = client.initialize(device.session().into()).await.unwrap();
        assert_eq!(ack.resource, ResourceId::new("r1"));
        assert_eq!(
            client.initialize(device.session().into()).await,
            Err(ProxyError::AlreadyInitialized)
        );
        assert_eq!(client.status().await.unwrap().state, MasterState::Initialized);
    }

    #[tokio::test]
    async fn test_write_submit_then_read() {
        let device = InMemoryDevice::new(ResourceId::new("r1"));
        let client = spawn_master(&device);
        client.initialize(device.session().into()).await.unwrap();

        let tx = open(&client, TransactionKind::WriteOnly).await;
        let node = DataNode::leaf("mtu", "1500");
        let reply = client
            .request(TxRequest::Write {
                id: tx,
                store: StoreKind::Config,
                path: path("/mtu"),
                node: node.clone(),
            })
            .await;
        assert_eq!(reply, TxReply::Ack);
        assert_eq!(client.request(TxRequest::Submit { id: tx }).await, TxReply::Submitted);

        // The id is gone after submit.
        assert_eq!(
            client.request(TxRequest::Submit { id: tx }).await,
            TxReply::Failure(ProxyError::NoSuchTransaction(tx))
        );

        let rx = open(&client, TransactionKind::ReadOnly).await;
        let reply = client
            .request(TxRequest::Read {
                id: rx,
                store: StoreKind::Config,
                path: path("/mtu"),
            })
            .await;
        assert_eq!(reply, TxReply::ReadResult(Some(node)));
        assert_eq!(device.commits(), 1);
    }

    #[tokio::test]
    async fn test_capability_mismatch_keeps_transaction_open() {
        let device = InMemoryDevice::new(ResourceId::new("r1"));
        let client = spawn_master(&device);
        client.initialize(device.session().into()).await.unwrap();

        let rx = open(&client, TransactionKind::ReadOnly).await;
        assert_eq!(
            client.request(TxRequest::Submit { id: rx }).await,
            TxReply::Failure(ProxyError::Unsupported {
                operation: Operation::Submit,
                kind: TransactionKind::ReadOnly,
            })
        );
        assert_eq!(client.request(TxRequest::Discard { id: rx }).await, TxReply::Discarded);
    }

    #[tokio::test]
    async fn test_panic_is_isolated_to_one_request() {
        let device = InMemoryDevice::new(ResourceId::new("r1"));
        device
            .seed(StoreKind::Operational, &path("/up"), DataNode::leaf("up", "true"))
            .unwrap();
        let client = spawn_master(&device);
        client.initialize(device.session().into()).await.unwrap();

        let other = open(&client, TransactionKind::ReadWrite).await;
        let rx = open(&client, TransactionKind::ReadOnly).await;
        device.panic_on_read();

        let reply = client
            .request(TxRequest::Read {
                id: rx,
                store: StoreKind::Operational,
                path: path("/up"),
            })
            .await;
        assert!(matches!(reply, TxReply::Failure(ProxyError::RemoteFailure(_))));

        device.clear_faults();
        let reply = client
            .request(TxRequest::Exists {
                id: other,
                store: StoreKind::Operational,
                path: path("/up"),
            })
            .await;
        assert_eq!(reply, TxReply::ExistsResult(Some(true)));
    }

    #[tokio::test]
    async fn test_close_discards_open_transactions() {
        let device = InMemoryDevice::new(ResourceId::new("r1"));
        let client = spawn_master(&device);
        client.initialize(device.session().into()).await.unwrap();

        let tx = open(&client, TransactionKind::ReadWrite).await;
        client
            .request(TxRequest::Write {
                id: tx,
                store: StoreKind::Config,
                path: path("/hostname"),
                node: DataNode::leaf("hostname", "edge-1"),
            })
            .await;
        assert_eq!(client.status().await.unwrap().open_transactions, 1);

        client.close().await.unwrap();
        let status = client.status().await.unwrap();
        assert_eq!(status.state, MasterState::Closed);
        assert_eq!(status.open_transactions, 0);
        assert_eq!(device.get(StoreKind::Config, &path("/hostname")), None);
        assert_eq!(
            client.request(TxRequest::Discard { id: tx }).await,
            TxReply::Failure(ProxyError::MasterClosed)
        );
    }

    #[tokio::test]
    async fn test_rpc_is_forwarded_to_device() {
        let device = InMemoryDevice::new(ResourceId::new("r1"));
        device.register_rpc("ping", |_| Ok(Some(DataNode::leaf("pong", "ok"))));
        let client = spawn_master(&device);
        client.initialize(device.session().into()).await.unwrap();

        let reply = client
            .request(TxRequest::InvokeRpc {
                name: "ping".to_string(),
                input: None,
            })
            .await;
        assert_eq!(reply, TxReply::RpcResult(Some(DataNode::leaf("pong", "ok"))));
    }
}
