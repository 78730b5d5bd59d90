//! An in-memory device: two data trees, buffered transactions, RPC handlers and fault
//! injection. Used by the demo and as the test fixture standing in for real hardware.

use super::{DeviceConnector, DeviceSession};
use crate::error::ProxyError;
use crate::model::{
    DataNode, DataPath, DataTree, Operation, ResourceId, SourceIdentifier, StoreKind, TransactionId,
    TransactionKind,
};
use crate::transaction::{
    ReadTransaction, ReadWriteTransaction, RpcService, Transaction, TransactionFactory, WriteTransaction,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info};

type RpcHandler = Arc<dyn Fn(Option<DataNode>) -> Result<Option<DataNode>, String> + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Default)]
struct Stores {
    config: Arc<DataTree>,
    operational: Arc<DataTree>,
}

impl Stores {
    fn tree(&self, store: StoreKind) -> &Arc<DataTree> {
        match store {
            StoreKind::Config => &self.config,
            StoreKind::Operational => &self.operational,
        }
    }

    fn tree_mut(&mut self, store: StoreKind) -> &mut DataTree {
        match store {
            StoreKind::Config => Arc::make_mut(&mut self.config),
            StoreKind::Operational => Arc::make_mut(&mut self.operational),
        }
    }
}

#[derive(Debug, Default)]
struct Faults {
    read: Option<String>,
    exists: Option<String>,
    commit: Option<String>,
    read_delay: Option<Duration>,
    panic_on_read: bool,
}

struct DeviceInner {
    resource: ResourceId,
    sources: Vec<SourceIdentifier>,
    stores: RwLock<Stores>,
    faults: Mutex<Faults>,
    rpcs: RwLock<HashMap<String, RpcHandler>>,
    opened: AtomicUsize,
    commits: AtomicUsize,
}

impl DeviceInner {
    fn snapshot(&self) -> Stores {
        self.stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// A device whose data lives in memory.
///
/// Clones share the same data, so a test can keep a handle to inspect or sabotage the device
/// while the mount uses another.
#[derive(Clone)]
pub struct InMemoryDevice {
    inner: Arc<DeviceInner>,
}

impl InMemoryDevice {
    pub fn new(resource: ResourceId) -> Self {
        Self::with_sources(resource, Vec::new())
    }

    pub fn with_sources(resource: ResourceId, sources: Vec<SourceIdentifier>) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                resource,
                sources,
                stores: RwLock::default(),
                faults: Mutex::default(),
                rpcs: RwLock::default(),
                opened: AtomicUsize::new(0),
                commits: AtomicUsize::new(0),
            }),
        }
    }

    pub fn resource(&self) -> &ResourceId {
        &self.inner.resource
    }

    /// Stores `node` directly, bypassing transactions.
    pub fn seed(&self, store: StoreKind, path: &DataPath, node: DataNode) -> Result<(), ProxyError> {
        let mut stores = self.inner.stores.write().unwrap_or_else(PoisonError::into_inner);
        stores.tree_mut(store).put(path, node)?;
        Ok(())
    }

    /// Reads committed data directly, bypassing transactions.
    pub fn get(&self, store: StoreKind, path: &DataPath) -> Option<DataNode> {
        self.inner.snapshot().tree(store).get(path)
    }

    /// Makes every following read fail with `message`.
    pub fn fail_reads(&self, message: impl Into<String>) {
        lock(&self.inner.faults).read = Some(message.into());
    }

    /// Makes every following existence check fail with `message`.
    pub fn fail_exists(&self, message: impl Into<String>) {
        lock(&self.inner.faults).exists = Some(message.into());
    }

    /// Makes every following commit fail with `message`.
    pub fn fail_commits(&self, message: impl Into<String>) {
        lock(&self.inner.faults).commit = Some(message.into());
    }

    /// Delays every following read and existence check.
    pub fn delay_reads(&self, delay: Duration) {
        lock(&self.inner.faults).read_delay = Some(delay);
    }

    /// Makes every following read panic, as a crashing driver would.
    pub fn panic_on_read(&self) {
        lock(&self.inner.faults).panic_on_read = true;
    }

    pub fn clear_faults(&self) {
        *lock(&self.inner.faults) = Faults::default();
    }

    /// Registers an RPC handler under `name`.
    pub fn register_rpc<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Option<DataNode>) -> Result<Option<DataNode>, String> + Send + Sync + 'static,
    {
        self.inner
            .rpcs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::new(handler));
    }

    /// Number of real transactions opened against this device.
    pub fn opened_transactions(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }

    /// Number of successful commits.
    pub fn commits(&self) -> usize {
        self.inner.commits.load(Ordering::SeqCst)
    }

    /// A session over this device, as a connector would hand it out.
    pub fn session(&self) -> DeviceSession {
        DeviceSession {
            factory: Arc::new(self.clone()),
            sources: self.inner.sources.clone(),
            rpc: Arc::new(self.clone()),
        }
    }

    fn open(&self, kind: TransactionKind) -> MemoryTransaction {
        self.inner.opened.fetch_add(1, Ordering::SeqCst);
        let tx = MemoryTransaction {
            id: TransactionId::new(),
            kind,
            device: self.inner.clone(),
            snapshot: self.inner.snapshot(),
            state: Mutex::default(),
        };
        debug!(resource = %self.inner.resource, tx = %tx.id, %kind, "Opened");
        tx
    }
}

#[async_trait]
impl TransactionFactory for InMemoryDevice {
    async fn new_read_only_transaction(&self) -> Result<Box<dyn ReadTransaction>, ProxyError> {
        Ok(Box::new(self.open(TransactionKind::ReadOnly)))
    }

    async fn new_write_only_transaction(&self) -> Result<Box<dyn WriteTransaction>, ProxyError> {
        Ok(Box::new(self.open(TransactionKind::WriteOnly)))
    }

    async fn new_read_write_transaction(&self) -> Result<Box<dyn ReadWriteTransaction>, ProxyError> {
        Ok(Box::new(self.open(TransactionKind::ReadWrite)))
    }
}

#[async_trait]
impl RpcService for InMemoryDevice {
    async fn invoke_rpc(&self, name: &str, input: Option<DataNode>) -> Result<Option<DataNode>, ProxyError> {
        let handler = self
            .inner
            .rpcs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| ProxyError::RemoteFailure(format!("unknown rpc {}", name)))?;
        handler(input).map_err(ProxyError::RemoteFailure)
    }
}

/// Connector serving a fixed set of in-memory devices.
#[derive(Clone, Default)]
pub struct InMemoryConnector {
    devices: HashMap<ResourceId, InMemoryDevice>,
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, device: InMemoryDevice) -> Self {
        self.devices.insert(device.resource().clone(), device);
        self
    }
}

#[async_trait]
impl DeviceConnector for InMemoryConnector {
    async fn connect(&self, resource: &ResourceId) -> Result<DeviceSession, ProxyError> {
        let device = self
            .devices
            .get(resource)
            .ok_or_else(|| ProxyError::RemoteFailure(format!("device {} unreachable", resource)))?;
        info!(%resource, "Device connected");
        Ok(device.session())
    }
}

#[derive(Debug, Clone)]
enum Modification {
    Write(StoreKind, DataPath, DataNode),
    Merge(StoreKind, DataPath, DataNode),
    Delete(StoreKind, DataPath),
}

impl Modification {
    fn store(&self) -> StoreKind {
        match self {
            Modification::Write(store, ..) | Modification::Merge(store, ..) | Modification::Delete(store, _) => *store,
        }
    }

    fn apply(&self, tree: &mut DataTree) -> Result<(), ProxyError> {
        match self {
            Modification::Write(_, path, node) => tree.put(path, node.clone())?,
            Modification::Merge(_, path, node) => tree.merge(path, node.clone())?,
            Modification::Delete(_, path) => tree.remove(path),
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct TxState {
    closed: bool,
    modifications: Vec<Modification>,
}

/// A real transaction on an [`InMemoryDevice`].
///
/// Reads see the device as it was when the transaction was opened, plus this transaction's own
/// buffered modifications. Commit applies the buffer atomically on top of the current data.
struct MemoryTransaction {
    id: TransactionId,
    kind: TransactionKind,
    device: Arc<DeviceInner>,
    snapshot: Stores,
    state: Mutex<TxState>,
}

impl MemoryTransaction {
    fn check(&self, operation: Operation) -> Result<MutexGuard<'_, TxState>, ProxyError> {
        let state = lock(&self.state);
        if state.closed {
            return Err(ProxyError::TransactionClosed(self.id));
        }
        let allowed = match operation {
            Operation::Read | Operation::Exists => self.kind.can_read(),
            Operation::Write | Operation::Merge | Operation::Delete | Operation::Submit => self.kind.can_write(),
            _ => true,
        };
        if !allowed {
            return Err(ProxyError::Unsupported {
                operation,
                kind: self.kind,
            });
        }
        Ok(state)
    }

    fn view(&self, store: StoreKind, path: &DataPath) -> Result<Option<DataNode>, ProxyError> {
        let state = self.check(Operation::Read)?;
        let base = self.snapshot.tree(store);
        let own: Vec<&Modification> = state
            .modifications
            .iter()
            .filter(|m| m.store() == store)
            .collect();
        if own.is_empty() {
            return Ok(base.get(path));
        }
        let mut tree = DataTree::clone(base);
        for modification in own {
            modification.apply(&mut tree)?;
        }
        Ok(tree.get(path))
    }

    async fn read_faults(&self, operation: Operation) -> Result<(), ProxyError> {
        let (delay, message, panic) = {
            let faults = lock(&self.device.faults);
            let message = match operation {
                Operation::Exists => faults.exists.clone().or_else(|| faults.read.clone()),
                _ => faults.read.clone(),
            };
            (faults.read_delay, message, faults.panic_on_read)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if panic {
            panic!("device driver crashed during {}", operation);
        }
        match message {
            Some(message) => Err(ProxyError::RemoteFailure(message)),
            None => Ok(()),
        }
    }

    fn buffer(&self, operation: Operation, modification: Modification) -> Result<(), ProxyError> {
        let mut state = self.check(operation)?;
        // Catch malformed writes now rather than at commit.
        if let Modification::Write(_, path, node) | Modification::Merge(_, path, node) = &modification {
            DataTree::new().put(path, node.clone())?;
        }
        state.modifications.push(modification);
        Ok(())
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    fn id(&self) -> TransactionId {
        self.id
    }

    fn kind(&self) -> TransactionKind {
        self.kind
    }

    async fn discard(&self) -> Result<(), ProxyError> {
        let mut state = self.check(Operation::Discard)?;
        state.closed = true;
        state.modifications.clear();
        debug!(resource = %self.device.resource, tx = %self.id, "Discarded");
        Ok(())
    }
}

#[async_trait]
impl ReadTransaction for MemoryTransaction {
    async fn read(&self, store: StoreKind, path: &DataPath) -> Result<Option<DataNode>, ProxyError> {
        // Closed or incapable transactions fail before any injected fault.
        drop(self.check(Operation::Read)?);
        self.read_faults(Operation::Read).await?;
        self.view(store, path)
    }

    async fn exists(&self, store: StoreKind, path: &DataPath) -> Result<bool, ProxyError> {
        drop(self.check(Operation::Exists)?);
        self.read_faults(Operation::Exists).await?;
        Ok(self.view(store, path)?.is_some())
    }
}

#[async_trait]
impl WriteTransaction for MemoryTransaction {
    async fn write(&self, store: StoreKind, path: &DataPath, node: DataNode) -> Result<(), ProxyError> {
        self.buffer(Operation::Write, Modification::Write(store, path.clone(), node))
    }

    async fn merge(&self, store: StoreKind, path: &DataPath, node: DataNode) -> Result<(), ProxyError> {
        self.buffer(Operation::Merge, Modification::Merge(store, path.clone(), node))
    }

    async fn delete(&self, store: StoreKind, path: &DataPath) -> Result<(), ProxyError> {
        self.buffer(Operation::Delete, Modification::Delete(store, path.clone()))
    }

    async fn commit(&self) -> Result<(), ProxyError> {
        let modifications = {
            let mut state = self.check(Operation::Submit)?;
            state.closed = true;
            std::mem::take(&mut state.modifications)
        };

        let fault = lock(&self.device.faults).commit.clone();
        if let Some(message) = fault {
            return Err(ProxyError::RemoteFailure(message));
        }

        let mut stores = self.device.stores.write().unwrap_or_else(PoisonError::into_inner);
        let mut staged = stores.clone();
        for modification in &modifications {
            modification.apply(staged.tree_mut(modification.store()))?;
        }
        *stores = staged;
        self.device.commits.fetch_add(1, Ordering::SeqCst);
        info!(
            resource = %self.device.resource,
            tx = %self.id,
            modifications = modifications.len(),
            "Committed"
        );
        Ok(())
    }
}
