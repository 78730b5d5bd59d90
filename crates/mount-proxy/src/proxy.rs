//! # Proxy Transactions
//!
//! Stand-ins for real transactions on members that do not own the device. Every call is
//! turned into a [`TxRequest`], asked of the owner's master over a [`MasterChannel`] and the
//! reply is mapped back into the transaction contract, so callers cannot tell a proxy from a
//! real transaction except by its latency and its failure modes.

use crate::error::ProxyError;
use crate::master::{MasterChannel, TxReply, TxRequest};
use crate::model::{DataNode, DataPath, Operation, StoreKind, TransactionId, TransactionKind};
use crate::transaction::{ReadTransaction, RpcService, Transaction, WriteTransaction};
use ask_framework::ChannelError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, instrument};

/// A transaction whose real counterpart lives in a remote master.
///
/// # Lifecycle
/// [`open`](Self::open) asks the master for a transaction id before returning, so a proxy
/// always refers to an existing master-side transaction. After [`commit`] or [`discard`] the
/// proxy refuses further calls without contacting the master. Dropping a proxy that is still
/// open sends a best-effort `Discard` so the master does not keep the transaction forever.
///
/// [`commit`]: WriteTransaction::commit
/// [`discard`]: Transaction::discard
pub struct ProxyTransaction {
    id: TransactionId,
    kind: TransactionKind,
    master: MasterChannel,
    closed: AtomicBool,
}

impl ProxyTransaction {
    /// Opens a transaction of `kind` at the master, waiting at most `timeout` for its id.
    ///
    /// The id is chosen here. If no reply arrives in time, a best-effort `Discard` for it is
    /// sent so that a late open at the master does not leave a transaction nobody knows of.
    #[instrument(skip_all, fields(%kind))]
    pub async fn open(master: MasterChannel, kind: TransactionKind, timeout: Duration) -> Result<Self, ProxyError> {
        let id = TransactionId::new();
        let reply = match master
            .ask_with_timeout(TxRequest::NewTransaction { id, kind }, timeout)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                if matches!(e, ChannelError::Timeout { .. }) {
                    abandon(master, id);
                }
                return Err(ProxyError::from_channel(Operation::NewTransaction, e));
            }
        };
        match reply {
            TxReply::TransactionCreated(created) => {
                debug!(tx = %created, "Proxy transaction opened");
                Ok(Self {
                    id: created,
                    kind,
                    master,
                    closed: AtomicBool::new(false),
                })
            }
            TxReply::Failure(e) => Err(e),
            other => Err(unexpected(Operation::NewTransaction, &other)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn ask(&self, request: TxRequest) -> Result<TxReply, ProxyError> {
        if self.is_closed() {
            return Err(ProxyError::TransactionClosed(self.id));
        }
        self.forward(request).await
    }

    /// Like `ask`, but marks the proxy finished before the request goes out.
    async fn finish(&self, request: TxRequest) -> Result<TxReply, ProxyError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(ProxyError::TransactionClosed(self.id));
        }
        self.forward(request).await
    }

    async fn forward(&self, request: TxRequest) -> Result<TxReply, ProxyError> {
        let operation = request.operation();
        match self.master.ask(request).await {
            Ok(TxReply::Failure(e)) => Err(e),
            Ok(reply) => Ok(reply),
            Err(e) => Err(ProxyError::from_channel(operation, e)),
        }
    }
}

fn unexpected(operation: Operation, reply: &TxReply) -> ProxyError {
    ProxyError::SerializationError(format!("unexpected reply to {}: {:?}", operation, reply))
}

fn expect_ack(operation: Operation, reply: TxReply) -> Result<(), ProxyError> {
    match reply {
        TxReply::Ack => Ok(()),
        other => Err(unexpected(operation, &other)),
    }
}

#[async_trait]
impl Transaction for ProxyTransaction {
    fn id(&self) -> TransactionId {
        self.id
    }

    fn kind(&self) -> TransactionKind {
        self.kind
    }

    #[instrument(skip_all, fields(tx = %self.id))]
    async fn discard(&self) -> Result<(), ProxyError> {
        match self.finish(TxRequest::Discard { id: self.id }).await? {
            TxReply::Discarded => Ok(()),
            other => Err(unexpected(Operation::Discard, &other)),
        }
    }
}

#[async_trait]
impl ReadTransaction for ProxyTransaction {
    #[instrument(skip_all, fields(tx = %self.id, %store, %path))]
    async fn read(&self, store: StoreKind, path: &DataPath) -> Result<Option<DataNode>, ProxyError> {
        let request = TxRequest::Read {
            id: self.id,
            store,
            path: path.clone(),
        };
        match self.ask(request).await? {
            TxReply::ReadResult(node) => Ok(node),
            other => Err(unexpected(Operation::Read, &other)),
        }
    }

    #[instrument(skip_all, fields(tx = %self.id, %store, %path))]
    async fn exists(&self, store: StoreKind, path: &DataPath) -> Result<bool, ProxyError> {
        let request = TxRequest::Exists {
            id: self.id,
            store,
            path: path.clone(),
        };
        match self.ask(request).await? {
            // No answer from the device means nothing is there.
            TxReply::ExistsResult(exists) => Ok(exists.unwrap_or(false)),
            other => Err(unexpected(Operation::Exists, &other)),
        }
    }
}

#[async_trait]
impl WriteTransaction for ProxyTransaction {
    #[instrument(skip_all, fields(tx = %self.id, %store, %path))]
    async fn write(&self, store: StoreKind, path: &DataPath, node: DataNode) -> Result<(), ProxyError> {
        let request = TxRequest::Write {
            id: self.id,
            store,
            path: path.clone(),
            node,
        };
        expect_ack(Operation::Write, self.ask(request).await?)
    }

    #[instrument(skip_all, fields(tx = %self.id, %store, %path))]
    async fn merge(&self, store: StoreKind, path: &DataPath, node: DataNode) -> Result<(), ProxyError> {
        let request = TxRequest::Merge {
            id: self.id,
            store,
            path: path.clone(),
            node,
        };
        expect_ack(Operation::Merge, self.ask(request).await?)
    }

    #[instrument(skip_all, fields(tx = %self.id, %store, %path))]
    async fn delete(&self, store: StoreKind, path: &DataPath) -> Result<(), ProxyError> {
        let request = TxRequest::Delete {
            id: self.id,
            store,
            path: path.clone(),
        };
        expect_ack(Operation::Delete, self.ask(request).await?)
    }

    #[instrument(skip_all, fields(tx = %self.id))]
    async fn commit(&self) -> Result<(), ProxyError> {
        match self.finish(TxRequest::Submit { id: self.id }).await? {
            TxReply::Submitted => Ok(()),
            other => Err(unexpected(Operation::Submit, &other)),
        }
    }
}

impl Drop for ProxyTransaction {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        abandon(self.master.clone(), self.id);
    }
}

/// Sends a `Discard` for `id` in the background, if there is a runtime to send it on.
fn abandon(master: MasterChannel, id: TransactionId) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        return;
    };
    runtime.spawn(async move {
        match master.ask(TxRequest::Discard { id }).await {
            Ok(TxReply::Discarded) => debug!(tx = %id, "Abandoned transaction discarded"),
            Ok(reply) => debug!(tx = %id, ?reply, "Abandoned transaction not discarded"),
            Err(e) => debug!(tx = %id, error = %e, "Abandoned transaction not discarded"),
        }
    });
}

/// Forwards RPC invocations to the owner's master.
#[derive(Clone)]
pub struct ProxyRpcService {
    master: MasterChannel,
}

impl ProxyRpcService {
    pub fn new(master: MasterChannel) -> Self {
        Self { master }
    }
}

#[async_trait]
impl RpcService for ProxyRpcService {
    #[instrument(skip(self, input))]
    async fn invoke_rpc(&self, name: &str, input: Option<DataNode>) -> Result<Option<DataNode>, ProxyError> {
        let request = TxRequest::InvokeRpc {
            name: name.to_string(),
            input,
        };
        match self.master.ask(request).await {
            Ok(TxReply::RpcResult(output)) => Ok(output),
            Ok(TxReply::Failure(e)) => Err(e),
            Ok(other) => Err(unexpected(Operation::InvokeRpc, &other)),
            Err(e) => Err(ProxyError::from_channel(Operation::InvokeRpc, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ask_framework::mock::MockEndpoint;

    const ASK: Duration = Duration::from_millis(200);

    fn path(s: &str) -> DataPath {
        s.parse().unwrap()
    }

    async fn open_proxy(mock: &mut MockEndpoint<TxRequest, TxReply>, kind: TransactionKind) -> ProxyTransaction {
        let id = TransactionId::new();
        mock.expect().reply(TxReply::TransactionCreated(id));
        let proxy = ProxyTransaction::open(mock.channel(), kind, ASK).await.unwrap();
        assert_eq!(proxy.id(), id);
        proxy
    }

    #[tokio::test]
    async fn test_read_returns_remote_node() {
        let mut mock = MockEndpoint::new(ASK);
        let proxy = open_proxy(&mut mock, TransactionKind::ReadOnly).await;
        let node = DataNode::leaf("mtu", "9000");
        mock.expect().reply(TxReply::ReadResult(Some(node.clone())));
        mock.expect().reply(TxReply::Discarded);

        let read = proxy.read(StoreKind::Config, &path("/mtu")).await.unwrap();
        assert_eq!(read, Some(node));
        proxy.discard().await.unwrap();

        let received = mock.received();
        assert_eq!(
            received[1],
            TxRequest::Read {
                id: proxy.id(),
                store: StoreKind::Config,
                path: path("/mtu"),
            }
        );
        assert_eq!(received[2], TxRequest::Discard { id: proxy.id() });
        mock.verify();
    }

    #[tokio::test]
    async fn test_absent_exists_answer_is_false() {
        let mut mock = MockEndpoint::new(ASK);
        let proxy = open_proxy(&mut mock, TransactionKind::ReadOnly).await;
        mock.expect().reply(TxReply::ExistsResult(None));
        mock.expect().reply(TxReply::Discarded);

        assert!(!proxy.exists(StoreKind::Operational, &path("/a")).await.unwrap());
        proxy.discard().await.unwrap();
        mock.verify();
    }

    #[tokio::test]
    async fn test_remote_failure_is_carried_verbatim() {
        let mut mock = MockEndpoint::new(ASK);
        let proxy = open_proxy(&mut mock, TransactionKind::ReadOnly).await;
        mock.expect()
            .reply(TxReply::Failure(ProxyError::RemoteFailure("Fail".to_string())));
        mock.expect().reply(TxReply::Discarded);

        let err = proxy.read(StoreKind::Config, &path("/a")).await.unwrap_err();
        assert_eq!(err, ProxyError::RemoteFailure("Fail".to_string()));
        proxy.discard().await.unwrap();
    }

    #[tokio::test]
    async fn test_read_timeout_is_reported() {
        let mut mock = MockEndpoint::new(ASK);
        let proxy = open_proxy(&mut mock, TransactionKind::ReadOnly).await;
        mock.expect().no_reply();
        mock.expect().reply(TxReply::Discarded);

        let err = proxy.read(StoreKind::Config, &path("/a")).await.unwrap_err();
        assert_eq!(
            err,
            ProxyError::Timeout {
                operation: Operation::Read,
                after: ASK,
            }
        );
        assert!(!err.outcome_unknown());
        assert_eq!(mock.channel().pending_requests(), 0);
        proxy.discard().await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_timeout_has_unknown_outcome() {
        let mut mock = MockEndpoint::new(ASK);
        let proxy = open_proxy(&mut mock, TransactionKind::WriteOnly).await;
        mock.expect().reply(TxReply::Ack);
        mock.expect().no_reply();

        proxy
            .write(StoreKind::Config, &path("/a"), DataNode::leaf("a", "1"))
            .await
            .unwrap();
        let err = proxy.commit().await.unwrap_err();
        assert!(err.outcome_unknown());

        // Finished whatever the outcome.
        assert_eq!(proxy.commit().await, Err(ProxyError::TransactionClosed(proxy.id())));
        mock.verify();
    }

    #[tokio::test]
    async fn test_closed_proxy_rejects_locally() {
        let mut mock = MockEndpoint::new(ASK);
        let proxy = open_proxy(&mut mock, TransactionKind::ReadWrite).await;
        mock.expect().reply(TxReply::Submitted);

        proxy.commit().await.unwrap();
        assert_eq!(
            proxy.read(StoreKind::Config, &path("/a")).await,
            Err(ProxyError::TransactionClosed(proxy.id()))
        );
        assert_eq!(proxy.discard().await, Err(ProxyError::TransactionClosed(proxy.id())));
        assert_eq!(mock.received().len(), 2);
        mock.verify();
    }

    #[tokio::test]
    async fn test_wrong_reply_shape_is_a_serialization_error() {
        let mut mock = MockEndpoint::new(ASK);
        let proxy = open_proxy(&mut mock, TransactionKind::ReadOnly).await;
        mock.expect().reply(TxReply::Submitted);
        mock.expect().garbage();
        mock.expect().reply(TxReply::Discarded);

        assert!(matches!(
            proxy.read(StoreKind::Config, &path("/a")).await,
            Err(ProxyError::SerializationError(_))
        ));
        assert!(matches!(
            proxy.exists(StoreKind::Config, &path("/a")).await,
            Err(ProxyError::SerializationError(_))
        ));
        proxy.discard().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_failure_fails_construction() {
        let mut mock = MockEndpoint::<TxRequest, TxReply>::new(ASK);
        mock.expect().reply(TxReply::Failure(ProxyError::NotInitialized));

        let err = ProxyTransaction::open(mock.channel(), TransactionKind::ReadOnly, ASK)
            .await
            .err()
            .unwrap();
        assert_eq!(err, ProxyError::NotInitialized);
        mock.verify();
    }

    #[tokio::test]
    async fn test_timed_out_open_is_discarded() {
        let mut mock = MockEndpoint::<TxRequest, TxReply>::new(ASK);
        mock.expect().no_reply();
        mock.expect().reply(TxReply::Discarded);

        let err = ProxyTransaction::open(mock.channel(), TransactionKind::ReadOnly, ASK)
            .await
            .err()
            .unwrap();
        assert_eq!(
            err,
            ProxyError::Timeout {
                operation: Operation::NewTransaction,
                after: ASK,
            }
        );

        for _ in 0..50 {
            if mock.received().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let received = mock.received();
        let id = received[0].transaction().unwrap();
        assert_eq!(received[1], TxRequest::Discard { id });
    }

    #[tokio::test]
    async fn test_dropped_proxy_sends_discard() {
        let mut mock = MockEndpoint::new(ASK);
        let proxy = open_proxy(&mut mock, TransactionKind::ReadOnly).await;
        let id = proxy.id();
        mock.expect().reply(TxReply::Discarded);

        drop(proxy);
        for _ in 0..50 {
            if mock.received().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(mock.received()[1], TxRequest::Discard { id });
    }

    #[tokio::test]
    async fn test_rpc_is_forwarded() {
        let mut mock = MockEndpoint::new(ASK);
        mock.expect()
            .reply(TxReply::RpcResult(Some(DataNode::leaf("pong", "ok"))));
        let rpc = ProxyRpcService::new(mock.channel());

        let output = rpc.invoke_rpc("ping", None).await.unwrap();
        assert_eq!(output, Some(DataNode::leaf("pong", "ok")));
        assert_eq!(
            mock.received(),
            vec![TxRequest::InvokeRpc {
                name: "ping".to_string(),
                input: None,
            }]
        );
    }
}
