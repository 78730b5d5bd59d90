//! # Master Client
//!
//! In-process handle to a [`MasterActor`](super::MasterActor). Cheap to clone; every clone
//! talks to the same mailbox.

use super::messages::{MasterData, MasterDataInitialized, MasterRequest, MasterStatus, TxReply, TxRequest};
use crate::error::ProxyError;
use tokio::sync::{mpsc, oneshot};

#[derive(Clone)]
pub struct MasterClient {
    sender: mpsc::Sender<MasterRequest>,
}

impl MasterClient {
    pub fn new(sender: mpsc::Sender<MasterRequest>) -> Self {
        Self { sender }
    }

    /// Hands the master the device session it will serve. Must be acknowledged before any
    /// transaction request is accepted.
    pub async fn initialize(&self, data: MasterData) -> Result<MasterDataInitialized, ProxyError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(MasterRequest::Initialize { data, respond_to })
            .await
            .map_err(|_| ProxyError::MasterClosed)?;
        response.await.map_err(|_| ProxyError::MasterClosed)?
    }

    /// Processes one transaction request. Failures, including a master that is gone, come
    /// back as [`TxReply::Failure`] so the reply can be forwarded over the wire as is.
    pub async fn request(&self, request: TxRequest) -> TxReply {
        let (respond_to, response) = oneshot::channel();
        if self
            .sender
            .send(MasterRequest::Transaction {
                request,
                respond_to,
            })
            .await
            .is_err()
        {
            return TxReply::Failure(ProxyError::MasterClosed);
        }
        response
            .await
            .unwrap_or(TxReply::Failure(ProxyError::MasterClosed))
    }

    pub async fn status(&self) -> Result<MasterStatus, ProxyError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(MasterRequest::Status { respond_to })
            .await
            .map_err(|_| ProxyError::MasterClosed)?;
        response.await.map_err(|_| ProxyError::MasterClosed)
    }

    /// Discards every open transaction and refuses further requests.
    pub async fn close(&self) -> Result<(), ProxyError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(MasterRequest::Close { respond_to })
            .await
            .map_err(|_| ProxyError::MasterClosed)?;
        response.await.map_err(|_| ProxyError::MasterClosed)?
    }
}
