//! Exposes a master to remote members.

use super::client::MasterClient;
use super::messages::{TxReply, TxRequest};
use crate::error::ProxyError;
use ask_framework::link::{self, ClientLink, ServerLink};
use ask_framework::{serve, ChannelError, MessageChannel, RequestHandler};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Channel a proxy uses to reach a master.
pub type MasterChannel = MessageChannel<TxRequest, TxReply>;

/// Answers [`TxRequest`] frames by forwarding them into the master's mailbox.
pub struct MasterEndpoint {
    master: MasterClient,
}

impl MasterEndpoint {
    pub fn new(master: MasterClient) -> Self {
        Self { master }
    }

    /// Serves `link` on a new task.
    pub fn spawn(self, link: ServerLink) {
        tokio::spawn(serve(link, Arc::new(self)));
    }
}

#[async_trait]
impl RequestHandler for MasterEndpoint {
    type Request = TxRequest;
    type Response = TxReply;

    async fn handle(&self, request: TxRequest) -> TxReply {
        self.master.request(request).await
    }

    fn reject(&self, error: ChannelError) -> TxReply {
        TxReply::Failure(ProxyError::SerializationError(error.to_string()))
    }
}

/// Wires a fresh link to `master` and returns the client half, already connected.
pub fn connect_master(master: MasterClient, link_buffer: usize, ask_timeout: Duration) -> MasterChannel {
    let (client, server): (ClientLink, ServerLink) = link::pair(link_buffer);
    MasterEndpoint::new(master).spawn(server);
    MessageChannel::connect(client, ask_timeout)
}
