//! # Request Endpoint
//!
//! The answering side of the framework. [`serve`] reads frames from a [`ServerLink`], decodes
//! them for a [`RequestHandler`] and sends the handler's answer back under the same
//! correlation id.

use crate::error::ChannelError;
use crate::link::ServerLink;
use crate::wire::Frame;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Something that can answer decoded requests.
///
/// # Architecture Note
/// The handler never sees frames or correlation ids. Every request gets exactly one response,
/// including requests that failed to decode: [`reject`](Self::reject) lets the handler phrase
/// that failure in its own response type so the asking side is not left waiting for a
/// timeout.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    type Request: DeserializeOwned + Send + Debug;
    type Response: Serialize + Send;

    /// Produces the response for one request.
    async fn handle(&self, request: Self::Request) -> Self::Response;

    /// Produces the response for a request whose body could not be decoded.
    fn reject(&self, error: ChannelError) -> Self::Response;
}

/// Serves requests from `link` until the client half is dropped.
///
/// Each frame is handled on its own task, so a slow request does not hold back the ones
/// behind it. Handlers that need one-at-a-time processing must serialize internally (e.g. by
/// forwarding into an actor mailbox).
pub async fn serve<H: RequestHandler>(link: ServerLink, handler: Arc<H>) {
    let ServerLink {
        mut inbound,
        outbound,
    } = link;
    info!("Endpoint started");

    while let Some(frame) = inbound.recv().await {
        let handler = handler.clone();
        let outbound = outbound.clone();
        tokio::spawn(async move {
            let correlation_id = frame.correlation_id;
            let response = match frame.decode::<H::Request>() {
                Ok(request) => {
                    debug!(correlation_id, ?request, "Request");
                    handler.handle(request).await
                }
                Err(e) => {
                    warn!(correlation_id, error = %e, "Undecodable request");
                    handler.reject(e)
                }
            };

            let reply = match Frame::encode(correlation_id, &response) {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(correlation_id, error = %e, "Reply not encodable");
                    match Frame::encode(correlation_id, &handler.reject(e)) {
                        Ok(reply) => reply,
                        Err(_) => return,
                    }
                }
            };
            if outbound.send(reply).await.is_err() {
                debug!(correlation_id, "Client gone, reply dropped");
            }
        });
    }

    info!("Endpoint stopped");
}
