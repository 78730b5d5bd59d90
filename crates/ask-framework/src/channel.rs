//! # Message Channel
//!
//! The asking side of the framework. A [`MessageChannel`] turns a typed request into a
//! [`Frame`], remembers who is waiting for the answer, and resolves that waiter when a frame
//! with the same correlation id comes back, or fails it when the deadline passes first.

use crate::error::ChannelError;
use crate::link::ClientLink;
use crate::wire::{CorrelationId, Frame};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

type PendingTable = Arc<Mutex<HashMap<CorrelationId, oneshot::Sender<Frame>>>>;

fn lock(table: &PendingTable) -> MutexGuard<'_, HashMap<CorrelationId, oneshot::Sender<Frame>>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Send-and-await-reply over a [`ClientLink`].
///
/// # Architecture Note
/// Each call to [`ask`](Self::ask) owns exactly one entry in the pending table for as long as
/// it is waiting. The entry goes away in every outcome: the reply dispatcher removes it when
/// the reply arrives, and a drop guard removes it on timeout or when the caller abandons the
/// future. A reply that shows up after that finds no waiter and is discarded.
///
/// The channel never retries and gives no ordering guarantee across requests. Callers that
/// need ordering (e.g. all calls of one transaction) must await each reply before sending the
/// next request.
///
/// Cloning is cheap; clones share the link, the pending table and the id counter.
pub struct MessageChannel<Req, Resp> {
    outbound: mpsc::Sender<Frame>,
    pending: PendingTable,
    next_id: Arc<AtomicU64>,
    link_down: Arc<AtomicBool>,
    timeout: Duration,
    _types: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> Clone for MessageChannel<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            outbound: self.outbound.clone(),
            pending: self.pending.clone(),
            next_id: self.next_id.clone(),
            link_down: self.link_down.clone(),
            timeout: self.timeout,
            _types: PhantomData,
        }
    }
}

impl<Req, Resp> MessageChannel<Req, Resp>
where
    Req: Serialize,
    Resp: DeserializeOwned,
{
    /// Wraps `link` and starts the reply dispatcher on the current Tokio runtime.
    ///
    /// `timeout` is the default per-request deadline used by [`ask`](Self::ask).
    pub fn connect(link: ClientLink, timeout: Duration) -> Self {
        let ClientLink { outbound, inbound } = link;
        let pending = PendingTable::default();
        let link_down = Arc::new(AtomicBool::new(false));
        tokio::spawn(dispatch_replies(inbound, pending.clone(), link_down.clone()));
        Self {
            outbound,
            pending,
            next_id: Arc::new(AtomicU64::new(1)),
            link_down,
            timeout,
            _types: PhantomData,
        }
    }

    /// The default per-request deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of requests currently waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Sends `request` and waits up to the default deadline for the reply.
    pub async fn ask(&self, request: Req) -> Result<Resp, ChannelError> {
        self.ask_with_timeout(request, self.timeout).await
    }

    /// Sends `request` and waits up to `timeout` for the reply.
    ///
    /// The deadline covers both handing the frame to the link and waiting for the answer.
    pub async fn ask_with_timeout(&self, request: Req, timeout: Duration) -> Result<Resp, ChannelError> {
        if self.link_down.load(Ordering::Acquire) {
            return Err(ChannelError::Dropped);
        }
        let correlation_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = Frame::encode(correlation_id, &request)?;

        let (respond_to, response) = oneshot::channel();
        lock(&self.pending).insert(correlation_id, respond_to);
        let _guard = PendingGuard {
            table: &self.pending,
            correlation_id,
        };

        let exchange = async {
            self.outbound
                .send(frame)
                .await
                .map_err(|_| ChannelError::Closed)?;
            debug!(correlation_id, "Request sent");
            response.await.map_err(|_| ChannelError::Dropped)
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(reply)) => reply.decode(),
            Ok(Err(e)) => {
                warn!(correlation_id, error = %e, "Request failed");
                Err(e)
            }
            Err(_) => {
                warn!(correlation_id, ?timeout, "Request timed out");
                Err(ChannelError::Timeout {
                    correlation_id,
                    after: timeout,
                })
            }
        }
    }
}

/// Removes a pending entry when the waiting future finishes or is dropped.
struct PendingGuard<'a> {
    table: &'a PendingTable,
    correlation_id: CorrelationId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.table).remove(&self.correlation_id);
    }
}

async fn dispatch_replies(mut inbound: mpsc::Receiver<Frame>, pending: PendingTable, link_down: Arc<AtomicBool>) {
    while let Some(frame) = inbound.recv().await {
        let waiter = lock(&pending).remove(&frame.correlation_id);
        match waiter {
            Some(respond_to) => {
                let _ = respond_to.send(frame);
            }
            None => debug!(correlation_id = frame.correlation_id, "Late reply dropped"),
        }
    }

    link_down.store(true, Ordering::Release);
    // Dropping the senders fails every remaining waiter with `Dropped`.
    let abandoned = {
        let mut table = lock(&pending);
        let count = table.len();
        table.clear();
        count
    };
    debug!(abandoned, "Reply link closed");
}
