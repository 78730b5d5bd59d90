//! # Mock Endpoint & Testing Guide
//!
//! [`MockEndpoint`] stands in for a remote member. Instead of running a real
//! [`RequestHandler`](crate::RequestHandler), it answers each incoming request with the next
//! scripted [`Expectation`], which makes it easy to test code that sits *on top of* a
//! [`MessageChannel`] (e.g. a proxy) without running the real remote side.
//!
//! ## When to use the Mock vs a Real Endpoint
//!
//! | Feature | MockEndpoint | Real endpoint |
//! |---------|--------------|---------------|
//! | **State** | None (scripted replies) | Real handler state |
//! | **Error Injection** | Easy (`reply` with an error variant) | Needs a faulty backend |
//! | **Timeouts** | Easy (`no_reply`, `reply_after`) | Hard |
//! | **Wire faults** | Easy (`garbage`) | Practically impossible |
//!
//! ## Example
//!
//! ```rust
//! use ask_framework::mock::MockEndpoint;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut mock = MockEndpoint::<String, String>::new(Duration::from_secs(1));
//!     mock.expect().reply("pong".to_string());
//!
//!     let channel = mock.channel();
//!     assert_eq!(channel.ask("ping".to_string()).await.unwrap(), "pong");
//!
//!     assert_eq!(mock.received(), vec!["ping".to_string()]);
//!     mock.verify();
//! }
//! ```

use crate::channel::MessageChannel;
use crate::link;
use crate::wire::Frame;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::warn;

/// One scripted reaction to an incoming request.
enum Expectation<Resp> {
    Reply { response: Resp, delay: Option<Duration> },
    NoReply,
    Garbage,
}

type Script<Resp> = Arc<Mutex<VecDeque<Expectation<Resp>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A scripted remote endpoint with expectation tracking.
///
/// Requests are answered strictly in arrival order. A request arriving when the script is
/// empty gets no reply and is counted; [`verify`](Self::verify) fails afterwards.
pub struct MockEndpoint<Req, Resp> {
    channel: MessageChannel<Req, Resp>,
    script: Script<Resp>,
    received: Arc<Mutex<Vec<Req>>>,
    unexpected: Arc<AtomicUsize>,
    _handle: tokio::task::JoinHandle<()>,
}

impl<Req, Resp> MockEndpoint<Req, Resp>
where
    Req: Serialize + DeserializeOwned + Clone + Send + 'static,
    Resp: Serialize + DeserializeOwned + Send + 'static,
{
    /// Creates a mock endpoint and a connected channel using `timeout` as its default deadline.
    pub fn new(timeout: Duration) -> Self {
        let (client, mut server) = link::pair(100);
        let script: Script<Resp> = Arc::default();
        let received = Arc::new(Mutex::new(Vec::new()));
        let unexpected = Arc::new(AtomicUsize::new(0));

        let script_clone = script.clone();
        let received_clone = received.clone();
        let unexpected_clone = unexpected.clone();

        let handle = tokio::spawn(async move {
            while let Some(frame) = server.inbound.recv().await {
                if let Ok(request) = frame.decode::<Req>() {
                    lock(&received_clone).push(request);
                }
                let expectation = lock(&script_clone).pop_front();

                let reply = match expectation {
                    Some(Expectation::Reply { response, delay }) => {
                        if let Some(delay) = delay {
                            tokio::time::sleep(delay).await;
                        }
                        match Frame::encode(frame.correlation_id, &response) {
                            Ok(reply) => reply,
                            Err(_) => continue,
                        }
                    }
                    Some(Expectation::NoReply) => continue,
                    Some(Expectation::Garbage) => Frame {
                        correlation_id: frame.correlation_id,
                        body: b"\x00garbage".to_vec(),
                    },
                    None => {
                        warn!(correlation_id = frame.correlation_id, "Unexpected request");
                        unexpected_clone.fetch_add(1, Ordering::SeqCst);
                        continue;
                    }
                };
                let _ = server.outbound.send(reply).await;
            }
        });

        Self {
            channel: MessageChannel::connect(client, timeout),
            script,
            received,
            unexpected,
            _handle: handle,
        }
    }

    /// Returns a channel connected to this endpoint.
    pub fn channel(&self) -> MessageChannel<Req, Resp> {
        self.channel.clone()
    }

    /// Scripts the reaction to the next request.
    pub fn expect(&mut self) -> ExpectationBuilder<Resp> {
        ExpectationBuilder {
            script: self.script.clone(),
        }
    }

    /// All successfully decoded requests, in arrival order.
    pub fn received(&self) -> Vec<Req> {
        lock(&self.received).clone()
    }

    /// Verifies that every scripted expectation was consumed and nothing unexpected arrived.
    pub fn verify(&self) {
        let remaining = lock(&self.script).len();
        if remaining != 0 {
            panic!("Not all expectations were met. {} remaining", remaining);
        }
        let unexpected = self.unexpected.load(Ordering::SeqCst);
        if unexpected != 0 {
            panic!("{} unexpected request(s) arrived", unexpected);
        }
    }
}

/// Builder for one scripted reaction.
pub struct ExpectationBuilder<Resp> {
    script: Script<Resp>,
}

impl<Resp> ExpectationBuilder<Resp> {
    /// Answer immediately with `response`.
    pub fn reply(self, response: Resp) {
        self.push(Expectation::Reply {
            response,
            delay: None,
        });
    }

    /// Answer with `response` after `delay`. Later requests wait behind this one.
    pub fn reply_after(self, delay: Duration, response: Resp) {
        self.push(Expectation::Reply {
            response,
            delay: Some(delay),
        });
    }

    /// Swallow the request; the asker will time out.
    pub fn no_reply(self) {
        self.push(Expectation::NoReply);
    }

    /// Answer with a body that does not decode.
    pub fn garbage(self) {
        self.push(Expectation::Garbage);
    }

    fn push(self, expectation: Expectation<Resp>) {
        lock(&self.script).push_back(expectation);
    }
}
