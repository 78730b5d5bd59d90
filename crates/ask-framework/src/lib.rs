//! # Ask Framework
//!
//! Building blocks for asking a remote member a question and waiting, boundedly, for the
//! answer. The crate knows nothing about what is being asked: requests and responses are any
//! `serde` types, and the framework only moves [`Frame`]s and matches replies to requests.
//!
//! ## The Ask Pattern
//!
//! ```text
//!  caller ──ask(req)──▶ MessageChannel ──Frame{id, body}──▶ link ──▶ serve() ──▶ RequestHandler
//!    ▲                      │ pending[id] = waiter                                   │
//!    └──── Ok(resp) ◀───────┴──────── Frame{id, body} ◀─── link ◀────────────────────┘
//!          or Err(Timeout) when the deadline passes first
//! ```
//!
//! - **Correlation**: every request gets a fresh id; the reply carries it back.
//! - **Deadline**: every request has its own timer; expiry removes the pending entry.
//! - **No retries**: a timeout is reported, never retried. Whether the remote side acted on
//!   the request is unknown to the channel.
//!
//! ## Module Tour
//!
//! - [`wire`] - [`Frame`] and JSON body encoding.
//! - [`link`] - in-memory duplex links between two members.
//! - [`channel`] - [`MessageChannel`], the asking side.
//! - [`endpoint`] - [`serve`] and [`RequestHandler`], the answering side.
//! - [`mock`] - [`MockEndpoint`](mock::MockEndpoint) for testing channel users.
//! - [`tracing`] - subscriber setup.
//! - [`error`] - [`ChannelError`].

pub mod channel;
pub mod endpoint;
pub mod error;
pub mod link;
pub mod mock;
pub mod tracing;
pub mod wire;

// Re-export core types for convenience
pub use channel::MessageChannel;
pub use endpoint::{serve, RequestHandler};
pub use error::ChannelError;
pub use link::{ClientLink, ServerLink};
pub use wire::{CorrelationId, Frame};
