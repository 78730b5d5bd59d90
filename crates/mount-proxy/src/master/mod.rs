//! # Master Side
//!
//! Everything that runs on the member owning a device:
//!
//! - [`messages`] - the transaction protocol and the actor's mailbox messages.
//! - [`MasterActor`] - sequential processor holding the real transactions.
//! - [`MasterClient`] - in-process handle to the actor.
//! - [`MasterEndpoint`] - makes the actor reachable over a link.

mod actor;
mod client;
mod endpoint;
pub mod messages;

pub use actor::MasterActor;
pub use client::MasterClient;
pub use endpoint::{connect_master, MasterChannel, MasterEndpoint};
pub use messages::{MasterData, MasterDataInitialized, MasterState, MasterStatus, TxReply, TxRequest};
