//! # In-memory Links
//!
//! A link is a duplex pipe of [`Frame`]s between a client (the member asking) and a server
//! (the member answering). It is the boundary a real cluster transport would sit behind; the
//! rest of the framework only ever sees frames, never the typed values on either side.

use crate::wire::Frame;
use tokio::sync::mpsc;

/// The asking half: sends requests, receives replies.
#[derive(Debug)]
pub struct ClientLink {
    pub outbound: mpsc::Sender<Frame>,
    pub inbound: mpsc::Receiver<Frame>,
}

/// The answering half: receives requests, sends replies.
#[derive(Debug)]
pub struct ServerLink {
    pub inbound: mpsc::Receiver<Frame>,
    pub outbound: mpsc::Sender<Frame>,
}

/// Creates a connected pair of link halves, each direction buffering up to `buffer_size` frames.
pub fn pair(buffer_size: usize) -> (ClientLink, ServerLink) {
    let (request_tx, request_rx) = mpsc::channel(buffer_size);
    let (reply_tx, reply_rx) = mpsc::channel(buffer_size);
    (
        ClientLink {
            outbound: request_tx,
            inbound: reply_rx,
        },
        ServerLink {
            inbound: request_rx,
            outbound: reply_tx,
        },
    )
}
