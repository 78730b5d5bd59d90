//! Data model shared by the master, the proxies and the wire.

mod ids;
mod node;
mod path;

pub use ids::*;
pub use node::*;
pub use path::*;
