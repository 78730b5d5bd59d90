//! Resource connection provider contract and an in-memory device.

mod memory;

pub use memory::*;

use crate::error::ProxyError;
use crate::model::{ResourceId, SourceIdentifier};
use crate::transaction::{SharedFactory, SharedRpc};
use async_trait::async_trait;

/// Everything a master needs from a live device connection.
#[derive(Clone)]
pub struct DeviceSession {
    pub factory: SharedFactory,
    pub sources: Vec<SourceIdentifier>,
    pub rpc: SharedRpc,
}

/// Opens connections to devices. Only the owning member calls this.
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    async fn connect(&self, resource: &ResourceId) -> Result<DeviceSession, ProxyError>;
}
