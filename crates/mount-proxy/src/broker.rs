//! # Transaction Broker
//!
//! The factory callers use on every member. Whether a transaction is real or a proxy is
//! decided at creation time from the member's current [`Role`] for the resource; the caller
//! gets the same trait object either way.

use crate::error::ProxyError;
use crate::master::MasterChannel;
use crate::model::{DataNode, MemberAddress, ResourceId, TransactionKind};
use crate::proxy::{ProxyRpcService, ProxyTransaction};
use crate::transaction::{
    ReadTransaction, ReadWriteTransaction, RpcService, SharedFactory, SharedRpc, TransactionFactory, WriteTransaction,
};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// What this member currently is for one resource.
#[derive(Clone)]
pub enum Role {
    /// The device is local; transactions are real.
    Owner { factory: SharedFactory, rpc: SharedRpc },
    /// Another member owns the device; transactions are proxies to its master.
    Remote { owner: MemberAddress, master: MasterChannel },
    /// No owner is known.
    Unassigned,
}

impl fmt::Debug for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Owner { .. } => f.write_str("Owner"),
            Role::Remote { owner, .. } => f.debug_struct("Remote").field("owner", owner).finish_non_exhaustive(),
            Role::Unassigned => f.write_str("Unassigned"),
        }
    }
}

/// Publishes role changes to every clone of a [`Broker`].
pub struct RoleSwitch {
    resource: ResourceId,
    sender: watch::Sender<Role>,
}

impl RoleSwitch {
    pub fn set(&self, role: Role) {
        info!(resource = %self.resource, ?role, "Role changed");
        self.sender.send_replace(role);
    }

    pub fn current(&self) -> Role {
        self.sender.borrow().clone()
    }
}

/// Hands out real or proxy transactions for one resource.
///
/// Only creation looks at the role. A transaction keeps talking to whatever it was created
/// against, even if ownership moves while it is open.
#[derive(Clone)]
pub struct Broker {
    resource: ResourceId,
    role: watch::Receiver<Role>,
    new_transaction_timeout: Duration,
}

impl Broker {
    /// Creates a broker in the [`Role::Unassigned`] role and the switch that changes it.
    pub fn new(resource: ResourceId, new_transaction_timeout: Duration) -> (Self, RoleSwitch) {
        let (sender, role) = watch::channel(Role::Unassigned);
        let broker = Self {
            resource: resource.clone(),
            role,
            new_transaction_timeout,
        };
        (broker, RoleSwitch { resource, sender })
    }

    pub fn resource(&self) -> &ResourceId {
        &self.resource
    }

    pub fn role(&self) -> Role {
        self.role.borrow().clone()
    }

    async fn proxy(&self, master: MasterChannel, kind: TransactionKind) -> Result<ProxyTransaction, ProxyError> {
        ProxyTransaction::open(master, kind, self.new_transaction_timeout).await
    }
}

#[async_trait]
impl TransactionFactory for Broker {
    async fn new_read_only_transaction(&self) -> Result<Box<dyn ReadTransaction>, ProxyError> {
        match self.role() {
            Role::Owner { factory, .. } => factory.new_read_only_transaction().await,
            Role::Remote { owner, master } => {
                debug!(resource = %self.resource, %owner, "Opening read-only proxy");
                Ok(Box::new(self.proxy(master, TransactionKind::ReadOnly).await?))
            }
            Role::Unassigned => Err(ProxyError::NoOwner(self.resource.clone())),
        }
    }

    async fn new_write_only_transaction(&self) -> Result<Box<dyn WriteTransaction>, ProxyError> {
        match self.role() {
            Role::Owner { factory, .. } => factory.new_write_only_transaction().await,
            Role::Remote { owner, master } => {
                debug!(resource = %self.resource, %owner, "Opening write-only proxy");
                Ok(Box::new(self.proxy(master, TransactionKind::WriteOnly).await?))
            }
            Role::Unassigned => Err(ProxyError::NoOwner(self.resource.clone())),
        }
    }

    async fn new_read_write_transaction(&self) -> Result<Box<dyn ReadWriteTransaction>, ProxyError> {
        match self.role() {
            Role::Owner { factory, .. } => factory.new_read_write_transaction().await,
            Role::Remote { owner, master } => {
                debug!(resource = %self.resource, %owner, "Opening read-write proxy");
                Ok(Box::new(self.proxy(master, TransactionKind::ReadWrite).await?))
            }
            Role::Unassigned => Err(ProxyError::NoOwner(self.resource.clone())),
        }
    }
}

#[async_trait]
impl RpcService for Broker {
    async fn invoke_rpc(&self, name: &str, input: Option<DataNode>) -> Result<Option<DataNode>, ProxyError> {
        match self.role() {
            Role::Owner { rpc, .. } => rpc.invoke_rpc(name, input).await,
            Role::Remote { master, .. } => ProxyRpcService::new(master).invoke_rpc(name, input).await,
            Role::Unassigned => Err(ProxyError::NoOwner(self.resource.clone())),
        }
    }
}
