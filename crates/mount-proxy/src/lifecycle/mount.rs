//! # Device Mount
//!
//! Keeps one member's [`Broker`] for one resource in line with the ownership reported by an
//! [`OwnershipService`].
//!
//! ```text
//!              Local                            Remote(owner)
//!   ┌──────────────────────────────┐   ┌──────────────────────────────────┐
//!   │ connect device               │   │ close local master, if any       │
//!   │ spawn + initialize master    │   │ open fabric link to owner        │
//!   │ register master on fabric    │   │ broker ─▶ Remote(owner, channel) │
//!   │ broker ─▶ Owner(factory)     │   └──────────────────────────────────┘
//!   └──────────────────────────────┘
//!              Unowned: close local master, broker ─▶ Unassigned
//! ```

use super::fabric::ClusterFabric;
use super::ownership::{Ownership, OwnershipService};
use crate::broker::{Broker, Role, RoleSwitch};
use crate::config::ProxyConfig;
use crate::device::DeviceConnector;
use crate::error::ProxyError;
use crate::master::{MasterActor, MasterClient, MasterData};
use crate::model::{MemberAddress, ResourceId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// What a mount has settled into after the last ownership change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountState {
    Unassigned,
    Owner,
    Remote(MemberAddress),
    /// This member should own the device but could not bring the master up.
    Failed(String),
}

/// Handle to a running mount.
pub struct DeviceMount {
    resource: ResourceId,
    broker: Broker,
    state: watch::Receiver<MountState>,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl DeviceMount {
    /// Starts following ownership of `resource`.
    pub fn start(
        member: MemberAddress,
        resource: ResourceId,
        ownership: &dyn OwnershipService,
        connector: Arc<dyn DeviceConnector>,
        fabric: ClusterFabric,
        config: &ProxyConfig,
    ) -> Self {
        let (broker, switch) = Broker::new(resource.clone(), config.new_transaction_timeout());
        let (state_tx, state) = watch::channel(MountState::Unassigned);
        let (shutdown, shutdown_rx) = oneshot::channel();

        let task = MountTask {
            member,
            resource: resource.clone(),
            connector,
            fabric,
            switch,
            state: state_tx,
            master: None,
            ask_timeout: config.ask_timeout(),
            mailbox_size: config.mailbox_size,
        };
        let handle = tokio::spawn(task.run(ownership.watch(&resource), shutdown_rx));

        Self {
            resource,
            broker,
            state,
            shutdown,
            handle,
        }
    }

    pub fn resource(&self) -> &ResourceId {
        &self.resource
    }

    /// The factory callers should use for this resource.
    pub fn broker(&self) -> Broker {
        self.broker.clone()
    }

    pub fn state(&self) -> MountState {
        self.state.borrow().clone()
    }

    /// Waits until the mount has settled into `expected`. Returns false after `timeout`.
    pub async fn wait_for(&self, expected: &MountState, timeout: Duration) -> bool {
        let mut state = self.state.clone();
        let settled = state.wait_for(|current| current == expected);
        let reached = matches!(tokio::time::timeout(timeout, settled).await, Ok(Ok(_)));
        reached
    }

    /// Closes any local master and stops following ownership.
    pub async fn shutdown(self) -> Result<(), tokio::task::JoinError> {
        let _ = self.shutdown.send(());
        self.handle.await
    }
}

struct LocalMaster {
    client: MasterClient,
}

struct MountTask {
    member: MemberAddress,
    resource: ResourceId,
    connector: Arc<dyn DeviceConnector>,
    fabric: ClusterFabric,
    switch: RoleSwitch,
    state: watch::Sender<MountState>,
    master: Option<LocalMaster>,
    ask_timeout: Duration,
    mailbox_size: usize,
}

impl MountTask {
    async fn run(mut self, mut ownership: watch::Receiver<Ownership>, mut shutdown: oneshot::Receiver<()>) {
        info!(member = %self.member, resource = %self.resource, "Mount started");
        let initial = ownership.borrow_and_update().clone();
        self.apply(initial).await;

        loop {
            tokio::select! {
                changed = ownership.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let next = ownership.borrow_and_update().clone();
                    self.apply(next).await;
                }
                _ = &mut shutdown => break,
            }
        }

        self.release_master().await;
        self.switch.set(Role::Unassigned);
        self.state.send_replace(MountState::Unassigned);
        info!(member = %self.member, resource = %self.resource, "Mount stopped");
    }

    async fn apply(&mut self, ownership: Ownership) {
        let current = self.state.borrow().clone();
        match ownership {
            Ownership::Local => {
                if current == MountState::Owner {
                    return;
                }
                let state = match self.become_owner().await {
                    Ok(()) => MountState::Owner,
                    Err(e) => {
                        warn!(member = %self.member, resource = %self.resource, error = %e, "Cannot become owner");
                        self.switch.set(Role::Unassigned);
                        MountState::Failed(e.to_string())
                    }
                };
                self.state.send_replace(state);
            }
            Ownership::Remote(owner) => {
                if current == MountState::Remote(owner.clone()) {
                    return;
                }
                self.release_master().await;
                let master = self.fabric.connect(&owner, &self.resource, self.ask_timeout);
                self.switch.set(Role::Remote {
                    owner: owner.clone(),
                    master,
                });
                self.state.send_replace(MountState::Remote(owner));
            }
            Ownership::Unowned => {
                self.release_master().await;
                self.switch.set(Role::Unassigned);
                self.state.send_replace(MountState::Unassigned);
            }
        }
    }

    async fn become_owner(&mut self) -> Result<(), ProxyError> {
        let session = self.connector.connect(&self.resource).await?;
        let (actor, client) = MasterActor::new(self.resource.clone(), self.mailbox_size);
        tokio::spawn(actor.run());

        let factory = session.factory.clone();
        let rpc = session.rpc.clone();
        client.initialize(MasterData::from(session)).await?;

        self.fabric
            .register(self.member.clone(), self.resource.clone(), client.clone());
        self.master = Some(LocalMaster { client });
        self.switch.set(Role::Owner { factory, rpc });
        Ok(())
    }

    async fn release_master(&mut self) {
        let Some(master) = self.master.take() else {
            return;
        };
        self.fabric.unregister(&self.member, &self.resource);
        if let Err(e) = master.client.close().await {
            warn!(member = %self.member, resource = %self.resource, error = %e, "Master close failed");
        }
    }
}
