//! Who owns which device, as seen from one member.

use crate::model::{MemberAddress, ResourceId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::info;

/// Ownership of one resource relative to the observing member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ownership {
    Local,
    Remote(MemberAddress),
    Unowned,
}

impl Ownership {
    pub fn relative_to(owner: Option<&MemberAddress>, local: &MemberAddress) -> Self {
        match owner {
            Some(owner) if owner == local => Ownership::Local,
            Some(owner) => Ownership::Remote(owner.clone()),
            None => Ownership::Unowned,
        }
    }
}

/// Source of ownership decisions. How the owner is chosen is not this crate's concern; mounts
/// only follow what the service reports.
pub trait OwnershipService: Send + Sync {
    /// Current ownership of `resource` and every later change.
    fn watch(&self, resource: &ResourceId) -> watch::Receiver<Ownership>;
}

/// In-memory, cluster-wide ownership record. Whoever holds the board decides; useful for tests
/// and single-process demos.
#[derive(Clone, Default)]
pub struct ElectionBoard {
    owners: Arc<Mutex<HashMap<ResourceId, watch::Sender<Option<MemberAddress>>>>>,
}

impl ElectionBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `member` the owner of `resource`.
    pub fn elect(&self, resource: &ResourceId, member: MemberAddress) {
        info!(%resource, owner = %member, "Owner elected");
        self.publish(resource, Some(member));
    }

    /// Leaves `resource` without an owner.
    pub fn vacate(&self, resource: &ResourceId) {
        info!(%resource, "Ownership vacated");
        self.publish(resource, None);
    }

    pub fn owner(&self, resource: &ResourceId) -> Option<MemberAddress> {
        self.owners()
            .get(resource)
            .and_then(|owner| owner.borrow().clone())
    }

    /// The board as seen from `member`.
    pub fn view(&self, member: MemberAddress) -> MemberView {
        MemberView {
            board: self.clone(),
            member,
        }
    }

    fn publish(&self, resource: &ResourceId, owner: Option<MemberAddress>) {
        self.owners()
            .entry(resource.clone())
            .or_insert_with(|| watch::channel(None).0)
            .send_replace(owner);
    }

    fn subscribe(&self, resource: &ResourceId) -> watch::Receiver<Option<MemberAddress>> {
        self.owners()
            .entry(resource.clone())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    fn owners(&self) -> MutexGuard<'_, HashMap<ResourceId, watch::Sender<Option<MemberAddress>>>> {
        self.owners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One member's view of an [`ElectionBoard`].
#[derive(Clone)]
pub struct MemberView {
    board: ElectionBoard,
    member: MemberAddress,
}

impl OwnershipService for MemberView {
    /// Spawns a small task translating board changes for this member. The task ends when the
    /// returned receiver is dropped.
    fn watch(&self, resource: &ResourceId) -> watch::Receiver<Ownership> {
        let mut owners = self.board.subscribe(resource);
        let local = self.member.clone();
        let initial = Ownership::relative_to(owners.borrow_and_update().as_ref(), &local);
        let (sender, receiver) = watch::channel(initial);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = owners.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let ownership = Ownership::relative_to(owners.borrow_and_update().as_ref(), &local);
                        sender.send_replace(ownership);
                    }
                    _ = sender.closed() => break,
                }
            }
        });
        receiver
    }
}
