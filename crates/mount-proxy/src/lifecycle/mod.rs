//! # Cluster Lifecycle
//!
//! Runtime wiring of members, devices and ownership.
//!
//! - [`ownership`] - [`Ownership`], the [`OwnershipService`] mounts follow, and the in-memory
//!   [`ElectionBoard`].
//! - [`fabric`] - [`ClusterFabric`], how a member reaches the masters of other members.
//! - [`mount`] - [`DeviceMount`], one resource on one member, switching between owning the
//!   device and proxying to its owner.
//! - [`ClusterNode`] - a member and all of its mounts.
//!
//! ## Ownership Transitions
//!
//! Ownership is decided elsewhere and only observed here. On every change a mount:
//!
//! 1. **Becomes owner** - connects the device, spawns and initializes a
//!    [`MasterActor`](crate::master::MasterActor), registers it on the fabric and switches its
//!    broker to real transactions.
//! 2. **Follows a remote owner** - closes its own master if it had one and switches its broker
//!    to proxies over a fresh fabric link.
//! 3. **Loses every owner** - closes its master; the broker fails with `NoOwner`.
//!
//! Transactions opened before a transition keep talking to what they were opened against.
//! A proxy whose master was closed in the meantime fails with `MasterClosed` or
//! `RemoteFailure`.
//!
//! ## Shutdown
//!
//! [`ClusterNode::shutdown`] stops each mount in turn. A mount closes its master (discarding
//! whatever transactions were still open), unregisters it from the fabric and leaves its broker
//! `Unassigned`.

mod cluster_node;
pub mod fabric;
pub mod mount;
pub mod ownership;

pub use cluster_node::*;
pub use fabric::ClusterFabric;
pub use mount::{DeviceMount, MountState};
pub use ownership::{ElectionBoard, MemberView, Ownership, OwnershipService};
