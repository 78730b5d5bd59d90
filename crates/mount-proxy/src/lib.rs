//! # Mount Proxy
//!
//! Cluster-wide transactional access to devices that only one member can reach at a time.
//!
//! The member that owns a device runs a [`MasterActor`](master::MasterActor) serializing all
//! access to it. Every other member gets [`ProxyTransaction`](proxy::ProxyTransaction)s that
//! forward each operation to that master over an [`ask_framework`] channel. Callers only ever
//! see a [`Broker`](broker::Broker) and the traits in [`transaction`].
//!
//! ## Modules
//!
//! - **[model]**: identifiers, paths and data trees.
//! - **[transaction]**: the capability contract shared by real and proxy transactions.
//! - **[device]**: device connections, plus an in-memory device.
//! - **[master]**: the owner side.
//! - **[proxy]**: the non-owner side.
//! - **[broker]**: picks real or proxy per the member's current role.
//! - **[lifecycle]**: ownership, the cluster fabric, mounts and members.
//! - **[config]** / **[error]**.

pub mod broker;
pub mod config;
pub mod device;
pub mod error;
pub mod lifecycle;
pub mod master;
pub mod model;
pub mod proxy;
pub mod transaction;
