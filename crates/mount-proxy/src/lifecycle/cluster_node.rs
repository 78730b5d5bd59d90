use super::fabric::ClusterFabric;
use super::mount::DeviceMount;
use super::ownership::OwnershipService;
use crate::broker::Broker;
use crate::config::ProxyConfig;
use crate::device::DeviceConnector;
use crate::model::{MemberAddress, ResourceId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

/// One cluster member and every device it mounts.
///
/// `ClusterNode` is responsible for:
/// - **Wiring**: giving each mount the member's ownership view, device connector and fabric
/// - **Lookup**: handing out the broker of a mounted resource
/// - **Shutdown**: stopping every mount, which closes the masters this member runs
///
/// # Example
///
/// ```ignore
/// let node = ClusterNode::new(member, Arc::new(board.view(member.clone())), connector, fabric, config);
/// let broker = node.mount(ResourceId::new("router-1"));
/// let tx = broker.new_read_only_transaction().await?;
/// node.shutdown().await?;
/// ```
pub struct ClusterNode {
    member: MemberAddress,
    ownership: Arc<dyn OwnershipService>,
    connector: Arc<dyn DeviceConnector>,
    fabric: ClusterFabric,
    config: ProxyConfig,
    mounts: HashMap<ResourceId, DeviceMount>,
}

impl ClusterNode {
    pub fn new(
        member: MemberAddress,
        ownership: Arc<dyn OwnershipService>,
        connector: Arc<dyn DeviceConnector>,
        fabric: ClusterFabric,
        config: ProxyConfig,
    ) -> Self {
        Self {
            member,
            ownership,
            connector,
            fabric,
            config,
            mounts: HashMap::new(),
        }
    }

    pub fn member(&self) -> &MemberAddress {
        &self.member
    }

    /// Mounts `resource` on this member and returns its broker. Mounting twice returns the
    /// existing broker.
    pub fn mount(&mut self, resource: ResourceId) -> Broker {
        if let Some(mount) = self.mounts.get(&resource) {
            return mount.broker();
        }
        info!(member = %self.member, %resource, "Mounting");
        let mount = DeviceMount::start(
            self.member.clone(),
            resource.clone(),
            self.ownership.as_ref(),
            self.connector.clone(),
            self.fabric.clone(),
            &self.config,
        );
        let broker = mount.broker();
        self.mounts.insert(resource, mount);
        broker
    }

    pub fn device(&self, resource: &ResourceId) -> Option<&DeviceMount> {
        self.mounts.get(resource)
    }

    /// Stops every mount and waits for them to finish.
    pub async fn shutdown(self) -> Result<(), tokio::task::JoinError> {
        info!(member = %self.member, mounts = self.mounts.len(), "Shutting down member...");
        for (resource, mount) in self.mounts {
            if let Err(e) = mount.shutdown().await {
                error!(member = %self.member, %resource, "Mount task failed: {:?}", e);
                return Err(e);
            }
        }
        info!(member = %self.member, "Member shutdown complete.");
        Ok(())
    }
}
