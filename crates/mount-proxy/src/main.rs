//! # Mount Proxy Demo
//!
//! Two members share one in-memory device. Member `a` is elected owner; member `b` writes
//! through proxies and reads back what `a` sees. Ownership then moves to `b`.
//!
//! Pass a TOML file as the first argument to override [`ProxyConfig`] defaults.

use ask_framework::tracing::setup_tracing;
use mount_proxy::config::ProxyConfig;
use mount_proxy::device::{InMemoryConnector, InMemoryDevice};
use mount_proxy::lifecycle::{ClusterFabric, ClusterNode, ElectionBoard, MountState};
use mount_proxy::model::{DataNode, DataPath, MemberAddress, ResourceId, SourceIdentifier, StoreKind};
use mount_proxy::transaction::TransactionFactory;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Instrument};

#[tokio::main]
async fn main() -> Result<(), String> {
    setup_tracing();

    let config = match std::env::args().nth(1) {
        Some(path) => ProxyConfig::load(&path).map_err(|e| e.to_string())?,
        None => ProxyConfig::default(),
    };
    info!(?config, "Starting two-member demo");

    let resource = ResourceId::new("router-1");
    let device = InMemoryDevice::with_sources(
        resource.clone(),
        vec![SourceIdentifier::new("interfaces", Some("2024-01-01"))],
    );
    let connector = Arc::new(InMemoryConnector::new().with_device(device.clone()));
    let board = ElectionBoard::new();
    let fabric = ClusterFabric::new(config.link_buffer);

    let a = MemberAddress::new("member-a");
    let b = MemberAddress::new("member-b");
    let mut node_a = ClusterNode::new(
        a.clone(),
        Arc::new(board.view(a.clone())),
        connector.clone(),
        fabric.clone(),
        config.clone(),
    );
    let mut node_b = ClusterNode::new(
        b.clone(),
        Arc::new(board.view(b.clone())),
        connector,
        fabric,
        config,
    );
    node_a.mount(resource.clone());
    let broker_b = node_b.mount(resource.clone());

    board.elect(&resource, a.clone());
    settle(&node_a, &resource, MountState::Owner).await?;
    settle(&node_b, &resource, MountState::Remote(a.clone())).await?;

    let path = "/interfaces/eth0/mtu"
        .parse::<DataPath>()
        .map_err(|e| e.to_string())?;
    async {
        let tx = broker_b
            .new_write_only_transaction()
            .await
            .map_err(|e| e.to_string())?;
        tx.write(StoreKind::Config, &path, DataNode::leaf("mtu", "9000"))
            .await
            .map_err(|e| e.to_string())?;
        tx.commit().await.map_err(|e| e.to_string())?;
        info!(tx = %tx.id(), "Committed through proxy");
        Ok::<_, String>(())
    }
    .instrument(tracing::info_span!("proxy_write", member = %b))
    .await?;

    info!(stored = ?device.get(StoreKind::Config, &path), "Device content");

    board.elect(&resource, b.clone());
    settle(&node_b, &resource, MountState::Owner).await?;

    let tx = broker_b
        .new_read_only_transaction()
        .await
        .map_err(|e| e.to_string())?;
    let node = tx
        .read(StoreKind::Config, &path)
        .await
        .map_err(|e| e.to_string())?;
    tx.discard().await.map_err(|e| e.to_string())?;
    info!(?node, "Read back as owner");

    node_a.shutdown().await.map_err(|e| e.to_string())?;
    node_b.shutdown().await.map_err(|e| e.to_string())?;
    info!("Demo complete");
    Ok(())
}

async fn settle(node: &ClusterNode, resource: &ResourceId, expected: MountState) -> Result<(), String> {
    let mount = node
        .device(resource)
        .ok_or_else(|| format!("{} is not mounted", resource))?;
    if mount.wait_for(&expected, Duration::from_secs(5)).await {
        Ok(())
    } else {
        Err(format!("{} did not reach {:?}, is {:?}", node.member(), expected, mount.state()))
    }
}
