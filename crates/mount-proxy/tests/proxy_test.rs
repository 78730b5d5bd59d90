use mount_proxy::device::InMemoryDevice;
use mount_proxy::error::ProxyError;
use mount_proxy::master::{connect_master, MasterActor, MasterChannel, MasterClient, TxReply, TxRequest};
use mount_proxy::model::{
    DataNode, DataPath, Operation, ResourceId, SourceIdentifier, StoreKind, TransactionId, TransactionKind,
};
use mount_proxy::proxy::ProxyTransaction;
use mount_proxy::transaction::{ReadTransaction, Transaction, WriteTransaction};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

fn path(s: &str) -> DataPath {
    s.parse().expect("valid path")
}

fn interface(name: &str, mtu: &str) -> DataNode {
    DataNode::container(name).with_child(DataNode::leaf("mtu", mtu))
}

/// A device with a master already initialized, reachable over a link.
async fn mounted_device() -> (InMemoryDevice, MasterClient, MasterChannel) {
    let device = InMemoryDevice::with_sources(
        ResourceId::new("router-1"),
        vec![SourceIdentifier::new("interfaces", Some("2024-01-01"))],
    );
    let (actor, master) = MasterActor::new(device.resource().clone(), 32);
    tokio::spawn(actor.run());
    master
        .initialize(device.session().into())
        .await
        .expect("Failed to initialize master");
    let channel = connect_master(master.clone(), 64, TIMEOUT);
    (device, master, channel)
}

#[tokio::test]
async fn test_read_of_empty_root_is_absent() {
    let (_device, _master, channel) = mounted_device().await;

    let tx = ProxyTransaction::open(channel, TransactionKind::ReadOnly, TIMEOUT)
        .await
        .expect("Failed to open proxy");
    let node = tx.read(StoreKind::Config, &DataPath::root()).await.unwrap();
    assert_eq!(node, None);
    tx.discard().await.unwrap();
}

#[tokio::test]
async fn test_write_submit_then_read_back() {
    let (device, _master, channel) = mounted_device().await;
    let eth0 = interface("eth0", "1500");

    let tx = ProxyTransaction::open(channel.clone(), TransactionKind::WriteOnly, TIMEOUT)
        .await
        .expect("Failed to open proxy");
    tx.write(StoreKind::Config, &path("/interfaces/eth0"), eth0.clone())
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let rx = ProxyTransaction::open(channel, TransactionKind::ReadOnly, TIMEOUT)
        .await
        .expect("Failed to open proxy");
    let node = rx
        .read(StoreKind::Config, &path("/interfaces/eth0"))
        .await
        .unwrap();
    assert_eq!(node, Some(eth0));
    assert!(rx.exists(StoreKind::Config, &path("/interfaces")).await.unwrap());
    rx.discard().await.unwrap();
    assert_eq!(device.commits(), 1);
}

#[tokio::test]
async fn test_proxy_matches_real_transaction() {
    let (device, _master, channel) = mounted_device().await;
    device
        .seed(StoreKind::Config, &path("/interfaces/eth0"), interface("eth0", "1500"))
        .unwrap();
    device
        .seed(StoreKind::Operational, &path("/uptime"), DataNode::leaf("uptime", "42"))
        .unwrap();

    let real = device.session().factory.new_read_only_transaction().await.unwrap();
    let proxy = ProxyTransaction::open(channel, TransactionKind::ReadOnly, TIMEOUT)
        .await
        .unwrap();

    for store in [StoreKind::Config, StoreKind::Operational] {
        for p in ["/", "/interfaces", "/interfaces/eth0/mtu", "/uptime", "/missing/leaf"] {
            let p = path(p);
            assert_eq!(
                real.read(store, &p).await.unwrap(),
                proxy.read(store, &p).await.unwrap(),
                "read {} {}",
                store,
                p
            );
            assert_eq!(
                real.exists(store, &p).await.unwrap(),
                proxy.exists(store, &p).await.unwrap(),
                "exists {} {}",
                store,
                p
            );
        }
    }
    proxy.discard().await.unwrap();
}

#[tokio::test]
async fn test_device_fault_arrives_before_timeout() {
    let (device, _master, channel) = mounted_device().await;
    device.fail_reads("Fail");

    let tx = ProxyTransaction::open(channel, TransactionKind::ReadOnly, TIMEOUT)
        .await
        .unwrap();
    let started = tokio::time::Instant::now();
    let err = tx.read(StoreKind::Config, &path("/a")).await.unwrap_err();
    assert_eq!(err, ProxyError::RemoteFailure("Fail".to_string()));
    assert!(started.elapsed() < TIMEOUT);

    let err = tx.exists(StoreKind::Config, &path("/a")).await.unwrap_err();
    assert_eq!(err, ProxyError::RemoteFailure("Fail".to_string()));
    tx.discard().await.unwrap();
}

#[tokio::test]
async fn test_requests_before_initialization_are_refused() {
    let device = InMemoryDevice::new(ResourceId::new("router-1"));
    let (actor, master) = MasterActor::new(device.resource().clone(), 32);
    tokio::spawn(actor.run());
    let channel = connect_master(master.clone(), 64, TIMEOUT);

    let err = ProxyTransaction::open(channel.clone(), TransactionKind::ReadOnly, TIMEOUT)
        .await
        .err()
        .expect("Open should fail before initialization");
    assert_eq!(err, ProxyError::NotInitialized);

    // Messages for transactions nobody opened are refused the same way, not as unknown ids.
    let id = TransactionId::new();
    let early = vec![
        TxRequest::Read {
            id,
            store: StoreKind::Config,
            path: DataPath::root(),
        },
        TxRequest::Submit { id },
    ];
    for request in early {
        let reply = channel.ask(request).await.expect("reply before initialization");
        assert_eq!(reply, TxReply::Failure(ProxyError::NotInitialized));
    }

    let ack = master.initialize(device.session().into()).await.unwrap();
    assert_eq!(ack.resource, ResourceId::new("router-1"));

    let tx = ProxyTransaction::open(channel, TransactionKind::ReadOnly, TIMEOUT)
        .await
        .expect("Open should succeed after initialization");
    tx.discard().await.unwrap();
}

#[tokio::test]
async fn test_second_initialization_leaves_first_in_place() {
    let (device, master, channel) = mounted_device().await;
    device
        .seed(StoreKind::Config, &path("/hostname"), DataNode::leaf("hostname", "edge-1"))
        .unwrap();

    let other = InMemoryDevice::new(ResourceId::new("router-2"));
    let err = master.initialize(other.session().into()).await.unwrap_err();
    assert_eq!(err, ProxyError::AlreadyInitialized);

    let status = master.status().await.unwrap();
    assert_eq!(status.sources.len(), 1);

    let tx = ProxyTransaction::open(channel, TransactionKind::ReadOnly, TIMEOUT)
        .await
        .unwrap();
    assert_eq!(
        tx.read(StoreKind::Config, &path("/hostname")).await.unwrap(),
        Some(DataNode::leaf("hostname", "edge-1"))
    );
    tx.discard().await.unwrap();
    assert_eq!(other.opened_transactions(), 0);
}

#[tokio::test]
async fn test_concurrent_proxies_get_distinct_ids() {
    let (device, master, channel) = mounted_device().await;
    device.delay_reads(Duration::from_millis(20));

    let mut handles = Vec::new();
    for i in 0..8 {
        let channel = channel.clone();
        handles.push(tokio::spawn(async move {
            let tx = ProxyTransaction::open(channel, TransactionKind::ReadWrite, TIMEOUT)
                .await
                .unwrap();
            let name = format!("if{}", i);
            tx.write(StoreKind::Config, &path(&format!("/{}", name)), interface(&name, "1500"))
                .await
                .unwrap();
            assert!(tx
                .exists(StoreKind::Config, &path(&format!("/{}", name)))
                .await
                .unwrap());
            let id = tx.id();
            tx.commit().await.unwrap();
            id
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }
    ids.sort_by_key(|id| id.to_string());
    ids.dedup();
    assert_eq!(ids.len(), 8);
    assert_eq!(device.commits(), 8);
    assert_eq!(master.status().await.unwrap().open_transactions, 0);
}

#[tokio::test]
async fn test_finished_ids_are_rejected_by_the_master() {
    let (_device, master, channel) = mounted_device().await;

    let tx = ProxyTransaction::open(channel, TransactionKind::ReadOnly, TIMEOUT)
        .await
        .unwrap();
    let id = tx.id();
    tx.discard().await.unwrap();

    let reply = master
        .request(TxRequest::Read {
            id,
            store: StoreKind::Config,
            path: DataPath::root(),
        })
        .await;
    assert_eq!(
        reply,
        TxReply::Failure(ProxyError::NoSuchTransaction(id))
    );
}

#[tokio::test]
async fn test_failed_commit_leaves_device_untouched() {
    let (device, _master, channel) = mounted_device().await;
    device.fail_commits("disk full");

    let tx = ProxyTransaction::open(channel, TransactionKind::WriteOnly, TIMEOUT)
        .await
        .unwrap();
    tx.write(StoreKind::Config, &path("/a"), DataNode::leaf("a", "1"))
        .await
        .unwrap();
    let err = tx.commit().await.unwrap_err();
    assert!(matches!(err, ProxyError::RemoteFailure(_)));
    assert!(!err.outcome_unknown());
    assert_eq!(device.get(StoreKind::Config, &path("/a")), None);
}

#[tokio::test]
async fn test_merge_and_delete_through_proxy() {
    let (device, _master, channel) = mounted_device().await;
    device
        .seed(
            StoreKind::Config,
            &path("/interfaces/eth0"),
            interface("eth0", "1500").with_child(DataNode::leaf("description", "uplink")),
        )
        .unwrap();
    device
        .seed(StoreKind::Config, &path("/interfaces/eth1"), interface("eth1", "1500"))
        .unwrap();

    let tx = ProxyTransaction::open(channel.clone(), TransactionKind::ReadWrite, TIMEOUT)
        .await
        .unwrap();
    tx.merge(
        StoreKind::Config,
        &path("/interfaces/eth0"),
        DataNode::container("eth0")
            .with_child(DataNode::leaf("mtu", "9000"))
            .with_child(DataNode::leaf("enabled", "true")),
    )
    .await
    .unwrap();
    tx.delete(StoreKind::Config, &path("/interfaces/eth0/description"))
        .await
        .unwrap();
    tx.delete(StoreKind::Config, &path("/interfaces/eth1")).await.unwrap();
    assert!(!tx.exists(StoreKind::Config, &path("/interfaces/eth1")).await.unwrap());
    tx.commit().await.unwrap();

    let expected = DataNode::container("eth0")
        .with_child(DataNode::leaf("mtu", "9000"))
        .with_child(DataNode::leaf("enabled", "true"));
    let rx = ProxyTransaction::open(channel, TransactionKind::ReadOnly, TIMEOUT)
        .await
        .unwrap();
    assert_eq!(
        rx.read(StoreKind::Config, &path("/interfaces/eth0")).await.unwrap(),
        Some(expected.clone())
    );
    assert_eq!(rx.read(StoreKind::Config, &path("/interfaces/eth1")).await.unwrap(), None);
    rx.discard().await.unwrap();
    assert_eq!(device.get(StoreKind::Config, &path("/interfaces/eth0")), Some(expected));
}

#[tokio::test]
async fn test_timed_out_open_leaves_no_transaction_behind() {
    let (device, master, channel) = mounted_device().await;
    device.delay_reads(Duration::from_millis(300));

    // Keep the master busy with a slow read.
    let busy = ProxyTransaction::open(channel.clone(), TransactionKind::ReadOnly, TIMEOUT)
        .await
        .unwrap();
    let slow_read = tokio::spawn(async move {
        busy.read(StoreKind::Config, &DataPath::root()).await.unwrap();
        busy.discard().await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let err = ProxyTransaction::open(channel, TransactionKind::ReadWrite, Duration::from_millis(50))
        .await
        .err()
        .expect("Open should time out while the master is busy");
    assert_eq!(
        err,
        ProxyError::Timeout {
            operation: Operation::NewTransaction,
            after: Duration::from_millis(50),
        }
    );

    slow_read.await.unwrap();
    let mut open = usize::MAX;
    for _ in 0..100 {
        open = master.status().await.unwrap().open_transactions;
        if open == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(open, 0);
}
