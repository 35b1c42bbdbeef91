// Sync verb tests against the in-memory runtime

mod common;

use bytes::Bytes;
use common::{SHARED_VOLUME, Testnet, garbage_bytes, router_info};
use testnet_core::{IdentityHash, IdentityRecord, SHARED_NETDB_DIR, ShardScheme, filename_for};
use testnet_sandbox::RuntimeOp;
use testnet_sync::SyncVerb;

#[tokio::test]
async fn test_extract_identity_record() {
    let mut net = Testnet::new();
    let (node, expected) = net.add_node("router1", 1).await;

    let record = net.sync.extract_node_record(&node).await.unwrap();
    assert_eq!(record.raw_bytes(), expected.raw_bytes());
    assert_eq!(record.encoded_hash(), expected.encoded_hash());
    assert_eq!(record.encoded_hash().len(), 44);
    assert_eq!(
        record.filename(),
        format!("routerInfo-{}.dat", record.encoded_hash())
    );
}

#[tokio::test]
async fn test_extract_missing_record_is_unavailable() {
    let mut net = Testnet::new();
    let node = net.add_bare_node("router1").await;

    let err = net.sync.extract_node_record(&node).await.unwrap_err();
    assert_eq!(err.code(), "record_unavailable");
}

#[tokio::test]
async fn test_extract_directory_is_unavailable() {
    let mut net = Testnet::new();
    let (node, _) = net.add_node("router1", 1).await;

    let err = net
        .sync
        .extract_identity_record(&node, "/root/.i2pd/netDb")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "record_unavailable");
}

#[tokio::test]
async fn test_extract_symlink_is_unavailable() {
    let mut net = Testnet::new();
    let node = net.add_bare_node("router1").await;
    net.backend
        .write_symlink(&node, "/root/.i2pd/router.info", "/etc/hostname")
        .await
        .unwrap();

    let err = net.sync.extract_node_record(&node).await.unwrap_err();
    assert_eq!(err.code(), "record_unavailable", "{err}");
    assert!(err.to_string().contains("not a regular file"), "{err}");
}

#[tokio::test]
async fn test_extract_garbage_is_malformed() {
    let mut net = Testnet::new();
    let node = net.add_bare_node("router1").await;
    net.backend
        .write_file(&node, "/root/.i2pd/router.info", garbage_bytes(100))
        .await
        .unwrap();

    let err = net.sync.extract_node_record(&node).await.unwrap_err();
    assert_eq!(err.code(), "record_malformed");
}

#[tokio::test]
async fn test_publish_lands_in_shard() {
    let mut net = Testnet::new();
    let (node, record) = net.add_node("router1", 1).await;

    let published = net.sync.publish_record(&node, SHARED_VOLUME).await.unwrap();

    let first = &record.encoded_hash()[..1];
    assert_eq!(published.shard.as_str(), format!("r{first}"));
    assert_eq!(
        published.path,
        format!("netDb/r{first}/{}", record.filename())
    );
    let files = net.backend.volume_files(SHARED_VOLUME).await;
    assert_eq!(files.len(), 1);
    assert_eq!(files.get(&published.path), Some(record.raw_bytes()));
    assert!(net.live_helpers().await.is_empty());
}

#[tokio::test]
async fn test_publish_is_idempotent() {
    let mut net = Testnet::new();
    let (node, record) = net.add_node("router1", 1).await;

    let first = net.sync.publish_record(&node, SHARED_VOLUME).await.unwrap();
    let second = net.sync.publish_record(&node, SHARED_VOLUME).await.unwrap();

    assert_eq!(first, second);
    let files = net.backend.volume_files(SHARED_VOLUME).await;
    assert_eq!(files.len(), 1);
    assert_eq!(files.get(&first.path), Some(record.raw_bytes()));
    assert_eq!(net.backend.created_names().await.len(), 2);
    assert!(net.live_helpers().await.is_empty());
}

#[tokio::test]
async fn test_publish_with_prefix_scheme() {
    let mut net = Testnet::with_scheme(ShardScheme::Prefix);
    let (node, record) = net.add_node("router1", 2).await;

    let published = net.sync.publish_record(&node, SHARED_VOLUME).await.unwrap();
    assert_eq!(published.shard.as_str(), &record.encoded_hash()[..2]);
    assert!(
        net.shared_files()
            .await
            .contains(&format!("netDb/{}/{}", &record.encoded_hash()[..2], record.filename()))
    );
}

#[tokio::test]
async fn test_publish_without_record_creates_no_helper() {
    let mut net = Testnet::new();
    let node = net.add_bare_node("router1").await;

    let err = net.sync.publish_record(&node, SHARED_VOLUME).await.unwrap_err();
    assert_eq!(err.code(), "record_unavailable");
    assert!(net.backend.created_names().await.is_empty());
    assert!(net.shared_files().await.is_empty());
}

#[tokio::test]
async fn test_push_merges_with_shared_store() {
    let mut net = Testnet::new();
    let (node, _) = net.add_node("router1", 1).await;
    net.backend
        .write_volume_file(SHARED_VOLUME, "netDb/rZ/routerInfo-existing.dat", Bytes::from_static(b"keep"))
        .await
        .unwrap();
    net.backend
        .write_volume_file(SHARED_VOLUME, "netDb/rA/routerInfo-same.dat", Bytes::from_static(b"stale"))
        .await
        .unwrap();
    net.backend
        .write_file(&node, "/root/.i2pd/netDb/rA/routerInfo-same.dat", Bytes::from_static(b"fresh"))
        .await
        .unwrap();
    net.backend
        .write_file(&node, "/root/.i2pd/netDb/rB/routerInfo-new.dat", Bytes::from_static(b"new"))
        .await
        .unwrap();

    let copied = net.sync.push_node_db_to_shared(&node, SHARED_VOLUME).await.unwrap();
    assert_eq!(copied, 2);

    let files = net.backend.volume_files(SHARED_VOLUME).await;
    assert_eq!(
        files.get("netDb/rZ/routerInfo-existing.dat"),
        Some(&Bytes::from_static(b"keep"))
    );
    assert_eq!(
        files.get("netDb/rA/routerInfo-same.dat"),
        Some(&Bytes::from_static(b"fresh"))
    );
    assert_eq!(
        files.get("netDb/rB/routerInfo-new.dat"),
        Some(&Bytes::from_static(b"new"))
    );
    assert!(net.live_helpers().await.is_empty());
}

#[tokio::test]
async fn test_pull_from_empty_store_preserves_local_files() {
    let mut net = Testnet::new();
    let (node, _) = net.add_node("router1", 1).await;
    net.backend
        .write_file(&node, "/root/.i2pd/netDb/rQ/routerInfo-local.dat", Bytes::from_static(b"local"))
        .await
        .unwrap();

    let copied = net.sync.pull_shared_to_node_db(&node, SHARED_VOLUME).await.unwrap();

    assert_eq!(copied, 0);
    assert_eq!(
        net.node_netdb_files(&node).await,
        vec!["rQ/routerInfo-local.dat"]
    );
    assert!(net.live_helpers().await.is_empty());
}

#[tokio::test]
async fn test_pull_is_additive() {
    let mut net = Testnet::new();
    let (node, _) = net.add_node("router1", 1).await;
    net.backend
        .write_file(&node, "/root/.i2pd/netDb/rQ/routerInfo-local.dat", Bytes::from_static(b"local"))
        .await
        .unwrap();
    net.backend
        .write_volume_file(SHARED_VOLUME, "netDb/rA/routerInfo-a.dat", Bytes::from_static(b"a"))
        .await
        .unwrap();
    net.backend
        .write_volume_file(SHARED_VOLUME, "netDb/rB/routerInfo-b.dat", Bytes::from_static(b"b"))
        .await
        .unwrap();

    let copied = net.sync.pull_shared_to_node_db(&node, SHARED_VOLUME).await.unwrap();

    assert_eq!(copied, 2);
    assert_eq!(
        net.node_netdb_files(&node).await,
        vec![
            "rA/routerInfo-a.dat",
            "rB/routerInfo-b.dat",
            "rQ/routerInfo-local.dat"
        ]
    );
    assert_eq!(
        net.backend
            .read_file(&node, "/root/.i2pd/netDb/rA/routerInfo-a.dat")
            .await,
        Some(Bytes::from_static(b"a"))
    );
}

#[tokio::test]
async fn test_pull_creates_missing_netdb() {
    let mut net = Testnet::new();
    let node = net.backend.add_container("router1", true, vec![]).await;
    net.registry.register(node.clone());
    net.backend
        .write_volume_file(SHARED_VOLUME, "netDb/rA/routerInfo-a.dat", Bytes::from_static(b"a"))
        .await
        .unwrap();

    net.sync.pull_shared_to_node_db(&node, SHARED_VOLUME).await.unwrap();
    assert_eq!(net.node_netdb_files(&node).await, vec!["rA/routerInfo-a.dat"]);
}

#[tokio::test]
async fn test_publish_push_pull_propagates_records() {
    let mut net = Testnet::new();
    let (a, record_a) = net.add_node("router1", 1).await;
    let (b, record_b) = net.add_node("router2", 2).await;

    net.sync.publish_record(&a, SHARED_VOLUME).await.unwrap();
    net.sync.publish_record(&b, SHARED_VOLUME).await.unwrap();
    net.sync.pull_shared_to_node_db(&a, SHARED_VOLUME).await.unwrap();
    net.sync.pull_shared_to_node_db(&b, SHARED_VOLUME).await.unwrap();

    for node in [&a, &b] {
        let files = net.node_netdb_files(node).await;
        for record in [&record_a, &record_b] {
            let shard = record.shard(ShardScheme::Lettered).unwrap();
            assert!(
                files.contains(&format!("{shard}/{}", record.filename())),
                "{node} is missing {}",
                record.filename()
            );
        }
    }
    assert!(net.live_helpers().await.is_empty());
}

#[test]
fn test_sequential_hash_addressing() {
    let bytes: [u8; 32] = std::array::from_fn(|i| i as u8);
    let hash = IdentityHash::from_bytes(bytes);
    let encoded = hash.to_base64();

    assert_eq!(encoded, "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=");
    let filename = filename_for(&hash);
    assert_eq!(
        filename,
        "routerInfo-AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=.dat"
    );
    let shard = ShardScheme::Lettered.shard_for(&encoded).unwrap();
    assert_eq!(
        format!("{SHARED_NETDB_DIR}/{shard}/{filename}"),
        "netDb/rA/routerInfo-AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=.dat"
    );
    assert_eq!(ShardScheme::Prefix.shard_for(&encoded).unwrap().as_str(), "AA");
}

#[tokio::test]
async fn test_helper_removed_when_transfer_step_fails() {
    // Every helper-side step each verb performs.
    let cases = [
        (SyncVerb::Publish, RuntimeOp::Exec),
        (SyncVerb::Publish, RuntimeOp::CopyInto),
        (SyncVerb::Push, RuntimeOp::Exec),
        (SyncVerb::Push, RuntimeOp::CopyInto),
        (SyncVerb::Pull, RuntimeOp::Exec),
        (SyncVerb::Pull, RuntimeOp::CopyFrom),
    ];
    for (verb, op) in cases {
        let mut net = Testnet::new();
        let (node, _) = net.add_node("router1", 1).await;
        net.backend.fail_on_matching(op, "netdb-helper").await;

        let err = net
            .sync
            .run_verb(verb, &node, SHARED_VOLUME)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "transfer_failed", "{verb} {op:?}");

        let created = net.backend.created_names().await;
        assert_eq!(created.len(), 1, "{verb} {op:?}");
        assert_eq!(
            net.backend.removal_attempts(&created[0]).await,
            1,
            "{verb} {op:?}"
        );
        assert!(net.live_helpers().await.is_empty(), "{verb} {op:?}");
    }
}

#[tokio::test]
async fn test_node_side_failures_are_classified() {
    // Steps run directly against the router: push's copy-out before any
    // helper exists, pull's mkdir and copy-in after the helper is gone.
    let cases = [
        (SyncVerb::Push, RuntimeOp::CopyFrom, 0),
        (SyncVerb::Pull, RuntimeOp::Exec, 1),
        (SyncVerb::Pull, RuntimeOp::CopyInto, 1),
    ];
    for (verb, op, helpers) in cases {
        let mut net = Testnet::new();
        let (node, _) = net.add_node("router1", 1).await;
        net.backend
            .write_volume_file(SHARED_VOLUME, "netDb/rA/routerInfo-A.dat", Bytes::from_static(b"a"))
            .await
            .unwrap();
        net.backend.fail_on_sandbox(op, "router1").await;

        let err = net
            .sync
            .run_verb(verb, &node, SHARED_VOLUME)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "transfer_failed", "{verb} {op:?}: {err}");

        let created = net.backend.created_names().await;
        assert_eq!(created.len(), helpers, "{verb} {op:?}");
        for name in &created {
            assert_eq!(net.backend.removal_attempts(name).await, 1, "{verb} {op:?}");
        }
        assert!(net.live_helpers().await.is_empty(), "{verb} {op:?}");
        assert!(net.node_netdb_files(&node).await.is_empty(), "{verb} {op:?}");
    }
}

#[tokio::test]
async fn test_helper_lifecycle_failures_are_classified() {
    let mut net = Testnet::new();
    let (node, _) = net.add_node("router1", 1).await;

    net.backend.fail_once(RuntimeOp::Create).await;
    let err = net.sync.publish_record(&node, SHARED_VOLUME).await.unwrap_err();
    assert_eq!(err.code(), "sandbox_create_failed");

    net.backend.fail_once(RuntimeOp::Start).await;
    let err = net.sync.publish_record(&node, SHARED_VOLUME).await.unwrap_err();
    assert_eq!(err.code(), "sandbox_start_failed");

    assert!(net.live_helpers().await.is_empty());
    assert!(net.shared_files().await.is_empty());
}

#[tokio::test]
async fn test_removal_failure_does_not_fail_publish() {
    let mut net = Testnet::new();
    let (node, record) = net.add_node("router1", 1).await;
    net.backend
        .fail_on_matching(RuntimeOp::Remove, "netdb-helper")
        .await;

    let published = net.sync.publish_record(&node, SHARED_VOLUME).await.unwrap();
    assert_eq!(published.filename, record.filename());
    assert_eq!(net.live_helpers().await.len(), 1);
}

#[tokio::test]
async fn test_seed_volume_file() {
    let net = Testnet::new();

    net.sync
        .seed_volume_file(SHARED_VOLUME, "config/router1", "i2pd.conf", Bytes::from_static(b"[ntcp2]\n"))
        .await
        .unwrap();
    net.sync
        .seed_volume_file(SHARED_VOLUME, "", "README", Bytes::from_static(b"shared"))
        .await
        .unwrap();

    let files = net.backend.volume_files(SHARED_VOLUME).await;
    assert_eq!(
        files.get("config/router1/i2pd.conf"),
        Some(&Bytes::from_static(b"[ntcp2]\n"))
    );
    assert_eq!(files.get("README"), Some(&Bytes::from_static(b"shared")));

    let err = net
        .sync
        .seed_volume_file(SHARED_VOLUME, "../escape", "x", Bytes::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "archive_corrupt");
    assert!(net.live_helpers().await.is_empty());
}

#[test]
fn test_distinct_nodes_distinct_records() {
    let a = IdentityRecord::from_bytes(router_info(1)).unwrap();
    let b = IdentityRecord::from_bytes(router_info(2)).unwrap();
    assert_ne!(a.encoded_hash(), b.encoded_hash());
}
