//! Tests for the sandbox lifecycle coordinator.
//!
//! Drives sandbox start and stop through the driver with a fake kernel
//! host: devices must move into the sandbox namespace one at a time,
//! attachment failures must abort, and stop must reclaim what it can and
//! always evict the workload record.

mod common;

use common::{
    allocation, driver_config, pod_reservation, sandbox, test_driver, FakeClaims, FakeHost,
    FakeRdma, POD_NS, ROOT,
};
use netclaim::{ClaimRef, ResourcePlugin, SandboxHooks};

// =============================================================================
// Sandbox Created
// =============================================================================

#[tokio::test]
async fn test_created_without_record_does_nothing() {
    let host = FakeHost::new();
    host.add_link(ROOT, "eno2", true);
    let driver = test_driver(FakeClaims::new(), host.clone(), FakeRdma::new());

    driver
        .sandbox_created(&sandbox("pod-1", Some(POD_NS)))
        .await
        .expect("no-op");
    assert!(host.log().is_empty());
}

#[tokio::test]
async fn test_created_without_network_namespace_keeps_record() {
    let host = FakeHost::new();
    host.add_link(ROOT, "eno2", true);
    let driver = test_driver(FakeClaims::new(), host.clone(), FakeRdma::new());
    driver
        .store()
        .put_workload("pod-1", allocation(&[("net1", "eno2")], vec![]))
        .unwrap();

    driver
        .sandbox_created(&sandbox("pod-1", None))
        .await
        .expect("host-network sandbox");

    assert!(host.log().is_empty());
    assert!(driver.store().get_workload("pod-1").unwrap().is_some());
}

#[tokio::test]
async fn test_created_attaches_devices_one_at_a_time() {
    let host = FakeHost::new();
    host.add_link(ROOT, "eno2", true);
    host.add_link(ROOT, "eno3", true);
    let driver = test_driver(FakeClaims::new(), host.clone(), FakeRdma::new());
    driver
        .store()
        .put_workload(
            "pod-1",
            allocation(&[("net1", "eno2"), ("net2", "eno3")], vec![]),
        )
        .unwrap();

    driver
        .sandbox_created(&sandbox("pod-1", Some(POD_NS)))
        .await
        .expect("attach");

    // The second device's sequence starts only after the first one is up
    // and re-resolved under its final name.
    let log = host.log();
    let second = log
        .iter()
        .position(|l| l == "link_by_name root eno3")
        .expect("second device attached");
    assert_eq!(log[second - 2], format!("set_up {POD_NS} eno2"));
    assert_eq!(log[second - 1], format!("link_by_name {POD_NS} eno2"));

    assert_eq!(host.names(POD_NS), vec!["eno2".to_string(), "eno3".to_string()]);
    assert!(host.names(ROOT).is_empty());
}

#[tokio::test]
async fn test_created_applies_claim_parameters() {
    let host = FakeHost::new();
    host.add_link(ROOT, "eno2", true);
    let driver = test_driver(FakeClaims::new(), host.clone(), FakeRdma::new());
    let alloc = allocation(
        &[("net1", "eno2")],
        vec![driver_config(
            &["net1"],
            serde_json::json!({
                "name": "net1",
                "address": "192.168.7.4",
                "prefix": 28,
                "mtu": 8950
            }),
        )],
    );
    driver.store().put_workload("pod-1", alloc).unwrap();

    driver
        .sandbox_created(&sandbox("pod-1", Some(POD_NS)))
        .await
        .expect("attach");

    let link = host.link(POD_NS, "net1").expect("renamed device");
    assert_eq!(link.alias.as_deref(), Some("eno2"));
    assert_eq!(link.mtu, 8950);
    assert_eq!(link.addresses, vec![("192.168.7.4".parse().unwrap(), 28)]);
    assert!(link.up);
}

#[tokio::test]
async fn test_created_attaches_devices_outside_config_restriction() {
    let host = FakeHost::new();
    host.add_link(ROOT, "eno2", true);
    host.add_link(ROOT, "eno3", true);
    let driver = test_driver(FakeClaims::new(), host.clone(), FakeRdma::new());
    // A blob restricted to net1 narrows the prepare response, not the set
    // of devices that move: net2's result carries no configuration and
    // still belongs to the sandbox.
    let alloc = allocation(
        &[("net1", "eno2"), ("net2", "eno3")],
        vec![driver_config(&["net1"], serde_json::Value::Null)],
    );
    driver.store().put_workload("pod-1", alloc).unwrap();

    let pod = sandbox("pod-1", Some(POD_NS));
    driver.sandbox_created(&pod).await.expect("attach");
    assert_eq!(host.names(POD_NS), vec!["eno2".to_string(), "eno3".to_string()]);
    assert!(host.names(ROOT).is_empty());

    driver.sandbox_stopped(&pod).await.expect("reclaim");
    assert_eq!(host.names(ROOT), vec!["eno2".to_string(), "eno3".to_string()]);
    assert!(host.names(POD_NS).is_empty());
    assert!(driver.store().get_workload("pod-1").unwrap().is_none());
}

#[tokio::test]
async fn test_created_abort_keeps_earlier_attachments() {
    let host = FakeHost::new();
    host.add_link(ROOT, "eno2", true);
    let second = host.add_link(ROOT, "eno3", true);
    let driver = test_driver(FakeClaims::new(), host.clone(), FakeRdma::new());
    driver
        .store()
        .put_workload(
            "pod-1",
            allocation(&[("net1", "eno2"), ("net2", "eno3")], vec![]),
        )
        .unwrap();

    host.fail(&format!("move_link root temp_{second} -> {POD_NS}"));
    driver
        .sandbox_created(&sandbox("pod-1", Some(POD_NS)))
        .await
        .expect_err("second attach fails");

    // The first device stays attached; the failed one is restored.
    assert_eq!(host.names(POD_NS), vec!["eno2".to_string()]);
    let restored = host.link(ROOT, "eno3").expect("restored in root");
    assert!(restored.up);
    // A failed start does not evict the record; the stop hook will.
    assert!(driver.store().get_workload("pod-1").unwrap().is_some());
}

#[tokio::test]
async fn test_created_abort_skips_remaining_devices() {
    let host = FakeHost::new();
    let first = host.add_link(ROOT, "eno2", true);
    host.add_link(ROOT, "eno3", true);
    let driver = test_driver(FakeClaims::new(), host.clone(), FakeRdma::new());
    driver
        .store()
        .put_workload(
            "pod-1",
            allocation(&[("net1", "eno2"), ("net2", "eno3")], vec![]),
        )
        .unwrap();

    host.fail(&format!("set_name root eno2 -> temp_{first}"));
    driver
        .sandbox_created(&sandbox("pod-1", Some(POD_NS)))
        .await
        .expect_err("first attach fails");

    assert!(
        !host.log().iter().any(|l| l.contains("eno3")),
        "remaining devices must not be touched after an abort"
    );
}

#[tokio::test]
async fn test_created_moves_rdma_companion() {
    let host = FakeHost::new();
    host.add_link(ROOT, "eno2", true);
    let rdma = FakeRdma::new();
    rdma.map("eno2", "mlx5_0");
    let driver = test_driver(FakeClaims::new(), host.clone(), rdma.clone());
    driver
        .store()
        .put_workload("pod-1", allocation(&[("net1", "eno2")], vec![]))
        .unwrap();

    driver
        .sandbox_created(&sandbox("pod-1", Some(POD_NS)))
        .await
        .expect("attach");

    assert_eq!(rdma.moves(), vec![format!("to mlx5_0 {POD_NS}")]);
}

#[tokio::test]
async fn test_created_tolerates_rdma_move_failure() {
    let host = FakeHost::new();
    host.add_link(ROOT, "eno2", true);
    let rdma = FakeRdma::new();
    rdma.map("eno2", "mlx5_0");
    rdma.fail_moves();
    let driver = test_driver(FakeClaims::new(), host.clone(), rdma.clone());
    driver
        .store()
        .put_workload("pod-1", allocation(&[("net1", "eno2")], vec![]))
        .unwrap();

    driver
        .sandbox_created(&sandbox("pod-1", Some(POD_NS)))
        .await
        .expect("netdev attach survives rdma failure");

    assert!(host.link(POD_NS, "eno2").is_some());
    assert_eq!(rdma.moves().len(), 1, "the move was still attempted");
}

// =============================================================================
// Sandbox Stopped
// =============================================================================

#[tokio::test]
async fn test_stopped_reclaims_devices_and_evicts_record() {
    let host = FakeHost::new();
    host.add_link(ROOT, "eno2", true);
    let rdma = FakeRdma::new();
    rdma.map("eno2", "mlx5_0");
    let driver = test_driver(FakeClaims::new(), host.clone(), rdma.clone());
    let alloc = allocation(
        &[("net1", "eno2")],
        vec![driver_config(&["net1"], serde_json::json!({"name": "net1"}))],
    );
    driver.store().put_workload("pod-1", alloc).unwrap();

    let pod = sandbox("pod-1", Some(POD_NS));
    driver.sandbox_created(&pod).await.expect("attach");
    driver.sandbox_stopped(&pod).await.expect("reclaim");

    let link = host.link(ROOT, "eno2").expect("back in root");
    assert!(!link.up, "reclaimed devices come back down");
    assert!(host.names(POD_NS).is_empty());
    assert!(driver.store().get_workload("pod-1").unwrap().is_none());
    assert_eq!(
        rdma.moves(),
        vec![
            format!("to mlx5_0 {POD_NS}"),
            format!("back mlx5_0 {POD_NS}"),
        ]
    );
}

#[tokio::test]
async fn test_stopped_continues_past_release_failure() {
    let host = FakeHost::new();
    host.add_link(ROOT, "eno2", true);
    host.add_link(ROOT, "eno3", true);
    let driver = test_driver(FakeClaims::new(), host.clone(), FakeRdma::new());
    driver
        .store()
        .put_workload(
            "pod-1",
            allocation(&[("net1", "eno2"), ("net2", "eno3")], vec![]),
        )
        .unwrap();

    let pod = sandbox("pod-1", Some(POD_NS));
    driver.sandbox_created(&pod).await.expect("attach");

    host.fail(&format!("set_down {POD_NS} eno2"));
    driver
        .sandbox_stopped(&pod)
        .await
        .expect("stop is best effort");

    // The first device is stranded but the second still came back, and
    // the record is gone either way.
    assert!(host.link(POD_NS, "eno2").is_some());
    assert!(host.link(ROOT, "eno3").is_some());
    assert!(driver.store().get_workload("pod-1").unwrap().is_none());
}

#[tokio::test]
async fn test_stopped_without_namespace_still_evicts_record() {
    let host = FakeHost::new();
    let driver = test_driver(FakeClaims::new(), host.clone(), FakeRdma::new());
    driver
        .store()
        .put_workload("pod-1", allocation(&[("net1", "eno2")], vec![]))
        .unwrap();

    driver
        .sandbox_stopped(&sandbox("pod-1", None))
        .await
        .expect("stop");

    assert!(host.log().is_empty());
    assert!(driver.store().get_workload("pod-1").unwrap().is_none());
}

#[tokio::test]
async fn test_stopped_without_record_does_nothing() {
    let host = FakeHost::new();
    let driver = test_driver(FakeClaims::new(), host.clone(), FakeRdma::new());

    driver
        .sandbox_stopped(&sandbox("pod-1", Some(POD_NS)))
        .await
        .expect("no-op");
    assert!(host.log().is_empty());
}

// =============================================================================
// Full Lifecycle
// =============================================================================

#[tokio::test]
async fn test_prepare_attach_stop_round_trip() {
    let host = FakeHost::new();
    host.add_link(ROOT, "eno2", true);
    let claims = FakeClaims::new();
    claims.insert(netclaim::ResourceClaim {
        uid: "uid-1".to_string(),
        namespace: "default".to_string(),
        name: "gpu-net".to_string(),
        allocation: Some(allocation(&[("net1", "eno2")], vec![])),
        reserved_for: vec![pod_reservation("pod-1", "web-0")],
    });
    let driver = test_driver(claims, host.clone(), FakeRdma::new());
    let reference = ClaimRef::new("uid-1", "default", "gpu-net");

    let results = driver.prepare(std::slice::from_ref(&reference)).await;
    assert!(results["uid-1"].is_ok());

    let pod = sandbox("pod-1", Some(POD_NS));
    driver.sandbox_created(&pod).await.expect("attach");
    assert!(host.link(POD_NS, "eno2").is_some());

    driver.sandbox_stopped(&pod).await.expect("reclaim");
    assert!(host.link(ROOT, "eno2").is_some());
    assert!(driver.store().get_workload("pod-1").unwrap().is_none());
    // The claim-keyed record outlives the sandbox until unprepare.
    assert!(driver.store().get_claim("uid-1").unwrap().is_some());

    let results = driver.unprepare(std::slice::from_ref(&reference)).await;
    assert!(results["uid-1"].is_ok());
    assert!(driver.store().get_claim("uid-1").unwrap().is_none());
}
