//! Fleet lifecycle integration tests.
//!
//! These drive the orchestrator through pre-launch, launch, stop and clean
//! against the in-memory doubles.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use fleetsim_core::{
    scheduler::{Placement, TaskState},
    testing::{
        fixtures, MemoryObjectStore, MockCertificateAuthority, MockIdentityRegistry,
        MockScheduler, MockVehicleModelRegistry, RegistryCall,
    },
    CleanRequest, FleetOrchestrator, FleetServices, LaunchError, LaunchOptions, ObjectStore,
    OrchestratorError, PreLaunchRequest, VehicleDescriptor, VehicleModel, VehicleModelRegistry,
    WaitOptions,
};

/// Test helper holding the doubles behind one orchestrator.
struct TestHarness {
    registry: Arc<MockIdentityRegistry>,
    authority: Arc<MockCertificateAuthority>,
    scheduler: Arc<MockScheduler>,
    store: Arc<MemoryObjectStore>,
    models: Arc<MockVehicleModelRegistry>,
}

impl TestHarness {
    fn new() -> Self {
        Self {
            registry: Arc::new(MockIdentityRegistry::new()),
            authority: Arc::new(MockCertificateAuthority::new()),
            scheduler: Arc::new(MockScheduler::new()),
            store: Arc::new(MemoryObjectStore::new()),
            models: Arc::new(MockVehicleModelRegistry::new()),
        }
    }

    fn orchestrator(&self) -> FleetOrchestrator {
        let services = FleetServices {
            registry: self.registry.clone(),
            authority: self.authority.clone(),
            scheduler: self.scheduler.clone(),
            store: self.store.clone(),
            vehicle_models: Some(self.models.clone() as Arc<dyn VehicleModelRegistry>),
        };
        FleetOrchestrator::new(services, &fixtures::config())
            .with_key_generator(fixtures::fake_key_and_csr)
    }
}

fn launch_options() -> LaunchOptions {
    LaunchOptions {
        task_definition: "fwe-arm64".to_string(),
        placement: Placement::CapacityProvider("ubuntu-arm64-capacity-provider".to_string()),
        tags: BTreeMap::new(),
        wait: wait_options(),
    }
}

fn wait_options() -> WaitOptions {
    WaitOptions {
        timeout: Duration::from_secs(300),
        retries: 100,
        poll_interval: Duration::from_secs(6),
    }
}

fn request(vehicles: Vec<VehicleDescriptor>) -> PreLaunchRequest {
    PreLaunchRequest {
        configs: fixtures::configs_for(&vehicles),
        vehicles,
        policy_name: Some("p".to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_pre_launch_provisions_every_vehicle() {
    let harness = TestHarness::new();
    let orchestrator = harness.orchestrator();
    let vehicles = fixtures::registry_vehicles("bucket", 25);

    let outcome = orchestrator.pre_launch(&request(vehicles)).await.unwrap();

    assert_eq!(outcome.succeeded.len(), 25);
    assert!(outcome.failed.is_empty());
    for i in 0..25 {
        assert!(harness
            .store
            .get("bucket", &format!("v{}/cert.crt", i))
            .await
            .is_some());
        assert!(harness
            .store
            .get("bucket", &format!("v{}/pri.key", i))
            .await
            .is_some());
    }
    assert!(harness.registry.has_policy("p").await);
}

#[tokio::test]
async fn test_things_are_created_in_batches_of_ten() {
    let harness = TestHarness::new();
    let orchestrator = harness.orchestrator();
    let vehicles = fixtures::registry_vehicles("bucket", 25);

    orchestrator.pre_launch(&request(vehicles)).await.unwrap();

    // Batches run in order, so every thing of a batch is created before any
    // thing of the next one.
    let created: Vec<usize> = harness
        .registry
        .calls()
        .await
        .into_iter()
        .filter_map(|call| match call {
            RegistryCall::CreateThing(name) => name.trim_start_matches('v').parse().ok(),
            _ => None,
        })
        .collect();
    assert_eq!(created.len(), 25);
    let batch_of = |i: usize| i / 10;
    assert!(created
        .windows(2)
        .all(|pair| batch_of(pair[0]) <= batch_of(pair[1])));
}

#[tokio::test]
async fn test_pre_launch_twice_reuses_policy() {
    let harness = TestHarness::new();
    let orchestrator = harness.orchestrator();
    let vehicles = fixtures::registry_vehicles("bucket", 3);

    orchestrator
        .pre_launch(&request(vehicles.clone()))
        .await
        .unwrap();
    let outcome = orchestrator.pre_launch(&request(vehicles)).await.unwrap();

    assert_eq!(outcome.succeeded.len(), 3);
    let calls = harness.registry.calls().await;
    assert!(!calls
        .iter()
        .any(|call| matches!(call, RegistryCall::DeletePolicy(_))));
}

#[tokio::test]
async fn test_pre_launch_writes_composed_config() {
    let harness = TestHarness::new();
    let orchestrator = harness.orchestrator();
    let vehicles = fixtures::registry_vehicles("bucket", 1);

    orchestrator.pre_launch(&request(vehicles)).await.unwrap();

    let config: Value = serde_json::from_str(
        &harness
            .store
            .get_string("bucket", "v0/config.json")
            .await
            .unwrap(),
    )
    .unwrap();
    let static_config = &config["staticConfig"];
    assert_eq!(
        static_config["mqttConnection"]["endpointUrl"],
        "mock-ats.iot.us-east-1.amazonaws.com"
    );
    assert_eq!(static_config["mqttConnection"]["clientId"], "v0");
    assert_eq!(
        static_config["credentialsProvider"]["endpointUrl"],
        "mock.credentials.iot.us-east-1.amazonaws.com"
    );
    assert_eq!(
        static_config["internalParameters"]["systemWideLogLevel"],
        "Info"
    );
}

#[tokio::test]
async fn test_pre_launch_mixes_registry_and_private_ca_paths() {
    let harness = TestHarness::new();
    let orchestrator = harness.orchestrator();
    let mut vehicles = fixtures::registry_vehicles("things", 2);
    vehicles.extend(
        fixtures::private_ca_vehicles("private", 2)
            .into_iter()
            .map(|mut vehicle| {
                vehicle.vehicle_id = format!("ca-{}", vehicle.vehicle_id);
                vehicle.storage.key = vehicle.vehicle_id.clone();
                vehicle
            }),
    );

    let outcome = orchestrator.pre_launch(&request(vehicles)).await.unwrap();

    assert_eq!(outcome.succeeded.len(), 4);
    assert_eq!(harness.authority.issued().await.len(), 2);
    assert!(harness.store.get("things", "v0/cert.crt").await.is_some());
    assert!(harness.store.get("private", "ca-v1/cert.crt").await.is_some());
    assert!(harness.store.get("private", "ca-v1/config.json").await.is_some());
    // Only registry-path vehicles get things.
    assert!(harness.registry.has_thing("v1").await);
    assert!(!harness.registry.has_thing("ca-v0").await);
}

#[tokio::test]
async fn test_config_upload_failure_fails_vehicle() {
    let harness = TestHarness::new();
    harness.store.fail_put("v1/config.json").await;
    let orchestrator = harness.orchestrator();
    let vehicles = fixtures::registry_vehicles("bucket", 3);

    let outcome = orchestrator.pre_launch(&request(vehicles)).await.unwrap();

    assert_eq!(outcome.failed, ["v1".to_string()].into_iter().collect());
    assert_eq!(outcome.succeeded.len(), 2);
}

#[tokio::test]
async fn test_unparsable_config_is_fatal() {
    let harness = TestHarness::new();
    let orchestrator = harness.orchestrator();
    let vehicles = fixtures::registry_vehicles("bucket", 2);
    let mut req = request(vehicles);
    req.configs.insert("v1".to_string(), "[]".to_string());

    let result = orchestrator.pre_launch(&req).await;

    assert!(matches!(result, Err(OrchestratorError::Compose(_))));
}

#[tokio::test]
async fn test_vehicles_registered_with_model() {
    let harness = TestHarness::new();
    let orchestrator = harness.orchestrator();
    let vehicles = fixtures::registry_vehicles("bucket", 4);
    let mut req = request(vehicles);
    req.vehicle_model = Some(VehicleModel {
        model_manifest_arn: "arn:model".to_string(),
        decoder_manifest_arn: "arn:decoder".to_string(),
    });

    orchestrator.pre_launch(&req).await.unwrap();

    let created = harness.models.created().await;
    assert_eq!(created.len(), 4);
    assert!(created
        .iter()
        .all(|(_, model)| model.decoder_manifest_arn == "arn:decoder"));
}

#[tokio::test(start_paused = true)]
async fn test_launch_reports_running_vehicles() {
    let harness = TestHarness::new();
    harness.scheduler.keep_pending_for("v2").await;
    let orchestrator = harness.orchestrator();
    let vehicles = fixtures::registry_vehicles("bucket", 4);

    let statuses = orchestrator
        .launch_vehicles(&vehicles, &launch_options())
        .await
        .unwrap();

    let launched: Vec<&str> = statuses.iter().map(|s| s.vehicle_id.as_str()).collect();
    assert_eq!(launched, vec!["v0", "v1", "v3"]);
}

#[tokio::test(start_paused = true)]
async fn test_launch_with_missing_task_fails_without_waiting() {
    let harness = TestHarness::new();
    harness.scheduler.return_no_task_for("v0").await;
    let orchestrator = harness.orchestrator();
    let vehicles = fixtures::registry_vehicles("bucket", 3);

    let result = orchestrator
        .launch_vehicles(&vehicles, &launch_options())
        .await;

    match result {
        Err(OrchestratorError::Launch(LaunchError::Incomplete { created, requested })) => {
            assert_eq!(created.len(), 2);
            assert_eq!(requested, 3);
        }
        other => panic!("expected incomplete launch, got {:?}", other),
    }
    assert_eq!(harness.scheduler.describe_calls().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_partitions_stopped_and_pending() {
    let harness = TestHarness::new();
    harness.scheduler.add_task("t1", TaskState::Running).await;
    harness.scheduler.add_task("t2", TaskState::Running).await;
    harness.scheduler.ignore_stop_for("t2").await;
    let orchestrator = harness.orchestrator();

    let outcome = orchestrator
        .stop_vehicles(&["t1".to_string(), "t2".to_string()], &wait_options())
        .await;

    assert_eq!(outcome.stopped, ["t1".to_string()].into_iter().collect());
    assert_eq!(outcome.still_pending, ["t2".to_string()].into_iter().collect());
    assert_eq!(
        harness.scheduler.state_of("t1").await,
        Some(TaskState::Stopped)
    );
}

#[tokio::test(start_paused = true)]
async fn test_full_lifecycle() {
    let harness = TestHarness::new();
    let orchestrator = harness.orchestrator();
    let vehicles = fixtures::registry_vehicles("bucket", 5);

    let outcome = orchestrator
        .pre_launch(&request(vehicles.clone()))
        .await
        .unwrap();
    assert!(outcome.is_complete_success());

    let statuses = orchestrator
        .launch_vehicles(&vehicles, &launch_options())
        .await
        .unwrap();
    assert_eq!(statuses.len(), 5);

    let handles: Vec<String> = statuses.into_iter().map(|s| s.task_arn).collect();
    let stopped = orchestrator.stop_vehicles(&handles, &wait_options()).await;
    assert_eq!(stopped.stopped.len(), 5);
    assert!(stopped.still_pending.is_empty());

    let teardown = orchestrator
        .clean(&CleanRequest {
            vehicles,
            policy_name: Some("p".to_string()),
            delete_policy: true,
            delete_certificates: true,
        })
        .await
        .unwrap();
    assert_eq!(teardown.outcome.succeeded.len(), 5);
    assert!(teardown.orphaned_certificates.is_empty());
    assert!(harness.store.list("bucket", "").await.unwrap().is_empty());
    assert!(!harness.registry.has_policy("p").await);
    assert!(!harness.registry.has_certificate("cert-1").await);
}
