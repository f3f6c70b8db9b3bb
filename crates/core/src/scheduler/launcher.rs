//! Starting and stopping one task per vehicle.

use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{
    task_id, ContainerScheduler, LaunchError, Placement, RunTaskRequest, TaskState, STOP_REASON,
};
use crate::batch::{batches, BATCH_SIZE, WAIT_CHUNK_SIZE};
use crate::config::SchedulerConfig;
use crate::metrics;
use crate::vehicle::{LaunchRecord, StopOutcome, VehicleDescriptor};

/// Bounds on waiting for tasks to settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub timeout: Duration,
    /// Maximum number of status polls per chunk.
    pub retries: u32,
    pub poll_interval: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            retries: 100,
            poll_interval: Duration::from_secs(6),
        }
    }
}

impl From<&SchedulerConfig> for WaitOptions {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            timeout: config.wait_timeout(),
            retries: config.wait_retries,
            poll_interval: config.poll_interval(),
        }
    }
}

/// Options for `TaskLauncher::start`.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub task_definition: String,
    pub placement: Placement,
    /// Added to every task's tags and container environment.
    pub tags: BTreeMap<String, String>,
    pub wait: WaitOptions,
}

impl LaunchOptions {
    /// Task definition, placement and wait bounds from configuration.
    pub fn from_config(config: &SchedulerConfig, tags: BTreeMap<String, String>) -> Self {
        let placement = if config.use_capacity_provider {
            Placement::CapacityProvider(config.capacity_provider_name())
        } else {
            Placement::LaunchType(config.launch_type.clone())
        };
        Self {
            task_definition: config.task_definition_name(),
            placement,
            tags,
            wait: WaitOptions::from(config),
        }
    }
}

/// Runs and stops vehicle tasks on a container scheduler.
#[derive(Clone)]
pub struct TaskLauncher {
    scheduler: Arc<dyn ContainerScheduler>,
    batch_size: usize,
}

impl TaskLauncher {
    pub fn new(scheduler: Arc<dyn ContainerScheduler>) -> Self {
        Self {
            scheduler,
            batch_size: BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Starts one task per vehicle and waits for them to run.
    ///
    /// Returns vehicle id to task handle for exactly the tasks observed
    /// running. Fails with `LaunchError::Incomplete` before any wait if a
    /// vehicle did not get exactly one task.
    pub async fn start(
        &self,
        vehicles: &[VehicleDescriptor],
        options: &LaunchOptions,
    ) -> Result<LaunchRecord, LaunchError> {
        let mut created = LaunchRecord::new();

        for batch in batches(vehicles, self.batch_size) {
            let requests: Vec<RunTaskRequest> = batch
                .iter()
                .map(|vehicle| run_task_request(vehicle, options))
                .collect();
            let results = join_all(
                requests
                    .iter()
                    .map(|request| self.scheduler.run_task(request)),
            )
            .await;

            for (vehicle, result) in batch.iter().zip(results) {
                match result {
                    Ok(mut handles) if handles.len() == 1 => {
                        let handle = handles.remove(0);
                        debug!(vehicle_id = %vehicle.vehicle_id, task = %handle, "Task created");
                        created.insert(vehicle.vehicle_id.clone(), handle);
                    }
                    Ok(handles) => error!(
                        vehicle_id = %vehicle.vehicle_id,
                        tasks = handles.len(),
                        "Expected exactly one task"
                    ),
                    Err(e) => error!(vehicle_id = %vehicle.vehicle_id, "Run task failed: {}", e),
                }
            }
        }

        if created.len() != vehicles.len() {
            error!(
                created = created.len(),
                requested = vehicles.len(),
                "Not all tasks were created"
            );
            return Err(LaunchError::Incomplete {
                created,
                requested: vehicles.len(),
            });
        }

        let handles: Vec<String> = created.values().cloned().collect();
        let mut running = BTreeSet::new();
        for chunk in handles.chunks(WAIT_CHUNK_SIZE) {
            let states = self
                .wait_for_state(chunk, &TaskState::Running, &options.wait)
                .await;
            running.extend(
                chunk
                    .iter()
                    .filter(|handle| states.get(task_id(handle)) == Some(&TaskState::Running))
                    .cloned(),
            );
        }

        let record: LaunchRecord = created
            .into_iter()
            .filter(|(_, handle)| running.contains(handle))
            .collect();
        metrics::TASKS_LAUNCHED
            .with_label_values(&["running"])
            .inc_by(record.len() as u64);
        metrics::TASKS_LAUNCHED
            .with_label_values(&["not_running"])
            .inc_by((vehicles.len() - record.len()) as u64);
        info!(
            running = record.len(),
            requested = vehicles.len(),
            "Vehicle tasks launched"
        );
        Ok(record)
    }

    /// Stops the given tasks and waits for them to stop.
    pub async fn stop(&self, handles: &[String], wait: &WaitOptions) -> StopOutcome {
        let requested: BTreeSet<String> = handles.iter().cloned().collect();
        let stopping: Vec<String> = requested.iter().cloned().collect();

        for batch in batches(&stopping, self.batch_size) {
            let results = join_all(
                batch
                    .iter()
                    .map(|handle| self.scheduler.stop_task(handle, STOP_REASON)),
            )
            .await;
            for (handle, result) in batch.iter().zip(results) {
                if let Err(e) = result {
                    error!(task = %handle, "Stop task failed: {}", e);
                }
            }
        }

        let mut stopped = BTreeSet::new();
        for chunk in stopping.chunks(WAIT_CHUNK_SIZE) {
            let states = self.wait_for_state(chunk, &TaskState::Stopped, wait).await;
            stopped.extend(
                chunk
                    .iter()
                    .filter(|handle| states.get(task_id(handle)) == Some(&TaskState::Stopped))
                    .cloned(),
            );
        }

        let still_pending: BTreeSet<String> = requested.difference(&stopped).cloned().collect();
        metrics::TASKS_STOPPED
            .with_label_values(&["stopped"])
            .inc_by(stopped.len() as u64);
        metrics::TASKS_STOPPED
            .with_label_values(&["pending"])
            .inc_by(still_pending.len() as u64);
        info!(
            stopped = stopped.len(),
            pending = still_pending.len(),
            "Vehicle tasks stopped"
        );
        StopOutcome {
            stopped,
            still_pending,
        }
    }

    /// Polls until every task reaches `target`, the wait is hopeless, or the
    /// retry or time budget runs out. Returns the last observed state by task id.
    async fn wait_for_state(
        &self,
        handles: &[String],
        target: &TaskState,
        wait: &WaitOptions,
    ) -> BTreeMap<String, TaskState> {
        let deadline = Instant::now() + wait.timeout;
        let retries = wait.retries.max(1);
        let mut last_seen: BTreeMap<String, TaskState> = BTreeMap::new();

        for attempt in 1..=retries {
            match self.scheduler.describe_tasks(handles).await {
                Ok(statuses) => {
                    for status in statuses {
                        last_seen.insert(task_id(&status.handle).to_string(), status.state);
                    }
                }
                Err(e) => warn!(attempt, "Describe tasks failed: {}", e),
            }

            let settled = handles
                .iter()
                .all(|handle| last_seen.get(task_id(handle)) == Some(target));
            if settled {
                return last_seen;
            }
            // A stopped task never becomes running.
            if *target == TaskState::Running
                && handles
                    .iter()
                    .any(|handle| last_seen.get(task_id(handle)) == Some(&TaskState::Stopped))
            {
                warn!("Task stopped while waiting for it to run");
                return last_seen;
            }

            if attempt == retries || Instant::now() + wait.poll_interval > deadline {
                break;
            }
            tokio::time::sleep(wait.poll_interval).await;
        }

        warn!(
            target = target.as_str(),
            tasks = handles.len(),
            "Gave up waiting for tasks to settle"
        );
        metrics::WAIT_TIMEOUTS
            .with_label_values(&[target.as_str()])
            .inc();
        last_seen
    }
}

/// Run request for one vehicle: identity and storage in the environment and
/// tags, plus the caller's tags in both.
fn run_task_request(vehicle: &VehicleDescriptor, options: &LaunchOptions) -> RunTaskRequest {
    let mut environment = options.tags.clone();
    environment.insert("VEHICLE_ID".to_string(), vehicle.vehicle_id.clone());
    environment.insert("S3_BUCKET".to_string(), vehicle.storage.bucket.clone());
    environment.insert("S3_KEY".to_string(), vehicle.storage.key.clone());

    let mut tags = options.tags.clone();
    tags.insert("vehicleID".to_string(), vehicle.vehicle_id.clone());
    tags.insert("s3Bucket".to_string(), vehicle.storage.bucket.clone());
    tags.insert("s3Key".to_string(), vehicle.storage.key.clone());

    RunTaskRequest {
        task_definition: options.task_definition.clone(),
        placement: options.placement.clone(),
        environment,
        tags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixtures, MockScheduler};

    fn options() -> LaunchOptions {
        LaunchOptions {
            task_definition: "fwe-arm64".to_string(),
            placement: Placement::CapacityProvider("ubuntu-arm64-capacity-provider".to_string()),
            tags: [("team".to_string(), "sim".to_string())].into(),
            wait: WaitOptions {
                timeout: Duration::from_secs(300),
                retries: 100,
                poll_interval: Duration::from_secs(6),
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_returns_running_tasks() {
        let scheduler = Arc::new(MockScheduler::new());
        let launcher = TaskLauncher::new(scheduler.clone());
        let vehicles = fixtures::registry_vehicles("bucket", 12);

        let record = launcher.start(&vehicles, &options()).await.unwrap();

        assert_eq!(record.len(), 12);
        assert_eq!(scheduler.run_requests().await.len(), 12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_request_carries_vehicle_environment_and_tags() {
        let scheduler = Arc::new(MockScheduler::new());
        let launcher = TaskLauncher::new(scheduler.clone());
        let vehicles = fixtures::registry_vehicles("bucket", 1);

        launcher.start(&vehicles, &options()).await.unwrap();

        let requests = scheduler.run_requests().await;
        let request = &requests[0];
        assert_eq!(request.env("VEHICLE_ID"), Some("v0"));
        assert_eq!(request.env("S3_BUCKET"), Some("bucket"));
        assert_eq!(request.env("S3_KEY"), Some("v0"));
        assert_eq!(request.env("team"), Some("sim"));
        assert_eq!(request.tags["vehicleID"], "v0");
        assert_eq!(request.tags["s3Key"], "v0");
        assert_eq!(request.tags["team"], "sim");
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_task_fails_before_any_wait() {
        let scheduler = Arc::new(MockScheduler::new());
        scheduler.return_no_task_for("v3").await;
        let launcher = TaskLauncher::new(scheduler.clone());
        let vehicles = fixtures::registry_vehicles("bucket", 5);

        let result = launcher.start(&vehicles, &options()).await;

        match result {
            Err(LaunchError::Incomplete { created, requested }) => {
                assert_eq!(requested, 5);
                assert_eq!(created.len(), 4);
                assert!(!created.contains_key("v3"));
            }
            other => panic!("expected Incomplete, got {:?}", other),
        }
        assert_eq!(scheduler.describe_calls().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_that_never_runs_is_excluded() {
        let scheduler = Arc::new(MockScheduler::new());
        scheduler.keep_pending_for("v1").await;
        let launcher = TaskLauncher::new(scheduler.clone());
        let vehicles = fixtures::registry_vehicles("bucket", 3);

        let record = launcher.start(&vehicles, &options()).await.unwrap();

        assert_eq!(record.len(), 2);
        assert!(!record.contains_key("v1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_respects_retry_budget() {
        let scheduler = Arc::new(MockScheduler::new());
        scheduler.keep_pending_for("v0").await;
        let launcher = TaskLauncher::new(scheduler.clone());
        let vehicles = fixtures::registry_vehicles("bucket", 1);
        let mut opts = options();
        opts.wait.retries = 3;

        launcher.start(&vehicles, &opts).await.unwrap();

        assert_eq!(scheduler.describe_calls().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_partitions_handles() {
        let scheduler = Arc::new(MockScheduler::new());
        scheduler.add_task("t1", TaskState::Running).await;
        scheduler.add_task("t2", TaskState::Running).await;
        scheduler.ignore_stop_for("t2").await;
        let launcher = TaskLauncher::new(scheduler.clone());

        let outcome = launcher
            .stop(
                &["t1".to_string(), "t2".to_string()],
                &WaitOptions {
                    timeout: Duration::from_secs(300),
                    retries: 100,
                    poll_interval: Duration::from_secs(6),
                },
            )
            .await;

        assert_eq!(outcome.stopped, ["t1".to_string()].into_iter().collect());
        assert_eq!(outcome.still_pending, ["t2".to_string()].into_iter().collect());
        let stops = scheduler.stop_requests().await;
        assert!(stops.iter().all(|(_, reason)| reason == STOP_REASON));
    }
}
