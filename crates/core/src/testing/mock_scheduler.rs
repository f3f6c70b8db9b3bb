//! Mock container scheduler for testing.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::scheduler::{task_id, ContainerScheduler, RunTaskRequest, SchedulerError, TaskState, TaskStatus};

#[derive(Debug, Clone)]
struct MockTask {
    handle: String,
    state: TaskState,
}

/// Mock implementation of the ContainerScheduler trait.
///
/// New tasks start `RUNNING` unless their vehicle was marked to stay
/// pending, and stop immediately unless told to ignore the stop.
///
/// # Example
///
/// ```rust,ignore
/// let scheduler = MockScheduler::new();
/// scheduler.keep_pending_for("v1").await;
///
/// // ... launch v0, v1 ...
///
/// assert_eq!(scheduler.run_requests().await.len(), 2);
/// ```
#[derive(Debug)]
pub struct MockScheduler {
    /// Tasks by task id.
    tasks: Arc<RwLock<BTreeMap<String, MockTask>>>,
    run_requests: Arc<RwLock<Vec<RunTaskRequest>>>,
    stop_requests: Arc<RwLock<Vec<(String, String)>>>,
    describe_calls: Arc<RwLock<usize>>,
    /// Vehicle ids whose run request starts no task.
    no_task_for: Arc<RwLock<BTreeSet<String>>>,
    /// Vehicle ids whose task never leaves PENDING.
    pending_for: Arc<RwLock<BTreeSet<String>>>,
    /// Task ids that keep running after a stop request.
    ignore_stop_for: Arc<RwLock<BTreeSet<String>>>,
    task_counter: Arc<RwLock<u32>>,
}

impl Default for MockScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl MockScheduler {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(RwLock::new(BTreeMap::new())),
            run_requests: Arc::new(RwLock::new(Vec::new())),
            stop_requests: Arc::new(RwLock::new(Vec::new())),
            describe_calls: Arc::new(RwLock::new(0)),
            no_task_for: Arc::new(RwLock::new(BTreeSet::new())),
            pending_for: Arc::new(RwLock::new(BTreeSet::new())),
            ignore_stop_for: Arc::new(RwLock::new(BTreeSet::new())),
            task_counter: Arc::new(RwLock::new(0)),
        }
    }

    pub async fn run_requests(&self) -> Vec<RunTaskRequest> {
        self.run_requests.read().await.clone()
    }

    /// Stop requests as (handle, reason).
    pub async fn stop_requests(&self) -> Vec<(String, String)> {
        self.stop_requests.read().await.clone()
    }

    pub async fn describe_calls(&self) -> usize {
        *self.describe_calls.read().await
    }

    pub async fn return_no_task_for(&self, vehicle_id: &str) {
        self.no_task_for.write().await.insert(vehicle_id.to_string());
    }

    pub async fn keep_pending_for(&self, vehicle_id: &str) {
        self.pending_for.write().await.insert(vehicle_id.to_string());
    }

    pub async fn ignore_stop_for(&self, id: &str) {
        self.ignore_stop_for.write().await.insert(id.to_string());
    }

    /// Registers an existing task whose handle is its id.
    pub async fn add_task(&self, id: &str, state: TaskState) {
        self.tasks.write().await.insert(
            id.to_string(),
            MockTask {
                handle: id.to_string(),
                state,
            },
        );
    }

    pub async fn state_of(&self, handle: &str) -> Option<TaskState> {
        self.tasks
            .read()
            .await
            .get(task_id(handle))
            .map(|task| task.state.clone())
    }
}

#[async_trait]
impl ContainerScheduler for MockScheduler {
    async fn run_task(&self, request: &RunTaskRequest) -> Result<Vec<String>, SchedulerError> {
        self.run_requests.write().await.push(request.clone());
        let vehicle_id = request.env("VEHICLE_ID").unwrap_or_default().to_string();
        if self.no_task_for.read().await.contains(&vehicle_id) {
            return Ok(Vec::new());
        }

        let id = {
            let mut counter = self.task_counter.write().await;
            *counter += 1;
            format!("{:032x}", *counter)
        };
        let handle = format!(
            "arn:aws:ecs:us-east-1:123456789012:task/vehicle-simulator-arm64/{}",
            id
        );
        let state = if self.pending_for.read().await.contains(&vehicle_id) {
            TaskState::Pending
        } else {
            TaskState::Running
        };
        self.tasks.write().await.insert(
            id,
            MockTask {
                handle: handle.clone(),
                state,
            },
        );
        Ok(vec![handle])
    }

    async fn describe_tasks(&self, handles: &[String]) -> Result<Vec<TaskStatus>, SchedulerError> {
        *self.describe_calls.write().await += 1;
        let tasks = self.tasks.read().await;
        Ok(handles
            .iter()
            .filter_map(|handle| tasks.get(task_id(handle)))
            .map(|task| TaskStatus {
                handle: task.handle.clone(),
                state: task.state.clone(),
            })
            .collect())
    }

    async fn stop_task(&self, handle: &str, reason: &str) -> Result<(), SchedulerError> {
        self.stop_requests
            .write()
            .await
            .push((handle.to_string(), reason.to_string()));
        let id = task_id(handle);
        let ignored = self.ignore_stop_for.read().await.contains(id);
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| SchedulerError::InvalidRequest(format!("unknown task {}", handle)))?;
        task.state = if ignored {
            TaskState::Deactivating
        } else {
            TaskState::Stopped
        };
        Ok(())
    }
}
