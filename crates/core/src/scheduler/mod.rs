//! Container scheduler abstraction and the per-vehicle task launcher.
//!
//! Each simulated vehicle runs as one container task. `TaskLauncher` starts
//! and stops those tasks through a `ContainerScheduler` backend and waits for
//! them to settle by polling task status.

mod ecs;
mod launcher;

pub use ecs::EcsScheduler;
pub use launcher::{LaunchOptions, TaskLauncher, WaitOptions};

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::vehicle::LaunchRecord;

/// Reason attached to every stop request.
pub const STOP_REASON: &str = "stop the task";

/// Errors reported by a scheduler backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("scheduler error: {0}")]
    Service(String),
}

/// Errors from starting a fleet of tasks.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Fewer tasks were created than vehicles requested. No wait was attempted.
    #[error("only {} of {requested} tasks were created", .created.len())]
    Incomplete {
        created: LaunchRecord,
        requested: usize,
    },

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Lifecycle state of a container task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Provisioning,
    Pending,
    Activating,
    Running,
    Deactivating,
    Stopping,
    Deprovisioning,
    Stopped,
    Unknown(String),
}

impl TaskState {
    pub fn from_status(status: &str) -> Self {
        match status {
            "PROVISIONING" => TaskState::Provisioning,
            "PENDING" => TaskState::Pending,
            "ACTIVATING" => TaskState::Activating,
            "RUNNING" => TaskState::Running,
            "DEACTIVATING" => TaskState::Deactivating,
            "STOPPING" => TaskState::Stopping,
            "DEPROVISIONING" => TaskState::Deprovisioning,
            "STOPPED" => TaskState::Stopped,
            other => TaskState::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TaskState::Provisioning => "PROVISIONING",
            TaskState::Pending => "PENDING",
            TaskState::Activating => "ACTIVATING",
            TaskState::Running => "RUNNING",
            TaskState::Deactivating => "DEACTIVATING",
            TaskState::Stopping => "STOPPING",
            TaskState::Deprovisioning => "DEPROVISIONING",
            TaskState::Stopped => "STOPPED",
            TaskState::Unknown(status) => status,
        }
    }
}

/// Last observed status of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatus {
    pub handle: String,
    pub state: TaskState,
}

/// Where a task is placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    CapacityProvider(String),
    LaunchType(String),
}

/// One task run for one vehicle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTaskRequest {
    pub task_definition: String,
    pub placement: Placement,
    /// Container environment variables.
    pub environment: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
}

impl RunTaskRequest {
    pub fn env(&self, name: &str) -> Option<&str> {
        self.environment.get(name).map(String::as_str)
    }
}

/// Task id of a handle: the part after the last `/` of a task ARN, or the
/// handle itself when it already is an id.
pub fn task_id(handle: &str) -> &str {
    handle.rsplit('/').next().unwrap_or(handle)
}

/// Trait for container scheduler backends.
#[async_trait]
pub trait ContainerScheduler: Send + Sync {
    /// Run one task; returns the handles of the tasks actually started.
    async fn run_task(&self, request: &RunTaskRequest) -> Result<Vec<String>, SchedulerError>;

    /// Status of up to 100 tasks, by handle or task id.
    async fn describe_tasks(&self, handles: &[String]) -> Result<Vec<TaskStatus>, SchedulerError>;

    async fn stop_task(&self, handle: &str, reason: &str) -> Result<(), SchedulerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_state_round_trip() {
        for status in ["PENDING", "RUNNING", "STOPPING", "STOPPED"] {
            assert_eq!(TaskState::from_status(status).as_str(), status);
        }
        assert_eq!(
            TaskState::from_status("WEIRD"),
            TaskState::Unknown("WEIRD".to_string())
        );
    }

    #[test]
    fn test_task_id_accepts_arns_and_ids() {
        assert_eq!(
            task_id("arn:aws:ecs:us-east-1:123456789012:task/vehicle-simulator-arm64/abc"),
            "abc"
        );
        assert_eq!(task_id("abc"), "abc");
    }
}
