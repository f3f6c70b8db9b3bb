//! Amazon ECS backed container scheduler.

use async_trait::async_trait;
use aws_sdk_ecs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_ecs::types::{
    CapacityProviderStrategyItem, ContainerOverride, KeyValuePair, LaunchType, Tag, TaskOverride,
};
use aws_sdk_ecs::Client;
use std::fmt::Debug;
use tracing::warn;

use super::{ContainerScheduler, Placement, RunTaskRequest, SchedulerError, TaskState, TaskStatus};

/// Scheduler over one ECS cluster, overriding one named container per task.
#[derive(Debug, Clone)]
pub struct EcsScheduler {
    client: Client,
    cluster: String,
    container_name: String,
}

impl EcsScheduler {
    pub fn new(client: Client, cluster: impl Into<String>, container_name: impl Into<String>) -> Self {
        Self {
            client,
            cluster: cluster.into(),
            container_name: container_name.into(),
        }
    }
}

fn classify<E, R>(context: &str, err: SdkError<E, R>) -> SchedulerError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: Debug,
{
    let message = format!("{}: {}", context, DisplayErrorContext(&err));
    match err.code() {
        Some("InvalidParameterException") | Some("ClusterNotFoundException") => {
            SchedulerError::InvalidRequest(message)
        }
        _ => SchedulerError::Service(message),
    }
}

#[async_trait]
impl ContainerScheduler for EcsScheduler {
    async fn run_task(&self, request: &RunTaskRequest) -> Result<Vec<String>, SchedulerError> {
        let environment: Vec<KeyValuePair> = request
            .environment
            .iter()
            .map(|(name, value)| KeyValuePair::builder().name(name).value(value).build())
            .collect();
        let overrides = TaskOverride::builder()
            .container_overrides(
                ContainerOverride::builder()
                    .name(&self.container_name)
                    .set_environment(Some(environment))
                    .build(),
            )
            .build();
        let tags: Vec<Tag> = request
            .tags
            .iter()
            .map(|(key, value)| Tag::builder().key(key).value(value).build())
            .collect();

        let mut call = self
            .client
            .run_task()
            .cluster(&self.cluster)
            .task_definition(&request.task_definition)
            .count(1)
            .overrides(overrides)
            .set_tags(Some(tags));
        call = match &request.placement {
            Placement::CapacityProvider(name) => {
                let strategy = CapacityProviderStrategyItem::builder()
                    .capacity_provider(name)
                    .weight(1)
                    .build()
                    .map_err(|e| SchedulerError::InvalidRequest(e.to_string()))?;
                call.capacity_provider_strategy(strategy)
            }
            Placement::LaunchType(launch_type) => {
                call.launch_type(LaunchType::from(launch_type.as_str()))
            }
        };

        let output = call.send().await.map_err(|e| classify("RunTask", e))?;
        for failure in output.failures() {
            warn!(
                arn = failure.arn().unwrap_or_default(),
                reason = failure.reason().unwrap_or_default(),
                "Run task failure"
            );
        }
        Ok(output
            .tasks()
            .iter()
            .filter_map(|task| task.task_arn().map(str::to_string))
            .collect())
    }

    async fn describe_tasks(&self, handles: &[String]) -> Result<Vec<TaskStatus>, SchedulerError> {
        if handles.is_empty() {
            return Ok(Vec::new());
        }
        let output = self
            .client
            .describe_tasks()
            .cluster(&self.cluster)
            .set_tasks(Some(handles.to_vec()))
            .send()
            .await
            .map_err(|e| classify("DescribeTasks", e))?;

        Ok(output
            .tasks()
            .iter()
            .filter_map(|task| {
                let handle = task.task_arn()?;
                let state = task
                    .last_status()
                    .map(TaskState::from_status)
                    .unwrap_or_else(|| TaskState::Unknown(String::new()));
                Some(TaskStatus {
                    handle: handle.to_string(),
                    state,
                })
            })
            .collect())
    }

    async fn stop_task(&self, handle: &str, reason: &str) -> Result<(), SchedulerError> {
        self.client
            .stop_task()
            .cluster(&self.cluster)
            .task(handle)
            .reason(reason)
            .send()
            .await
            .map_err(|e| classify("StopTask", e))?;
        Ok(())
    }
}
