//! Job documents the runner executes, and the reports it prints.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use fleetsim_core::{
    CleanRequest, FleetOutcome, LaunchStatus, PreLaunchRequest, TeardownOutcome,
    VehicleDescriptor, VehicleModel,
};

/// One fleet operation, tagged by `operation`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "operation", rename_all = "lowercase")]
pub enum Job {
    Launch(LaunchJob),
    Stop(StopJob),
    Clean(CleanJob),
}

impl Job {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read job file {:?}", path))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Invalid job document")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchJob {
    pub vehicles: Vec<VehicleDescriptor>,
    /// Runtime config per vehicle id, either a JSON object or its text.
    #[serde(default)]
    pub configs: BTreeMap<String, Value>,
    #[serde(default)]
    pub policy_name: Option<String>,
    #[serde(default)]
    pub policy_document: Option<String>,
    #[serde(default)]
    pub recreate_policy_if_exists: bool,
    #[serde(default)]
    pub rich_data_bucket: Option<String>,
    #[serde(default)]
    pub vehicle_model: Option<VehicleModel>,
    /// Tags applied to every launched task.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl LaunchJob {
    pub fn pre_launch_request(&self) -> PreLaunchRequest {
        let configs = self
            .configs
            .iter()
            .map(|(vehicle_id, config)| {
                let text = match config {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                (vehicle_id.clone(), text)
            })
            .collect();

        PreLaunchRequest {
            vehicles: self.vehicles.clone(),
            configs,
            policy_name: self.policy_name.clone(),
            policy_document: self.policy_document.clone(),
            recreate_policy_if_exists: self.recreate_policy_if_exists,
            rich_data_bucket: self.rich_data_bucket.clone(),
            vehicle_model: self.vehicle_model.clone(),
        }
    }

    /// Descriptors of the vehicles that survived provisioning.
    pub fn provisioned(&self, outcome: &FleetOutcome) -> Vec<VehicleDescriptor> {
        self.vehicles
            .iter()
            .filter(|v| outcome.succeeded.contains(&v.vehicle_id))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopJob {
    pub task_arns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanJob {
    pub vehicles: Vec<VehicleDescriptor>,
    #[serde(default)]
    pub policy_name: Option<String>,
    #[serde(default)]
    pub delete_policy: bool,
    #[serde(default = "default_true")]
    pub delete_certificates: bool,
}

fn default_true() -> bool {
    true
}

impl CleanJob {
    pub fn clean_request(&self) -> CleanRequest {
        CleanRequest {
            vehicles: self.vehicles.clone(),
            policy_name: self.policy_name.clone(),
            delete_policy: self.delete_policy,
            delete_certificates: self.delete_certificates,
        }
    }
}

/// Printed after a launch job.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchReport {
    pub provisioning: FleetOutcome,
    pub launched: Vec<LaunchStatus>,
}

/// Printed after a clean job.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanReport {
    pub succeeded: BTreeSet<String>,
    pub failed: BTreeSet<String>,
    pub orphaned_certificates: Vec<String>,
}

impl From<TeardownOutcome> for CleanReport {
    fn from(teardown: TeardownOutcome) -> Self {
        Self {
            succeeded: teardown.outcome.succeeded,
            failed: teardown.outcome.failed,
            orphaned_certificates: teardown.orphaned_certificates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const LAUNCH_JOB: &str = r#"{
        "operation": "launch",
        "vehicles": [
            {"vehicleID": "car-1", "s3": {"bucket": "sim", "key": "car-1"}, "provisionThing": true},
            {"vehicleID": "car-2", "s3": {"bucket": "sim", "key": "car-2"}, "provisionThing": true}
        ],
        "configs": {
            "car-1": {"version": "1.0", "networkInterfaces": []},
            "car-2": "{\"version\":\"1.0\",\"networkInterfaces\":[]}"
        },
        "vehicleModel": {
            "modelManifestArn": "arn:aws:iotfleetwise:us-east-1:123:model-manifest/m",
            "decoderManifestArn": "arn:aws:iotfleetwise:us-east-1:123:decoder-manifest/d"
        },
        "tags": {"team": "sim"}
    }"#;

    #[test]
    fn test_launch_job_configs_accept_objects_and_text() {
        let Job::Launch(job) = Job::parse(LAUNCH_JOB).unwrap() else {
            panic!("expected a launch job");
        };

        let request = job.pre_launch_request();

        assert_eq!(request.vehicles.len(), 2);
        let first: Value = serde_json::from_str(&request.configs["car-1"]).unwrap();
        let second: Value = serde_json::from_str(&request.configs["car-2"]).unwrap();
        assert_eq!(first, second);
        assert!(request.vehicle_model.is_some());
        assert_eq!(job.tags.get("team").map(String::as_str), Some("sim"));
    }

    #[test]
    fn test_provisioned_keeps_only_succeeded_vehicles() {
        let Job::Launch(job) = Job::parse(LAUNCH_JOB).unwrap() else {
            panic!("expected a launch job");
        };
        let outcome = FleetOutcome {
            succeeded: ["car-2".to_string()].into_iter().collect(),
            failed: ["car-1".to_string()].into_iter().collect(),
        };

        let provisioned = job.provisioned(&outcome);

        assert_eq!(provisioned.len(), 1);
        assert_eq!(provisioned[0].vehicle_id, "car-2");
    }

    #[test]
    fn test_clean_job_defaults() {
        let job = Job::parse(
            r#"{"operation": "clean", "vehicles": [], "policyName": "custom"}"#,
        )
        .unwrap();

        let Job::Clean(job) = job else {
            panic!("expected a clean job");
        };
        let request = job.clean_request();
        assert!(request.delete_certificates);
        assert!(!request.delete_policy);
        assert_eq!(request.policy_name.as_deref(), Some("custom"));
    }

    #[test]
    fn test_stop_job_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"operation": "stop", "taskArns": ["arn:aws:ecs:us-east-1:123:task/c/abc"]}}"#
        )
        .unwrap();

        let Job::Stop(job) = Job::from_file(file.path()).unwrap() else {
            panic!("expected a stop job");
        };
        assert_eq!(job.task_arns.len(), 1);
    }

    #[test]
    fn test_unknown_operation_rejected() {
        assert!(Job::parse(r#"{"operation": "reboot"}"#).is_err());
    }

    #[test]
    fn test_clean_report_flattens_teardown() {
        let teardown = TeardownOutcome {
            outcome: FleetOutcome {
                succeeded: ["v0".to_string()].into_iter().collect(),
                failed: Default::default(),
            },
            orphaned_certificates: vec!["cert-1".to_string()],
        };

        let json = serde_json::to_value(CleanReport::from(teardown)).unwrap();

        assert_eq!(json["succeeded"][0], "v0");
        assert_eq!(json["orphanedCertificates"][0], "cert-1");
    }
}
