//! Vehicle descriptors and the outcome types shared by every fleet operation.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Object store location owned by a single vehicle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageLocation {
    pub bucket: String,
    /// Prefix under which all of the vehicle's objects live.
    pub key: String,
}

impl StorageLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Full key of an object stored under this location.
    pub fn object_key(&self, file_name: &str) -> String {
        format!("{}/{}", self.key, file_name)
    }
}

/// Parameters for issuing a leaf certificate from a private CA.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequest {
    #[serde(rename = "pcaArn")]
    pub ca_arn: String,
    pub common_name: String,
    pub organization: String,
    pub country_code: String,
    /// Validity in days. Absent or 0 falls back to the configured default.
    #[serde(default)]
    pub validity_days: Option<u32>,
}

/// One simulated vehicle as submitted by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleDescriptor {
    #[serde(rename = "vehicleID")]
    pub vehicle_id: String,
    #[serde(rename = "s3")]
    pub storage: StorageLocation,
    /// True for the registry-issued certificate path.
    #[serde(rename = "provisionThing", default)]
    pub provision_identity: bool,
    #[serde(
        rename = "deviceCertificateConfig",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub certificate_request: Option<CertificateRequest>,
}

impl VehicleDescriptor {
    /// Descriptor for the registry-issued certificate path.
    pub fn registry(vehicle_id: impl Into<String>, storage: StorageLocation) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            storage,
            provision_identity: true,
            certificate_request: None,
        }
    }

    /// Descriptor for the private CA path.
    pub fn with_certificate(
        vehicle_id: impl Into<String>,
        storage: StorageLocation,
        request: CertificateRequest,
    ) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            storage,
            provision_identity: false,
            certificate_request: Some(request),
        }
    }
}

/// Partition of attempted vehicle ids into succeeded and failed.
///
/// The two sets are always disjoint. Ids whose step was never attempted are in
/// neither.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetOutcome {
    pub succeeded: BTreeSet<String>,
    pub failed: BTreeSet<String>,
}

impl FleetOutcome {
    /// Everything attempted and not in `succeeded` is failed.
    pub fn from_attempted<'a>(
        attempted: impl IntoIterator<Item = &'a str>,
        succeeded: BTreeSet<String>,
    ) -> Self {
        let failed = attempted
            .into_iter()
            .filter(|id| !succeeded.contains(*id))
            .map(str::to_string)
            .collect();
        Self { succeeded, failed }
    }

    /// Every attempted id failed.
    pub fn all_failed<'a>(attempted: impl IntoIterator<Item = &'a str>) -> Self {
        Self::from_attempted(attempted, BTreeSet::new())
    }

    /// Union of two outcomes over disjoint inputs.
    pub fn merge(mut self, other: FleetOutcome) -> Self {
        self.succeeded.extend(other.succeeded);
        self.failed.extend(other.failed);
        self.succeeded.retain(|id| !self.failed.contains(id));
        self
    }

    /// Moves an id from succeeded to failed.
    pub fn mark_failed(&mut self, vehicle_id: &str) {
        self.succeeded.remove(vehicle_id);
        self.failed.insert(vehicle_id.to_string());
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Vehicle id to task handle for tasks confirmed running.
pub type LaunchRecord = BTreeMap<String, String>;

/// A launched vehicle and the task running it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchStatus {
    #[serde(rename = "vehicleID")]
    pub vehicle_id: String,
    pub task_arn: String,
}

/// Partition of requested task handles after a stop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopOutcome {
    pub stopped: BTreeSet<String>,
    pub still_pending: BTreeSet<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_deserializes_job_format() {
        let json = r#"{
            "vehicleID": "car-1",
            "s3": {"bucket": "sim-bucket", "key": "car-1"},
            "provisionThing": false,
            "deviceCertificateConfig": {
                "pcaArn": "arn:aws:acm-pca:us-east-1:123:certificate-authority/abc",
                "commonName": "car-1",
                "organization": "Acme",
                "countryCode": "US",
                "validityDays": 30
            },
            "simulationMetaData": {"ignored": true}
        }"#;
        let vehicle: VehicleDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(vehicle.vehicle_id, "car-1");
        assert!(!vehicle.provision_identity);
        let request = vehicle.certificate_request.unwrap();
        assert_eq!(request.organization, "Acme");
        assert_eq!(request.validity_days, Some(30));
    }

    #[test]
    fn test_outcome_from_attempted() {
        let succeeded: BTreeSet<String> = ["a".to_string()].into();
        let outcome = FleetOutcome::from_attempted(["a", "b", "c"], succeeded);
        assert_eq!(outcome.succeeded.len(), 1);
        assert_eq!(
            outcome.failed,
            ["b".to_string(), "c".to_string()].into_iter().collect()
        );
    }

    #[test]
    fn test_outcome_mark_failed_keeps_sets_disjoint() {
        let mut outcome =
            FleetOutcome::from_attempted(["a", "b"], ["a".to_string(), "b".to_string()].into());
        outcome.mark_failed("b");
        assert!(outcome.succeeded.contains("a"));
        assert!(!outcome.succeeded.contains("b"));
        assert!(outcome.failed.contains("b"));
    }

    #[test]
    fn test_object_key() {
        let location = StorageLocation::new("bucket", "v7");
        assert_eq!(location.object_key("cert.crt"), "v7/cert.crt");
    }
}
