use std::collections::BTreeMap;
use thiserror::Error;

use crate::edge_config::ComposeError;
use crate::identity::RegistryError;
use crate::scheduler::LaunchError;
use crate::storage::StorageError;
use crate::vehicle::VehicleDescriptor;
use crate::vehicle_model::VehicleModel;

/// Errors that end a fleet operation.
///
/// Per-vehicle failures are never reported here; they show up in the
/// operation's outcome instead.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("endpoint lookup failed: {0}")]
    Endpoint(#[source] RegistryError),

    #[error(transparent)]
    Compose(#[from] ComposeError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Input to `FleetOrchestrator::pre_launch`.
#[derive(Debug, Clone, Default)]
pub struct PreLaunchRequest {
    pub vehicles: Vec<VehicleDescriptor>,
    /// Runtime config document per vehicle id.
    pub configs: BTreeMap<String, String>,
    /// Falls back to the configured policy name.
    pub policy_name: Option<String>,
    /// Falls back to the configured, then the built-in, policy document.
    pub policy_document: Option<String>,
    pub recreate_policy_if_exists: bool,
    /// Falls back to the configured rich data bucket.
    pub rich_data_bucket: Option<String>,
    /// Registers every vehicle against this model when set.
    pub vehicle_model: Option<VehicleModel>,
}

/// Input to `FleetOrchestrator::clean`.
#[derive(Debug, Clone, Default)]
pub struct CleanRequest {
    pub vehicles: Vec<VehicleDescriptor>,
    pub policy_name: Option<String>,
    pub delete_policy: bool,
    pub delete_certificates: bool,
}
