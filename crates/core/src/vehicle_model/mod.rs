//! Registration of simulated vehicles against a vehicle model.

mod fleetwise;

pub use fleetwise::AwsFleetWiseRegistry;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use crate::batch::batches;
use crate::vehicle::VehicleDescriptor;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("vehicle already exists: {0}")]
    AlreadyExists(String),

    #[error("vehicle model service error: {0}")]
    Service(String),
}

impl ModelError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, ModelError::AlreadyExists(_))
    }
}

/// Model and decoder manifests every vehicle is registered against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleModel {
    pub model_manifest_arn: String,
    pub decoder_manifest_arn: String,
}

/// Trait for vehicle model registries.
#[async_trait]
pub trait VehicleModelRegistry: Send + Sync {
    /// Register a vehicle whose registry thing already exists.
    async fn create_vehicle(&self, vehicle_id: &str, model: &VehicleModel)
        -> Result<(), ModelError>;
}

/// Registers each vehicle, batch by batch. Returns the number registered or
/// already present.
///
/// Failures are logged and never stop the remaining vehicles.
pub async fn register_vehicles(
    registry: &dyn VehicleModelRegistry,
    vehicles: &[VehicleDescriptor],
    model: &VehicleModel,
    batch_size: usize,
) -> usize {
    let mut registered = 0;
    for batch in batches(vehicles, batch_size) {
        let results = join_all(
            batch
                .iter()
                .map(|vehicle| registry.create_vehicle(&vehicle.vehicle_id, model)),
        )
        .await;
        for (vehicle, result) in batch.iter().zip(results) {
            match result {
                Ok(()) => registered += 1,
                Err(e) if e.is_already_exists() => {
                    info!(vehicle_id = %vehicle.vehicle_id, "Vehicle already registered with a different model, reusing");
                    registered += 1;
                }
                Err(e) => {
                    error!(vehicle_id = %vehicle.vehicle_id, "Vehicle registration failed: {}", e)
                }
            }
        }
    }
    registered
}
