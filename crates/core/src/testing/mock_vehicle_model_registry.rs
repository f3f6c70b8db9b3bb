//! Mock vehicle model registry for testing.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::vehicle_model::{ModelError, VehicleModel, VehicleModelRegistry};

/// Mock implementation of the VehicleModelRegistry trait.
#[derive(Debug)]
pub struct MockVehicleModelRegistry {
    /// Every create call as (vehicle id, model).
    created: Arc<RwLock<Vec<(String, VehicleModel)>>>,
    existing: Arc<RwLock<BTreeSet<String>>>,
    failing: Arc<RwLock<BTreeSet<String>>>,
}

impl Default for MockVehicleModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MockVehicleModelRegistry {
    pub fn new() -> Self {
        Self {
            created: Arc::new(RwLock::new(Vec::new())),
            existing: Arc::new(RwLock::new(BTreeSet::new())),
            failing: Arc::new(RwLock::new(BTreeSet::new())),
        }
    }

    pub async fn created(&self) -> Vec<(String, VehicleModel)> {
        self.created.read().await.clone()
    }

    /// A vehicle registered earlier with a different model.
    pub async fn add_vehicle(&self, vehicle_id: &str) {
        self.existing.write().await.insert(vehicle_id.to_string());
    }

    pub async fn fail_for(&self, vehicle_id: &str) {
        self.failing.write().await.insert(vehicle_id.to_string());
    }
}

#[async_trait]
impl VehicleModelRegistry for MockVehicleModelRegistry {
    async fn create_vehicle(
        &self,
        vehicle_id: &str,
        model: &VehicleModel,
    ) -> Result<(), ModelError> {
        self.created
            .write()
            .await
            .push((vehicle_id.to_string(), model.clone()));
        if self.failing.read().await.contains(vehicle_id) {
            return Err(ModelError::Service(format!("thing {} not found", vehicle_id)));
        }
        if self.existing.read().await.contains(vehicle_id) {
            return Err(ModelError::AlreadyExists(vehicle_id.to_string()));
        }
        Ok(())
    }
}
