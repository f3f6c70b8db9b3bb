//! AWS IoT FleetWise backed vehicle model registry.

use async_trait::async_trait;
use aws_sdk_iotfleetwise::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_iotfleetwise::types::VehicleAssociationBehavior;
use aws_sdk_iotfleetwise::Client;
use tracing::info;

use super::{ModelError, VehicleModel, VehicleModelRegistry};

#[derive(Debug, Clone)]
pub struct AwsFleetWiseRegistry {
    client: Client,
}

impl AwsFleetWiseRegistry {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl VehicleModelRegistry for AwsFleetWiseRegistry {
    async fn create_vehicle(
        &self,
        vehicle_id: &str,
        model: &VehicleModel,
    ) -> Result<(), ModelError> {
        info!(vehicle_id, "Creating vehicle");
        // Repeating the call with an identical configuration succeeds; a
        // different configuration reports the vehicle as existing.
        let result = self
            .client
            .create_vehicle()
            .vehicle_name(vehicle_id)
            .model_manifest_arn(&model.model_manifest_arn)
            .decoder_manifest_arn(&model.decoder_manifest_arn)
            .association_behavior(VehicleAssociationBehavior::ValidateIotThingExists)
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e)
                if matches!(
                    e.code(),
                    Some("ResourceAlreadyExistsException") | Some("ConflictException")
                ) =>
            {
                Err(ModelError::AlreadyExists(vehicle_id.to_string()))
            }
            Err(e) => Err(ModelError::Service(format!(
                "CreateVehicle: {}",
                DisplayErrorContext(&e)
            ))),
        }
    }
}
