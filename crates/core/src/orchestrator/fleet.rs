use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::types::{CleanRequest, OrchestratorError, PreLaunchRequest};
use crate::batch::batches;
use crate::certificate::{CertificateAuthority, CertificateIssuer, KeyGenerator};
use crate::config::{Config, IdentityConfig};
use crate::edge_config::ConfigComposer;
use crate::identity::{
    default_policy_document, EndpointKind, IdentityProvisioner, IdentityRegistry,
    ProvisionOptions, TeardownOptions, TeardownOutcome, RICH_DATA_ROLE_ALIAS,
};
use crate::metrics;
use crate::retry::RetryPolicy;
use crate::scheduler::{ContainerScheduler, LaunchOptions, TaskLauncher, WaitOptions};
use crate::storage::{delete_keys, ObjectStore, StorageError, CONFIG_FILE_NAME};
use crate::vehicle::{FleetOutcome, LaunchStatus, StopOutcome, VehicleDescriptor};
use crate::vehicle_model::{register_vehicles, VehicleModelRegistry};

/// External services a fleet orchestrator drives.
#[derive(Clone)]
pub struct FleetServices {
    pub registry: Arc<dyn IdentityRegistry>,
    pub authority: Arc<dyn CertificateAuthority>,
    pub scheduler: Arc<dyn ContainerScheduler>,
    pub store: Arc<dyn ObjectStore>,
    /// Only needed when vehicles are registered against a model.
    pub vehicle_models: Option<Arc<dyn VehicleModelRegistry>>,
}

/// Provisions, launches, stops and cleans up fleets of simulated vehicles.
pub struct FleetOrchestrator {
    registry: Arc<dyn IdentityRegistry>,
    store: Arc<dyn ObjectStore>,
    vehicle_models: Option<Arc<dyn VehicleModelRegistry>>,
    provisioner: IdentityProvisioner,
    issuer: CertificateIssuer,
    launcher: TaskLauncher,
    composer: ConfigComposer,
    identity: IdentityConfig,
    batch_size: usize,
}

impl FleetOrchestrator {
    pub fn new(services: FleetServices, config: &Config) -> Self {
        let provisioner = IdentityProvisioner::new(services.registry.clone(), services.store.clone())
            .with_retry_policy(RetryPolicy::from(&config.retry))
            .with_batch_size(config.batch_size);
        let issuer = CertificateIssuer::new(services.authority, services.store.clone())
            .with_batch_size(config.batch_size)
            .with_polling(
                config.certificate.poll_interval(),
                config.certificate.max_polls,
            )
            .with_default_validity_days(config.certificate.default_validity_days);
        let launcher = TaskLauncher::new(services.scheduler).with_batch_size(config.batch_size);

        Self {
            registry: services.registry,
            store: services.store,
            vehicle_models: services.vehicle_models,
            provisioner,
            issuer,
            launcher,
            composer: ConfigComposer::new(&config.aws.stage, &config.aws.region),
            identity: config.identity.clone(),
            batch_size: config.batch_size,
        }
    }

    /// Replace how private-CA vehicles get their key pair and CSR.
    pub fn with_key_generator(mut self, key_generator: KeyGenerator) -> Self {
        self.issuer = self.issuer.with_key_generator(key_generator);
        self
    }

    /// Sets up identity, certificate material and runtime config for every
    /// vehicle, ready for launch.
    ///
    /// Registry-path and private-CA vehicles are provisioned concurrently.
    /// Vehicles that fail any step, or have no config document, end up in
    /// `failed`. Endpoint lookup and unparsable documents fail the whole call.
    pub async fn pre_launch(
        &self,
        request: &PreLaunchRequest,
    ) -> Result<FleetOutcome, OrchestratorError> {
        if request.vehicles.is_empty() {
            return Ok(FleetOutcome::default());
        }

        let (registry_path, private_ca_path): (Vec<VehicleDescriptor>, Vec<VehicleDescriptor>) =
            request
                .vehicles
                .iter()
                .cloned()
                .partition(|vehicle| vehicle.provision_identity);
        info!(
            registry = registry_path.len(),
            private_ca = private_ca_path.len(),
            "Provisioning vehicles"
        );

        let options = self.provision_options(request);
        let (provisioned, issued) = tokio::join!(
            self.provision_registry_path(&registry_path, &options),
            self.issue_private_ca_path(&private_ca_path),
        );
        let mut outcome = provisioned.merge(issued);

        match (&self.vehicle_models, &request.vehicle_model) {
            (Some(models), Some(model)) => {
                let registered =
                    register_vehicles(models.as_ref(), &request.vehicles, model, self.batch_size)
                        .await;
                info!(registered, total = request.vehicles.len(), "Vehicles registered with model");
            }
            (None, Some(_)) => warn!("Vehicle model requested but no model registry configured"),
            _ => {}
        }

        let credentials_endpoint = self
            .registry
            .describe_endpoint(EndpointKind::CredentialProvider)
            .await
            .map_err(OrchestratorError::Endpoint)?;
        let data_endpoint = self
            .registry
            .describe_endpoint(EndpointKind::Data)
            .await
            .map_err(OrchestratorError::Endpoint)?;

        info!("Composing vehicle configs");
        let composed = self.composer.apply_credentials_provider(
            &request.configs,
            RICH_DATA_ROLE_ALIAS,
            &credentials_endpoint,
        )?;
        let composed = self
            .composer
            .apply_mqtt_connection(&composed, &data_endpoint)?;

        let mut with_config = Vec::new();
        for vehicle in &request.vehicles {
            match composed.get(&vehicle.vehicle_id) {
                Some(config) => with_config.push((vehicle, config)),
                None => {
                    warn!(vehicle_id = %vehicle.vehicle_id, "No config document for vehicle");
                    outcome.mark_failed(&vehicle.vehicle_id);
                }
            }
        }

        for batch in batches(&with_config, self.batch_size) {
            let results = join_all(
                batch
                    .iter()
                    .map(|(vehicle, config)| self.upload_config(vehicle, config)),
            )
            .await;
            for ((vehicle, _), result) in batch.iter().zip(results) {
                if let Err(e) = result {
                    error!(vehicle_id = %vehicle.vehicle_id, "Config upload failed: {}", e);
                    outcome.mark_failed(&vehicle.vehicle_id);
                }
            }
        }

        info!(
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            "Pre-launch finished"
        );
        Ok(outcome)
    }

    /// Starts one task per vehicle and reports the ones confirmed running.
    pub async fn launch_vehicles(
        &self,
        vehicles: &[VehicleDescriptor],
        options: &LaunchOptions,
    ) -> Result<Vec<LaunchStatus>, OrchestratorError> {
        info!(vehicles = vehicles.len(), "Launching vehicle tasks");
        let record = self.launcher.start(vehicles, options).await?;
        Ok(record
            .into_iter()
            .map(|(vehicle_id, task_arn)| LaunchStatus {
                vehicle_id,
                task_arn,
            })
            .collect())
    }

    /// Stops the given tasks. Registry and storage state is left in place.
    pub async fn stop_vehicles(&self, handles: &[String], wait: &WaitOptions) -> StopOutcome {
        info!(tasks = handles.len(), "Stopping vehicle tasks");
        self.launcher.stop(handles, wait).await
    }

    /// Removes every vehicle's identity and everything stored under its prefix.
    ///
    /// Safe to repeat: identities already gone are skipped.
    pub async fn clean(&self, request: &CleanRequest) -> Result<TeardownOutcome, OrchestratorError> {
        info!(vehicles = request.vehicles.len(), "Deleting vehicle identities");
        let options = TeardownOptions {
            policy_name: request
                .policy_name
                .clone()
                .unwrap_or_else(|| self.identity.policy_name.clone()),
            delete_policy: request.delete_policy,
            delete_certificates: request.delete_certificates,
        };
        let teardown = self.provisioner.teardown(&request.vehicles, &options).await;

        info!("Deleting simulation files");
        let mut by_bucket: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for vehicle in &request.vehicles {
            let prefix = format!("{}/", vehicle.storage.key);
            let keys = self.store.list(&vehicle.storage.bucket, &prefix).await?;
            by_bucket
                .entry(vehicle.storage.bucket.as_str())
                .or_default()
                .extend(keys);
        }
        for (bucket, keys) in &by_bucket {
            delete_keys(self.store.as_ref(), bucket, keys).await?;
            info!(bucket = %bucket, objects = keys.len(), "Simulation files deleted");
        }

        Ok(teardown)
    }

    fn provision_options(&self, request: &PreLaunchRequest) -> ProvisionOptions {
        ProvisionOptions {
            policy_name: request
                .policy_name
                .clone()
                .unwrap_or_else(|| self.identity.policy_name.clone()),
            policy_document: request
                .policy_document
                .clone()
                .or_else(|| self.identity.policy_document.clone())
                .unwrap_or_else(default_policy_document),
            recreate_policy_if_exists: request.recreate_policy_if_exists
                || self.identity.recreate_policy_if_exists,
            rich_data_bucket: request
                .rich_data_bucket
                .clone()
                .or_else(|| self.identity.rich_data_bucket.clone()),
        }
    }

    async fn provision_registry_path(
        &self,
        vehicles: &[VehicleDescriptor],
        options: &ProvisionOptions,
    ) -> FleetOutcome {
        if vehicles.is_empty() {
            return FleetOutcome::default();
        }
        match self.provisioner.provision(vehicles, options).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(vehicles = vehicles.len(), "Registry provisioning failed: {}", e);
                metrics::VEHICLES_PROVISIONED
                    .with_label_values(&["registry", "failed"])
                    .inc_by(vehicles.len() as u64);
                FleetOutcome::all_failed(vehicles.iter().map(|v| v.vehicle_id.as_str()))
            }
        }
    }

    async fn issue_private_ca_path(&self, vehicles: &[VehicleDescriptor]) -> FleetOutcome {
        if vehicles.is_empty() {
            return FleetOutcome::default();
        }
        self.issuer.issue_for_vehicles(vehicles).await
    }

    async fn upload_config(
        &self,
        vehicle: &VehicleDescriptor,
        config: &str,
    ) -> Result<(), StorageError> {
        self.store
            .put(
                &vehicle.storage.bucket,
                &vehicle.storage.object_key(CONFIG_FILE_NAME),
                config.as_bytes().to_vec(),
            )
            .await
    }
}
