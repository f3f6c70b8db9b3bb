//! Registry-path provisioning and teardown.

use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{
    certificate_id_from_arn, rich_data_assume_role_policy, rich_data_role_policy, IdentityError,
    IdentityRegistry, KeysAndCertificate, RegistryError, RICH_DATA_ROLE_ALIAS,
    RICH_DATA_ROLE_NAME, ROLE_ALIAS_CREDENTIAL_SECONDS,
};
use crate::batch::{batches, BATCH_SIZE};
use crate::metrics;
use crate::retry::{ensure_idempotent, with_retry, RetryPolicy};
use crate::storage::{
    delete_keys, keys_by_bucket, put_certificate_material, ObjectStore, CERT_FILE_NAME,
    PRIVATE_KEY_FILE_NAME,
};
use crate::vehicle::{FleetOutcome, VehicleDescriptor};

/// Options for `IdentityProvisioner::provision`.
#[derive(Debug, Clone)]
pub struct ProvisionOptions {
    pub policy_name: String,
    pub policy_document: String,
    pub recreate_policy_if_exists: bool,
    /// Bucket vehicles upload rich data to. Set up the role and alias when present.
    pub rich_data_bucket: Option<String>,
}

/// Options for `IdentityProvisioner::teardown`.
#[derive(Debug, Clone)]
pub struct TeardownOptions {
    pub policy_name: String,
    pub delete_policy: bool,
    pub delete_certificates: bool,
}

/// Result of a teardown.
///
/// `orphaned_certificates` lists certificates whose deletion still failed
/// after retries. Their vehicles may still appear in `outcome.succeeded`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownOutcome {
    pub outcome: FleetOutcome,
    pub orphaned_certificates: Vec<String>,
}

/// Creates and removes registry identities for vehicles.
#[derive(Clone)]
pub struct IdentityProvisioner {
    registry: Arc<dyn IdentityRegistry>,
    store: Arc<dyn ObjectStore>,
    retry: RetryPolicy,
    batch_size: usize,
}

impl IdentityProvisioner {
    pub fn new(registry: Arc<dyn IdentityRegistry>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            registry,
            store,
            retry: RetryPolicy::default(),
            batch_size: BATCH_SIZE,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Provisions a thing per vehicle, all sharing one certificate and policy.
    ///
    /// Returns `Err` only when a shared step fails, in which case no vehicle
    /// was attempted.
    pub async fn provision(
        &self,
        vehicles: &[VehicleDescriptor],
        options: &ProvisionOptions,
    ) -> Result<FleetOutcome, IdentityError> {
        if vehicles.is_empty() {
            return Ok(FleetOutcome::default());
        }

        let keys = self
            .registry
            .create_keys_and_certificate()
            .await
            .map_err(IdentityError::shared("create certificate"))?;
        info!(certificate_id = %keys.certificate_id, "Shared certificate created");

        if let Some(bucket) = options.rich_data_bucket.as_deref().filter(|b| !b.is_empty()) {
            let alias_arn = self.ensure_rich_data_role(bucket).await?;
            info!(role_alias = %alias_arn, "Rich data role alias ready");
        }

        self.ensure_policy(
            &options.policy_name,
            &options.policy_document,
            options.recreate_policy_if_exists,
        )
        .await
        .map_err(IdentityError::shared("create policy"))?;
        self.registry
            .attach_policy(&options.policy_name, &keys.certificate_arn)
            .await
            .map_err(IdentityError::shared("attach policy"))?;

        let mut succeeded = BTreeSet::new();
        for batch in batches(vehicles, self.batch_size) {
            let results =
                join_all(batch.iter().map(|vehicle| self.provision_vehicle(vehicle, &keys))).await;
            for (vehicle, result) in batch.iter().zip(results) {
                match result {
                    Ok(()) => {
                        info!(
                            vehicle_id = %vehicle.vehicle_id,
                            bucket = %vehicle.storage.bucket,
                            key = %vehicle.storage.key,
                            "Thing provisioned, certificate stored"
                        );
                        metrics::VEHICLES_PROVISIONED
                            .with_label_values(&["registry", "success"])
                            .inc();
                        succeeded.insert(vehicle.vehicle_id.clone());
                    }
                    Err(e) => {
                        error!(vehicle_id = %vehicle.vehicle_id, "Provisioning failed: {}", e);
                        metrics::VEHICLES_PROVISIONED
                            .with_label_values(&["registry", "failed"])
                            .inc();
                    }
                }
            }
        }

        Ok(FleetOutcome::from_attempted(
            vehicles.iter().map(|v| v.vehicle_id.as_str()),
            succeeded,
        ))
    }

    /// Removes each vehicle's thing and stored certificate material.
    ///
    /// Policy and certificate cleanup failures are logged, never fatal.
    pub async fn teardown(
        &self,
        vehicles: &[VehicleDescriptor],
        options: &TeardownOptions,
    ) -> TeardownOutcome {
        let mut succeeded = BTreeSet::new();
        let mut principals = BTreeSet::new();

        for batch in batches(vehicles, self.batch_size) {
            let results =
                join_all(batch.iter().map(|vehicle| self.remove_thing(&vehicle.vehicle_id))).await;
            for (vehicle, result) in batch.iter().zip(results) {
                match result {
                    Ok(attached) => {
                        info!(vehicle_id = %vehicle.vehicle_id, "Thing deleted");
                        metrics::VEHICLES_TORN_DOWN.with_label_values(&["success"]).inc();
                        principals.extend(attached);
                        succeeded.insert(vehicle.vehicle_id.clone());
                    }
                    Err(e) => {
                        error!(vehicle_id = %vehicle.vehicle_id, "Thing deletion failed: {}", e);
                        metrics::VEHICLES_TORN_DOWN.with_label_values(&["failed"]).inc();
                    }
                }
            }
        }

        let grouped = keys_by_bucket(vehicles, |vehicle| {
            vec![
                vehicle.storage.object_key(CERT_FILE_NAME),
                vehicle.storage.object_key(PRIVATE_KEY_FILE_NAME),
            ]
        });
        for (bucket, keys) in &grouped {
            if let Err(e) = delete_keys(self.store.as_ref(), bucket, keys).await {
                error!(bucket = %bucket, "Failed to delete certificate objects: {}", e);
            }
        }

        if options.delete_policy {
            match self.remove_policy(&options.policy_name).await {
                Ok(()) => info!(policy = %options.policy_name, "Policy deleted"),
                Err(e) if e.is_not_found() => {
                    info!(policy = %options.policy_name, "Policy already deleted")
                }
                Err(e) => error!(policy = %options.policy_name, "Policy deletion failed: {}", e),
            }
        }

        let mut orphaned_certificates = Vec::new();
        if options.delete_certificates {
            for principal in &principals {
                if let Err(e) = self.remove_certificate(principal).await {
                    error!(certificate = %principal, "Certificate deletion failed: {}", e);
                    metrics::CERTIFICATES_ORPHANED.inc();
                    orphaned_certificates.push(principal.clone());
                }
            }
        }

        TeardownOutcome {
            outcome: FleetOutcome::from_attempted(
                vehicles.iter().map(|v| v.vehicle_id.as_str()),
                succeeded,
            ),
            orphaned_certificates,
        }
    }

    async fn provision_vehicle(
        &self,
        vehicle: &VehicleDescriptor,
        keys: &KeysAndCertificate,
    ) -> Result<(), IdentityError> {
        let thing = vehicle.vehicle_id.as_str();
        let registry = self.registry.as_ref();

        with_retry(&self.retry, "create_thing", RegistryError::is_transient, move || {
            ensure_idempotent(
                move || registry.create_thing(thing),
                RegistryError::is_already_exists,
                move || async move {
                    warn!(thing, "Thing already exists, deleting and recreating");
                    self.remove_thing(thing).await?;
                    registry.create_thing(thing).await
                },
            )
        })
        .await?;

        registry
            .attach_thing_principal(thing, &keys.certificate_arn)
            .await?;
        put_certificate_material(
            self.store.as_ref(),
            vehicle,
            &keys.certificate_pem,
            &keys.private_key_pem,
        )
        .await?;
        Ok(())
    }

    /// Create the policy, reusing or recreating an existing one.
    async fn ensure_policy(
        &self,
        name: &str,
        document: &str,
        recreate_if_exists: bool,
    ) -> Result<(), RegistryError> {
        let registry = self.registry.as_ref();
        ensure_idempotent(
            move || registry.create_policy(name, document),
            RegistryError::is_already_exists,
            move || async move {
                if recreate_if_exists {
                    warn!(policy = name, "Policy already exists, recreating");
                    self.remove_policy(name).await?;
                    registry.create_policy(name, document).await
                } else {
                    info!(policy = name, "Policy already exists, reusing");
                    Ok(())
                }
            },
        )
        .await
    }

    /// Detach the policy from every target, then delete it.
    async fn remove_policy(&self, name: &str) -> Result<(), RegistryError> {
        let registry = self.registry.as_ref();
        let targets = registry.list_targets_for_policy(name).await?;
        for target in &targets {
            match registry.detach_policy(name, target).await {
                Err(e) if !e.is_not_found() => return Err(e),
                _ => {}
            }
        }
        with_retry(&self.retry, "delete_policy", RegistryError::is_conflict, move || {
            registry.delete_policy(name)
        })
        .await
    }

    /// Detach all principals and delete the thing. Returns the detached principals.
    async fn remove_thing(&self, thing: &str) -> Result<Vec<String>, RegistryError> {
        let registry = self.registry.as_ref();
        let principals = match registry.list_thing_principals(thing).await {
            Ok(principals) => principals,
            Err(e) if e.is_not_found() => {
                info!(thing, "Thing not found, nothing to detach");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        for principal in &principals {
            match registry.detach_thing_principal(thing, principal).await {
                Err(e) if !e.is_not_found() => return Err(e),
                _ => {}
            }
        }

        let deleted = with_retry(&self.retry, "delete_thing", RegistryError::is_conflict, move || {
            registry.delete_thing(thing)
        })
        .await;
        match deleted {
            Err(e) if e.is_not_found() => {
                info!(thing, "Thing already deleted");
                Ok(principals)
            }
            Err(e) => Err(e),
            Ok(()) => Ok(principals),
        }
    }

    async fn remove_certificate(&self, principal: &str) -> Result<(), RegistryError> {
        let registry = self.registry.as_ref();
        let certificate_id = certificate_id_from_arn(principal);
        match registry.deactivate_certificate(certificate_id).await {
            Err(e) if e.is_not_found() => return Ok(()),
            other => other?,
        }
        with_retry(
            &self.retry,
            "delete_certificate",
            RegistryError::is_conflict,
            move || registry.delete_certificate(certificate_id),
        )
        .await?;
        info!(certificate_id, "Certificate deleted");
        Ok(())
    }

    /// Role and role alias that let vehicles upload rich data to `bucket`.
    async fn ensure_rich_data_role(&self, bucket: &str) -> Result<String, IdentityError> {
        let registry = self.registry.as_ref();
        let assume_role_policy = rich_data_assume_role_policy();
        let assume_role_policy = assume_role_policy.as_str();

        let role_arn = ensure_idempotent(
            move || registry.create_role(RICH_DATA_ROLE_NAME, assume_role_policy),
            RegistryError::is_already_exists,
            move || async move {
                info!(role = RICH_DATA_ROLE_NAME, "Role already exists, reusing");
                registry.get_role_arn(RICH_DATA_ROLE_NAME).await
            },
        )
        .await
        .map_err(IdentityError::shared("create rich data role"))?;

        registry
            .put_role_policy(
                RICH_DATA_ROLE_NAME,
                RICH_DATA_ROLE_NAME,
                &rich_data_role_policy(bucket),
            )
            .await
            .map_err(IdentityError::shared("put rich data role policy"))?;

        let role_arn = role_arn.as_str();
        ensure_idempotent(
            move || {
                registry.create_role_alias(
                    RICH_DATA_ROLE_ALIAS,
                    role_arn,
                    ROLE_ALIAS_CREDENTIAL_SECONDS,
                )
            },
            RegistryError::is_already_exists,
            move || async move {
                info!(alias = RICH_DATA_ROLE_ALIAS, "Role alias already exists, reusing");
                registry.describe_role_alias(RICH_DATA_ROLE_ALIAS).await
            },
        )
        .await
        .map_err(IdentityError::shared("create role alias"))
    }
}
