//! Private CA issuance for vehicles that bring their own CA.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use super::{generate_key_and_csr, CertificateAuthority, CertificateError, KeyAndCsr};
use crate::batch::{batches, BATCH_SIZE};
use crate::metrics;
use crate::storage::{put_certificate_material, ObjectStore};
use crate::vehicle::{CertificateRequest, FleetOutcome, VehicleDescriptor};

/// Produces a private key and CSR for a request.
pub type KeyGenerator = fn(&CertificateRequest) -> Result<KeyAndCsr, CertificateError>;

/// Issues a certificate per vehicle from the CA named in its request.
#[derive(Clone)]
pub struct CertificateIssuer {
    authority: Arc<dyn CertificateAuthority>,
    store: Arc<dyn ObjectStore>,
    key_generator: KeyGenerator,
    batch_size: usize,
    poll_interval: Duration,
    max_polls: u32,
    default_validity_days: u32,
}

impl CertificateIssuer {
    pub fn new(authority: Arc<dyn CertificateAuthority>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            authority,
            store,
            key_generator: generate_key_and_csr,
            batch_size: BATCH_SIZE,
            poll_interval: Duration::from_secs(3),
            max_polls: 60,
            default_validity_days: 120,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// How often and how many times to ask the CA whether a certificate is issued.
    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    pub fn with_default_validity_days(mut self, days: u32) -> Self {
        self.default_validity_days = days;
        self
    }

    pub fn with_key_generator(mut self, key_generator: KeyGenerator) -> Self {
        self.key_generator = key_generator;
        self
    }

    /// Issues and stores certificate material for each vehicle.
    ///
    /// Vehicles in a batch run as separate tasks; a failure or panic in one
    /// only shows up as its absence from `succeeded`.
    pub async fn issue_for_vehicles(&self, vehicles: &[VehicleDescriptor]) -> FleetOutcome {
        let mut succeeded = BTreeSet::new();

        for batch in batches(vehicles, self.batch_size) {
            let mut tasks = JoinSet::new();
            for vehicle in batch {
                let issuer = self.clone();
                let vehicle = vehicle.clone();
                tasks.spawn(async move {
                    let started = Instant::now();
                    let result = issuer.issue_for_vehicle(&vehicle).await;
                    let label = if result.is_ok() { "success" } else { "failed" };
                    metrics::CERTIFICATE_ISSUE_DURATION
                        .with_label_values(&[label])
                        .observe(started.elapsed().as_secs_f64());
                    (vehicle.vehicle_id, result)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((vehicle_id, Ok(()))) => {
                        info!(vehicle_id = %vehicle_id, "Private certificate issued and stored");
                        metrics::VEHICLES_PROVISIONED
                            .with_label_values(&["private_ca", "success"])
                            .inc();
                        succeeded.insert(vehicle_id);
                    }
                    Ok((vehicle_id, Err(e))) => {
                        error!(vehicle_id = %vehicle_id, "Certificate issuance failed: {}", e);
                        metrics::VEHICLES_PROVISIONED
                            .with_label_values(&["private_ca", "failed"])
                            .inc();
                    }
                    Err(e) => {
                        error!("Certificate issuance task aborted: {}", e);
                        metrics::VEHICLES_PROVISIONED
                            .with_label_values(&["private_ca", "failed"])
                            .inc();
                    }
                }
            }
        }

        FleetOutcome::from_attempted(vehicles.iter().map(|v| v.vehicle_id.as_str()), succeeded)
    }

    async fn issue_for_vehicle(&self, vehicle: &VehicleDescriptor) -> Result<(), CertificateError> {
        let request = vehicle
            .certificate_request
            .clone()
            .ok_or(CertificateError::MissingRequest)?;

        let key_generator = self.key_generator;
        let generation_request = request.clone();
        let generated = tokio::task::spawn_blocking(move || key_generator(&generation_request))
            .await
            .map_err(|e| CertificateError::Generation(e.to_string()))??;

        let validity_days = request
            .validity_days
            .filter(|days| *days > 0)
            .unwrap_or(self.default_validity_days);
        let certificate_arn = self
            .authority
            .issue_certificate(&request.ca_arn, &generated.csr_pem, validity_days)
            .await?;
        debug!(vehicle_id = %vehicle.vehicle_id, certificate_arn = %certificate_arn, "CSR submitted");

        let leaf = self
            .wait_until_issued(&request.ca_arn, &certificate_arn)
            .await?;
        let ca_certificate = self.authority.get_ca_certificate(&request.ca_arn).await?;
        let chain = format!("{}\n{}", leaf, ca_certificate);

        put_certificate_material(
            self.store.as_ref(),
            vehicle,
            &chain,
            &generated.private_key_pem,
        )
        .await?;
        Ok(())
    }

    async fn wait_until_issued(
        &self,
        ca_arn: &str,
        certificate_arn: &str,
    ) -> Result<String, CertificateError> {
        for poll in 1..=self.max_polls {
            if let Some(pem) = self.authority.get_certificate(ca_arn, certificate_arn).await? {
                return Ok(pem);
            }
            if poll < self.max_polls {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
        Err(CertificateError::NotIssued {
            certificate_arn: certificate_arn.to_string(),
            polls: self.max_polls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixtures, MemoryObjectStore, MockCertificateAuthority};

    fn issuer(
        authority: &Arc<MockCertificateAuthority>,
        store: &Arc<MemoryObjectStore>,
    ) -> CertificateIssuer {
        CertificateIssuer::new(authority.clone(), store.clone())
            .with_key_generator(fixtures::fake_key_and_csr)
            .with_polling(Duration::from_millis(1), 5)
    }

    #[tokio::test]
    async fn test_chain_is_leaf_then_ca() {
        let authority = Arc::new(MockCertificateAuthority::new());
        let store = Arc::new(MemoryObjectStore::new());
        let vehicles = fixtures::private_ca_vehicles("bucket", 1);

        let outcome = issuer(&authority, &store).issue_for_vehicles(&vehicles).await;

        assert!(outcome.succeeded.contains("v0"));
        let chain = store.get_string("bucket", "v0/cert.crt").await.unwrap();
        let leaf_at = chain.find("\nLEAF ").unwrap();
        let ca_at = chain.find("\nCA ").unwrap();
        assert!(leaf_at < ca_at);
        assert!(chain.contains("-----END CERTIFICATE-----\n-----BEGIN CERTIFICATE-----"));
        let key = store.get_string("bucket", "v0/pri.key").await.unwrap();
        assert!(key.contains("RSA PRIVATE KEY"));
    }

    #[tokio::test]
    async fn test_default_validity_applied() {
        let authority = Arc::new(MockCertificateAuthority::new());
        let store = Arc::new(MemoryObjectStore::new());
        let mut vehicles = fixtures::private_ca_vehicles("bucket", 2);
        if let Some(request) = vehicles[1].certificate_request.as_mut() {
            request.validity_days = Some(30);
        }

        issuer(&authority, &store).issue_for_vehicles(&vehicles).await;

        let mut validities: Vec<u32> = authority
            .issued()
            .await
            .iter()
            .map(|issued| issued.validity_days)
            .collect();
        validities.sort();
        assert_eq!(validities, vec![30, 120]);
    }

    #[tokio::test]
    async fn test_waits_for_pending_issuance() {
        let authority = Arc::new(MockCertificateAuthority::new());
        authority.set_pending_polls(3).await;
        let store = Arc::new(MemoryObjectStore::new());
        let vehicles = fixtures::private_ca_vehicles("bucket", 1);

        let outcome = issuer(&authority, &store).issue_for_vehicles(&vehicles).await;

        assert!(outcome.succeeded.contains("v0"));
    }

    #[tokio::test]
    async fn test_never_issued_is_a_vehicle_failure() {
        let authority = Arc::new(MockCertificateAuthority::new());
        authority.set_pending_polls(100).await;
        let store = Arc::new(MemoryObjectStore::new());
        let vehicles = fixtures::private_ca_vehicles("bucket", 1);

        let outcome = issuer(&authority, &store).issue_for_vehicles(&vehicles).await;

        assert!(outcome.failed.contains("v0"));
        assert!(store.get("bucket", "v0/cert.crt").await.is_none());
    }

    #[tokio::test]
    async fn test_panicking_vehicle_is_isolated() {
        let authority = Arc::new(MockCertificateAuthority::new());
        authority.panic_for_ca("arn:ca/explodes").await;
        let store = Arc::new(MemoryObjectStore::new());
        let mut vehicles = fixtures::private_ca_vehicles("bucket", 3);
        if let Some(request) = vehicles[1].certificate_request.as_mut() {
            request.ca_arn = "arn:ca/explodes".to_string();
        }

        let outcome = issuer(&authority, &store).issue_for_vehicles(&vehicles).await;

        assert_eq!(outcome.succeeded.len(), 2);
        assert_eq!(outcome.failed, ["v1".to_string()].into_iter().collect());
    }

    #[tokio::test]
    async fn test_missing_request_fails_vehicle() {
        let authority = Arc::new(MockCertificateAuthority::new());
        let store = Arc::new(MemoryObjectStore::new());
        let vehicles = fixtures::registry_vehicles("bucket", 1);

        let outcome = issuer(&authority, &store).issue_for_vehicles(&vehicles).await;

        assert!(outcome.failed.contains("v0"));
        assert!(authority.issued().await.is_empty());
    }
}
