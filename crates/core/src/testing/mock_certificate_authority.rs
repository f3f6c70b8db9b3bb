//! Mock private certificate authority for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::certificate::{CaError, CertificateAuthority};

/// A recorded issuance for test assertions.
#[derive(Debug, Clone)]
pub struct IssuedRecord {
    pub ca_arn: String,
    pub certificate_arn: String,
    pub csr_pem: String,
    pub validity_days: u32,
    pub timestamp: chrono::DateTime<Utc>,
}

/// Mock implementation of the CertificateAuthority trait.
///
/// Issued certificates become available after a configurable number of
/// pending polls. Leaf PEMs contain `LEAF`, CA PEMs contain `CA`.
#[derive(Debug)]
pub struct MockCertificateAuthority {
    issued: Arc<RwLock<Vec<IssuedRecord>>>,
    /// Remaining pending polls per certificate ARN.
    pending: Arc<RwLock<BTreeMap<String, u32>>>,
    pending_polls: Arc<RwLock<u32>>,
    /// CA ARNs whose issue call panics.
    panicking: Arc<RwLock<BTreeSet<String>>>,
    /// If set, the next issue call will fail with this error.
    next_error: Arc<RwLock<Option<CaError>>>,
}

impl Default for MockCertificateAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCertificateAuthority {
    pub fn new() -> Self {
        Self {
            issued: Arc::new(RwLock::new(Vec::new())),
            pending: Arc::new(RwLock::new(BTreeMap::new())),
            pending_polls: Arc::new(RwLock::new(0)),
            panicking: Arc::new(RwLock::new(BTreeSet::new())),
            next_error: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn issued(&self) -> Vec<IssuedRecord> {
        self.issued.read().await.clone()
    }

    /// Each certificate issued from now on reports pending this many times.
    pub async fn set_pending_polls(&self, polls: u32) {
        *self.pending_polls.write().await = polls;
    }

    /// Issuing from this CA panics, as a misbehaving client might.
    pub async fn panic_for_ca(&self, ca_arn: &str) {
        self.panicking.write().await.insert(ca_arn.to_string());
    }

    pub async fn set_next_error(&self, error: CaError) {
        *self.next_error.write().await = Some(error);
    }
}

#[async_trait]
impl CertificateAuthority for MockCertificateAuthority {
    async fn issue_certificate(
        &self,
        ca_arn: &str,
        csr_pem: &str,
        validity_days: u32,
    ) -> Result<String, CaError> {
        if self.panicking.read().await.contains(ca_arn) {
            panic!("certificate authority {} exploded", ca_arn);
        }
        if let Some(error) = self.next_error.write().await.take() {
            return Err(error);
        }

        let mut issued = self.issued.write().await;
        let certificate_arn = format!("{}/certificate/{}", ca_arn, issued.len() + 1);
        issued.push(IssuedRecord {
            ca_arn: ca_arn.to_string(),
            certificate_arn: certificate_arn.clone(),
            csr_pem: csr_pem.to_string(),
            validity_days,
            timestamp: Utc::now(),
        });
        let polls = *self.pending_polls.read().await;
        self.pending
            .write()
            .await
            .insert(certificate_arn.clone(), polls);
        Ok(certificate_arn)
    }

    async fn get_certificate(
        &self,
        _ca_arn: &str,
        certificate_arn: &str,
    ) -> Result<Option<String>, CaError> {
        let mut pending = self.pending.write().await;
        let remaining = pending
            .get_mut(certificate_arn)
            .ok_or_else(|| CaError::NotFound(certificate_arn.to_string()))?;
        if *remaining > 0 {
            *remaining -= 1;
            return Ok(None);
        }
        Ok(Some(format!(
            "-----BEGIN CERTIFICATE-----\nLEAF {}\n-----END CERTIFICATE-----",
            certificate_arn
        )))
    }

    async fn get_ca_certificate(&self, ca_arn: &str) -> Result<String, CaError> {
        Ok(format!(
            "-----BEGIN CERTIFICATE-----\nCA {}\n-----END CERTIFICATE-----",
            ca_arn
        ))
    }
}
