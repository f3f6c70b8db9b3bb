//! Leaf certificates issued by a caller-supplied private CA.

mod acm_pca;
mod csr;
mod issuer;

pub use acm_pca::AcmPcaAuthority;
pub use csr::{generate_key_and_csr, KeyAndCsr};
pub use issuer::{CertificateIssuer, KeyGenerator};

use async_trait::async_trait;
use thiserror::Error;

use crate::storage::StorageError;

/// Errors reported by a certificate authority backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaError {
    #[error("certificate authority not found: {0}")]
    NotFound(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("certificate authority error: {0}")]
    Service(String),
}

/// Per-vehicle issuance errors.
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("vehicle has no certificate request")]
    MissingRequest,

    #[error("key or CSR generation failed: {0}")]
    Generation(String),

    #[error(transparent)]
    Authority(#[from] CaError),

    #[error("certificate {certificate_arn} not issued after {polls} polls")]
    NotIssued { certificate_arn: String, polls: u32 },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Trait for private certificate authority backends.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Submit a PEM CSR for signing; returns the new certificate's ARN.
    async fn issue_certificate(
        &self,
        ca_arn: &str,
        csr_pem: &str,
        validity_days: u32,
    ) -> Result<String, CaError>;

    /// The issued leaf certificate PEM, or `None` while issuance is pending.
    async fn get_certificate(
        &self,
        ca_arn: &str,
        certificate_arn: &str,
    ) -> Result<Option<String>, CaError>;

    /// The CA's own certificate PEM.
    async fn get_ca_certificate(&self, ca_arn: &str) -> Result<String, CaError>;
}
