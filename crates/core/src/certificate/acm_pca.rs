//! AWS Private CA backed certificate authority.

use async_trait::async_trait;
use aws_sdk_acmpca::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_acmpca::primitives::Blob;
use aws_sdk_acmpca::types::{SigningAlgorithm, Validity, ValidityPeriodType};
use aws_sdk_acmpca::Client;
use std::fmt::Debug;

use super::{CaError, CertificateAuthority};

#[derive(Debug, Clone)]
pub struct AcmPcaAuthority {
    client: Client,
}

impl AcmPcaAuthority {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn classify<E, R>(context: &str, err: SdkError<E, R>) -> CaError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: Debug,
{
    let message = format!("{}: {}", context, DisplayErrorContext(&err));
    match err.code() {
        Some("ResourceNotFoundException") => CaError::NotFound(message),
        Some("MalformedCSRException")
        | Some("InvalidArgsException")
        | Some("InvalidStateException")
        | Some("RequestFailedException") => CaError::Rejected(message),
        _ => CaError::Service(message),
    }
}

#[async_trait]
impl CertificateAuthority for AcmPcaAuthority {
    async fn issue_certificate(
        &self,
        ca_arn: &str,
        csr_pem: &str,
        validity_days: u32,
    ) -> Result<String, CaError> {
        const CONTEXT: &str = "IssueCertificate";
        let validity = Validity::builder()
            .value(i64::from(validity_days))
            .r#type(ValidityPeriodType::Days)
            .build()
            .map_err(|e| CaError::Rejected(format!("{}: {}", CONTEXT, e)))?;

        let output = self
            .client
            .issue_certificate()
            .certificate_authority_arn(ca_arn)
            .csr(Blob::new(csr_pem.as_bytes()))
            .signing_algorithm(SigningAlgorithm::Sha256Withrsa)
            .validity(validity)
            .send()
            .await
            .map_err(|e| classify(CONTEXT, e))?;

        output
            .certificate_arn()
            .map(str::to_string)
            .ok_or_else(|| CaError::Service(format!("{}: response has no certificate ARN", CONTEXT)))
    }

    async fn get_certificate(
        &self,
        ca_arn: &str,
        certificate_arn: &str,
    ) -> Result<Option<String>, CaError> {
        let result = self
            .client
            .get_certificate()
            .certificate_authority_arn(ca_arn)
            .certificate_arn(certificate_arn)
            .send()
            .await;

        match result {
            Ok(output) => Ok(output.certificate().map(str::to_string)),
            Err(e) if e.code() == Some("RequestInProgressException") => Ok(None),
            Err(e) => Err(classify("GetCertificate", e)),
        }
    }

    async fn get_ca_certificate(&self, ca_arn: &str) -> Result<String, CaError> {
        const CONTEXT: &str = "GetCertificateAuthorityCertificate";
        let output = self
            .client
            .get_certificate_authority_certificate()
            .certificate_authority_arn(ca_arn)
            .send()
            .await
            .map_err(|e| classify(CONTEXT, e))?;
        output
            .certificate()
            .map(str::to_string)
            .ok_or_else(|| CaError::Service(format!("{}: response has no certificate", CONTEXT)))
    }
}
