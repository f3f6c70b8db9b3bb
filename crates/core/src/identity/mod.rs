//! Registry-issued identities for simulated vehicles.
//!
//! A vehicle on this path gets a registry thing, a certificate shared by the
//! whole provisioning batch, and an access policy attached to that
//! certificate. `IdentityProvisioner` drives the lifecycle against an
//! `IdentityRegistry` backend.

mod aws_iot;
mod provisioner;

pub use aws_iot::AwsIotRegistry;
pub use provisioner::{IdentityProvisioner, ProvisionOptions, TeardownOptions, TeardownOutcome};

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;

use crate::storage::StorageError;

/// Policy name used when the caller does not pick one.
pub const DEFAULT_POLICY_NAME: &str = "vehicle-simulator-policy";
/// IAM role assumed by vehicles uploading rich data.
pub const RICH_DATA_ROLE_NAME: &str = "vehicle-simulator-credentials-provider-s3";
/// Role alias vehicles present to the credentials provider.
pub const RICH_DATA_ROLE_ALIAS: &str = "vehicle-simulator-credentials-provider";
/// Lifetime of credentials vended through the role alias.
pub const ROLE_ALIAS_CREDENTIAL_SECONDS: i32 = 3600;

/// Access policy granted to every registry-path vehicle by default.
pub fn default_policy_document() -> String {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Action": [
                "iot:Connect",
                "iot:Subscribe",
                "iot:Publish",
                "iot:Receive",
                "iot:AssumeRoleWithCertificate"
            ],
            "Resource": ["*"]
        }]
    })
    .to_string()
}

/// Trust policy letting the credentials provider assume the rich data role.
pub fn rich_data_assume_role_policy() -> String {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": "credentials.iot.amazonaws.com" },
            "Action": "sts:AssumeRole"
        }]
    })
    .to_string()
}

/// Permissions for uploading rich data into `bucket`.
pub fn rich_data_role_policy(bucket: &str) -> String {
    json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Effect": "Allow",
                "Action": ["s3:PutObject", "s3:ListBucket"],
                "Resource": [
                    format!("arn:aws:s3:::{}", bucket),
                    format!("arn:aws:s3:::{}/*", bucket)
                ]
            },
            {
                "Effect": "Allow",
                "Action": ["kms:GenerateDataKey"],
                "Resource": ["*"]
            }
        ]
    })
    .to_string()
}

/// Certificate id from a certificate ARN (the part after the last `/`).
pub fn certificate_id_from_arn(arn: &str) -> &str {
    arn.rsplit('/').next().unwrap_or(arn)
}

/// Errors reported by an identity registry backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A detach or delete has not propagated yet.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("throttled: {0}")]
    Throttled(String),

    #[error("registry error: {0}")]
    Service(String),
}

impl RegistryError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Throttling and service-unavailable style failures.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Throttled(_))
    }
}

/// Errors from identity provisioning.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// A step shared by the whole batch failed; no vehicle was attempted.
    #[error("{step} failed: {source}")]
    SharedSetup {
        step: &'static str,
        #[source]
        source: RegistryError,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl IdentityError {
    pub(crate) fn shared(step: &'static str) -> impl FnOnce(RegistryError) -> Self {
        move |source| Self::SharedSetup { step, source }
    }
}

/// Certificate and key pair created by the registry.
#[derive(Debug, Clone)]
pub struct KeysAndCertificate {
    pub certificate_arn: String,
    pub certificate_id: String,
    pub certificate_pem: String,
    pub private_key_pem: String,
}

/// Registry endpoints a vehicle talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    /// MQTT data plane.
    Data,
    /// Credentials provider for role alias exchange.
    CredentialProvider,
}

impl EndpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointKind::Data => "iot:Data-ATS",
            EndpointKind::CredentialProvider => "iot:CredentialProvider",
        }
    }
}

/// Trait for identity registry backends.
///
/// Create calls report an existing resource as `RegistryError::AlreadyExists`
/// and lookups of missing resources as `RegistryError::NotFound`.
#[async_trait]
pub trait IdentityRegistry: Send + Sync {
    /// Create an active certificate with a fresh key pair.
    async fn create_keys_and_certificate(&self) -> Result<KeysAndCertificate, RegistryError>;

    async fn create_policy(&self, name: &str, document: &str) -> Result<(), RegistryError>;

    async fn attach_policy(&self, name: &str, target: &str) -> Result<(), RegistryError>;

    /// Every target the policy is attached to, across all pages.
    async fn list_targets_for_policy(&self, name: &str) -> Result<Vec<String>, RegistryError>;

    async fn detach_policy(&self, name: &str, target: &str) -> Result<(), RegistryError>;

    async fn delete_policy(&self, name: &str) -> Result<(), RegistryError>;

    async fn create_thing(&self, name: &str) -> Result<(), RegistryError>;

    /// Fails with `Conflict` while principals are still being detached.
    async fn delete_thing(&self, name: &str) -> Result<(), RegistryError>;

    async fn attach_thing_principal(&self, thing: &str, principal: &str)
        -> Result<(), RegistryError>;

    /// Every principal attached to the thing, across all pages.
    async fn list_thing_principals(&self, thing: &str) -> Result<Vec<String>, RegistryError>;

    async fn detach_thing_principal(&self, thing: &str, principal: &str)
        -> Result<(), RegistryError>;

    async fn deactivate_certificate(&self, certificate_id: &str) -> Result<(), RegistryError>;

    /// Force-deletes the certificate. Fails with `Conflict` while still attached.
    async fn delete_certificate(&self, certificate_id: &str) -> Result<(), RegistryError>;

    async fn describe_endpoint(&self, kind: EndpointKind) -> Result<String, RegistryError>;

    /// Create an IAM role; returns its ARN.
    async fn create_role(&self, name: &str, assume_role_policy: &str)
        -> Result<String, RegistryError>;

    async fn get_role_arn(&self, name: &str) -> Result<String, RegistryError>;

    async fn put_role_policy(
        &self,
        role: &str,
        policy_name: &str,
        document: &str,
    ) -> Result<(), RegistryError>;

    /// Create a role alias; returns its ARN.
    async fn create_role_alias(
        &self,
        alias: &str,
        role_arn: &str,
        credential_duration_seconds: i32,
    ) -> Result<String, RegistryError>;

    async fn describe_role_alias(&self, alias: &str) -> Result<String, RegistryError>;
}
