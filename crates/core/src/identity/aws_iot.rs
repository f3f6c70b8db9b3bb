//! AWS IoT Core and IAM backed identity registry.

use async_trait::async_trait;
use aws_sdk_iot::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_iot::types::CertificateStatus;
use std::fmt::Debug;
use tracing::debug;

use super::{EndpointKind, IdentityRegistry, KeysAndCertificate, RegistryError};

/// Identity registry over AWS IoT Core, with IAM for the rich data role.
#[derive(Debug, Clone)]
pub struct AwsIotRegistry {
    iot: aws_sdk_iot::Client,
    iam: aws_sdk_iam::Client,
}

impl AwsIotRegistry {
    pub fn new(iot: aws_sdk_iot::Client, iam: aws_sdk_iam::Client) -> Self {
        Self { iot, iam }
    }
}

/// Map an SDK error to a registry error by its service error code.
fn classify<E, R>(context: &str, err: SdkError<E, R>) -> RegistryError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: Debug,
{
    let message = format!("{}: {}", context, DisplayErrorContext(&err));
    match err.code() {
        Some("ResourceAlreadyExistsException") | Some("EntityAlreadyExists") => {
            RegistryError::AlreadyExists(message)
        }
        Some("ResourceNotFoundException") | Some("NoSuchEntity") => {
            RegistryError::NotFound(message)
        }
        Some("DeleteConflictException") => RegistryError::Conflict(message),
        Some("ThrottlingException")
        | Some("Throttling")
        | Some("ServiceUnavailableException")
        | Some("ServiceUnavailable")
        | Some("LimitExceededException") => RegistryError::Throttled(message),
        _ => RegistryError::Service(message),
    }
}

fn missing(context: &str, field: &str) -> RegistryError {
    RegistryError::Service(format!("{}: response has no {}", context, field))
}

#[async_trait]
impl IdentityRegistry for AwsIotRegistry {
    async fn create_keys_and_certificate(&self) -> Result<KeysAndCertificate, RegistryError> {
        const CONTEXT: &str = "CreateKeysAndCertificate";
        let output = self
            .iot
            .create_keys_and_certificate()
            .set_as_active(true)
            .send()
            .await
            .map_err(|e| classify(CONTEXT, e))?;

        let private_key_pem = output
            .key_pair()
            .and_then(|kp| kp.private_key())
            .ok_or_else(|| missing(CONTEXT, "private key"))?;
        Ok(KeysAndCertificate {
            certificate_arn: output
                .certificate_arn()
                .ok_or_else(|| missing(CONTEXT, "certificate ARN"))?
                .to_string(),
            certificate_id: output
                .certificate_id()
                .ok_or_else(|| missing(CONTEXT, "certificate id"))?
                .to_string(),
            certificate_pem: output
                .certificate_pem()
                .ok_or_else(|| missing(CONTEXT, "certificate PEM"))?
                .to_string(),
            private_key_pem: private_key_pem.to_string(),
        })
    }

    async fn create_policy(&self, name: &str, document: &str) -> Result<(), RegistryError> {
        self.iot
            .create_policy()
            .policy_name(name)
            .policy_document(document)
            .send()
            .await
            .map_err(|e| classify("CreatePolicy", e))?;
        Ok(())
    }

    async fn attach_policy(&self, name: &str, target: &str) -> Result<(), RegistryError> {
        self.iot
            .attach_policy()
            .policy_name(name)
            .target(target)
            .send()
            .await
            .map_err(|e| classify("AttachPolicy", e))?;
        Ok(())
    }

    async fn list_targets_for_policy(&self, name: &str) -> Result<Vec<String>, RegistryError> {
        let mut targets = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let output = self
                .iot
                .list_targets_for_policy()
                .policy_name(name)
                .set_marker(marker.take())
                .send()
                .await
                .map_err(|e| classify("ListTargetsForPolicy", e))?;
            targets.extend(output.targets().iter().cloned());
            match output.next_marker() {
                Some(next) if !next.is_empty() => marker = Some(next.to_string()),
                _ => break,
            }
        }
        debug!(policy = name, targets = targets.len(), "Listed policy targets");
        Ok(targets)
    }

    async fn detach_policy(&self, name: &str, target: &str) -> Result<(), RegistryError> {
        self.iot
            .detach_policy()
            .policy_name(name)
            .target(target)
            .send()
            .await
            .map_err(|e| classify("DetachPolicy", e))?;
        Ok(())
    }

    async fn delete_policy(&self, name: &str) -> Result<(), RegistryError> {
        self.iot
            .delete_policy()
            .policy_name(name)
            .send()
            .await
            .map_err(|e| classify("DeletePolicy", e))?;
        Ok(())
    }

    async fn create_thing(&self, name: &str) -> Result<(), RegistryError> {
        self.iot
            .create_thing()
            .thing_name(name)
            .send()
            .await
            .map_err(|e| classify("CreateThing", e))?;
        Ok(())
    }

    async fn delete_thing(&self, name: &str) -> Result<(), RegistryError> {
        self.iot
            .delete_thing()
            .thing_name(name)
            .send()
            .await
            .map_err(|e| {
                // Principal detachment is eventually consistent; the service
                // rejects the delete until it has propagated.
                if e.code() == Some("InvalidRequestException") {
                    RegistryError::Conflict(format!("DeleteThing: {}", DisplayErrorContext(&e)))
                } else {
                    classify("DeleteThing", e)
                }
            })?;
        Ok(())
    }

    async fn attach_thing_principal(
        &self,
        thing: &str,
        principal: &str,
    ) -> Result<(), RegistryError> {
        self.iot
            .attach_thing_principal()
            .thing_name(thing)
            .principal(principal)
            .send()
            .await
            .map_err(|e| classify("AttachThingPrincipal", e))?;
        Ok(())
    }

    async fn list_thing_principals(&self, thing: &str) -> Result<Vec<String>, RegistryError> {
        let mut principals = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let output = self
                .iot
                .list_thing_principals()
                .thing_name(thing)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| classify("ListThingPrincipals", e))?;
            principals.extend(output.principals().iter().cloned());
            match output.next_token() {
                Some(next) if !next.is_empty() => next_token = Some(next.to_string()),
                _ => break,
            }
        }
        Ok(principals)
    }

    async fn detach_thing_principal(
        &self,
        thing: &str,
        principal: &str,
    ) -> Result<(), RegistryError> {
        self.iot
            .detach_thing_principal()
            .thing_name(thing)
            .principal(principal)
            .send()
            .await
            .map_err(|e| classify("DetachThingPrincipal", e))?;
        Ok(())
    }

    async fn deactivate_certificate(&self, certificate_id: &str) -> Result<(), RegistryError> {
        self.iot
            .update_certificate()
            .certificate_id(certificate_id)
            .new_status(CertificateStatus::Inactive)
            .send()
            .await
            .map_err(|e| classify("UpdateCertificate", e))?;
        Ok(())
    }

    async fn delete_certificate(&self, certificate_id: &str) -> Result<(), RegistryError> {
        self.iot
            .delete_certificate()
            .certificate_id(certificate_id)
            .force_delete(true)
            .send()
            .await
            .map_err(|e| classify("DeleteCertificate", e))?;
        Ok(())
    }

    async fn describe_endpoint(&self, kind: EndpointKind) -> Result<String, RegistryError> {
        const CONTEXT: &str = "DescribeEndpoint";
        let output = self
            .iot
            .describe_endpoint()
            .endpoint_type(kind.as_str())
            .send()
            .await
            .map_err(|e| classify(CONTEXT, e))?;
        output
            .endpoint_address()
            .map(str::to_string)
            .ok_or_else(|| missing(CONTEXT, "endpoint address"))
    }

    async fn create_role(
        &self,
        name: &str,
        assume_role_policy: &str,
    ) -> Result<String, RegistryError> {
        const CONTEXT: &str = "CreateRole";
        let output = self
            .iam
            .create_role()
            .role_name(name)
            .assume_role_policy_document(assume_role_policy)
            .send()
            .await
            .map_err(|e| classify(CONTEXT, e))?;
        output
            .role()
            .map(|role| role.arn().to_string())
            .ok_or_else(|| missing(CONTEXT, "role"))
    }

    async fn get_role_arn(&self, name: &str) -> Result<String, RegistryError> {
        const CONTEXT: &str = "GetRole";
        let output = self
            .iam
            .get_role()
            .role_name(name)
            .send()
            .await
            .map_err(|e| classify(CONTEXT, e))?;
        output
            .role()
            .map(|role| role.arn().to_string())
            .ok_or_else(|| missing(CONTEXT, "role"))
    }

    async fn put_role_policy(
        &self,
        role: &str,
        policy_name: &str,
        document: &str,
    ) -> Result<(), RegistryError> {
        self.iam
            .put_role_policy()
            .role_name(role)
            .policy_name(policy_name)
            .policy_document(document)
            .send()
            .await
            .map_err(|e| classify("PutRolePolicy", e))?;
        Ok(())
    }

    async fn create_role_alias(
        &self,
        alias: &str,
        role_arn: &str,
        credential_duration_seconds: i32,
    ) -> Result<String, RegistryError> {
        const CONTEXT: &str = "CreateRoleAlias";
        let output = self
            .iot
            .create_role_alias()
            .role_alias(alias)
            .role_arn(role_arn)
            .credential_duration_seconds(credential_duration_seconds)
            .send()
            .await
            .map_err(|e| classify(CONTEXT, e))?;
        output
            .role_alias_arn()
            .map(str::to_string)
            .ok_or_else(|| missing(CONTEXT, "role alias ARN"))
    }

    async fn describe_role_alias(&self, alias: &str) -> Result<String, RegistryError> {
        const CONTEXT: &str = "DescribeRoleAlias";
        let output = self
            .iot
            .describe_role_alias()
            .role_alias(alias)
            .send()
            .await
            .map_err(|e| classify(CONTEXT, e))?;
        output
            .role_alias_description()
            .and_then(|description| description.role_alias_arn())
            .map(str::to_string)
            .ok_or_else(|| missing(CONTEXT, "role alias ARN"))
    }
}
