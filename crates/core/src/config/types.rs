use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub aws: AwsConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub certificate: CertificateConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Vehicles handled concurrently per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    crate::batch::BATCH_SIZE
}

/// AWS account-level settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AwsConfig {
    pub region: String,
    /// Deployment stage; "prod" selects the bare topic prefix.
    #[serde(default = "default_stage")]
    pub stage: String,
}

fn default_stage() -> String {
    "prod".to_string()
}

/// Registry-path provisioning defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdentityConfig {
    #[serde(default = "default_policy_name")]
    pub policy_name: String,
    /// Overrides the built-in access policy document when set.
    #[serde(default)]
    pub policy_document: Option<String>,
    #[serde(default)]
    pub recreate_policy_if_exists: bool,
    /// Bucket the rich-data upload role may write to.
    #[serde(default)]
    pub rich_data_bucket: Option<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            policy_name: default_policy_name(),
            policy_document: None,
            recreate_policy_if_exists: false,
            rich_data_bucket: None,
        }
    }
}

fn default_policy_name() -> String {
    crate::identity::DEFAULT_POLICY_NAME.to_string()
}

/// Private CA issuance settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CertificateConfig {
    #[serde(default = "default_cert_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_cert_max_polls")]
    pub max_polls: u32,
    #[serde(default = "default_validity_days")]
    pub default_validity_days: u32,
}

impl Default for CertificateConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_cert_poll_interval_ms(),
            max_polls: default_cert_max_polls(),
            default_validity_days: default_validity_days(),
        }
    }
}

impl CertificateConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_cert_poll_interval_ms() -> u64 {
    3000
}

fn default_cert_max_polls() -> u32 {
    60
}

fn default_validity_days() -> u32 {
    120
}

/// Container scheduler settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// CPU architecture of the worker image ("arm64" or "amd64").
    #[serde(default = "default_cpu_architecture")]
    pub cpu_architecture: String,
    /// Cluster name; derived from the architecture when absent.
    #[serde(default)]
    pub cluster: Option<String>,
    /// Task definition; derived from the architecture when absent.
    #[serde(default)]
    pub task_definition: Option<String>,
    #[serde(default = "default_true")]
    pub use_capacity_provider: bool,
    /// Capacity provider; derived from the architecture when absent.
    #[serde(default)]
    pub capacity_provider: Option<String>,
    #[serde(default = "default_launch_type")]
    pub launch_type: String,
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,
    #[serde(default = "default_wait_retries")]
    pub wait_retries: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cpu_architecture: default_cpu_architecture(),
            cluster: None,
            task_definition: None,
            use_capacity_provider: true,
            capacity_provider: None,
            launch_type: default_launch_type(),
            wait_timeout_secs: default_wait_timeout_secs(),
            wait_retries: default_wait_retries(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl SchedulerConfig {
    pub fn cluster_name(&self) -> String {
        self.cluster
            .clone()
            .unwrap_or_else(|| format!("vehicle-simulator-{}", self.cpu_architecture))
    }

    pub fn task_definition_name(&self) -> String {
        self.task_definition
            .clone()
            .unwrap_or_else(|| format!("fwe-{}", self.cpu_architecture))
    }

    pub fn capacity_provider_name(&self) -> String {
        self.capacity_provider
            .clone()
            .unwrap_or_else(|| format!("ubuntu-{}-capacity-provider", self.cpu_architecture))
    }

    pub fn container_name(&self) -> String {
        format!("fwe-{}", self.cpu_architecture)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_cpu_architecture() -> String {
    "arm64".to_string()
}

fn default_true() -> bool {
    true
}

fn default_launch_type() -> String {
    "EC2".to_string()
}

fn default_wait_timeout_secs() -> u64 {
    300
}

fn default_wait_retries() -> u32 {
    100
}

fn default_poll_interval_ms() -> u64 {
    6000
}

/// Retry settings for transient registry conflicts.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_multiplier: config.backoff_multiplier,
        }
    }
}

fn default_max_attempts() -> u32 {
    10
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}
