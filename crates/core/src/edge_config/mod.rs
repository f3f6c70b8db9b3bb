//! Per-vehicle runtime configuration documents.
//!
//! Callers submit one JSON document per vehicle. The composer injects the
//! messaging endpoint and, for rich data, the credentials provider, leaving
//! every other field as it was.

mod composer;
mod topics;
mod types;

pub use composer::{ComposeError, ConfigComposer};
pub use topics::Topics;
pub use types::{CredentialsProvider, EdgeConfig, MqttConnection, S3Upload, StaticConfig};

/// Directory the worker image reads a vehicle's certificate material from.
pub const DEVICE_CERT_DIR: &str = "/etc/aws-iot-fleetwise";

/// MQTT connection type for a registry-hosted broker.
pub const CONNECTION_TYPE_IOT_CORE: &str = "iotCore";
