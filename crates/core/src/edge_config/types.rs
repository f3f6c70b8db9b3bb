use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A vehicle's runtime configuration document.
///
/// Only the parts this crate rewrites are typed. Everything else is kept in
/// `extra` and written back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeConfig {
    pub version: String,
    pub network_interfaces: Value,
    pub static_config: StaticConfig,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EdgeConfig {
    pub fn with_static_config(self, static_config: StaticConfig) -> Self {
        Self {
            static_config,
            ..self
        }
    }
}

/// The `staticConfig` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mqtt_connection: Option<MqttConnection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_provider: Option<CredentialsProvider>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_upload: Option<S3Upload>,
    /// Buffer sizes, thread idle times, persistency, internal parameters and
    /// anything else the worker understands.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StaticConfig {
    pub fn with_mqtt_connection(self, mqtt_connection: MqttConnection) -> Self {
        Self {
            mqtt_connection: Some(mqtt_connection),
            ..self
        }
    }

    pub fn with_credentials_provider(self, credentials_provider: CredentialsProvider) -> Self {
        Self {
            credentials_provider: Some(credentials_provider),
            ..self
        }
    }

    pub fn with_s3_upload(self, s3_upload: S3Upload) -> Self {
        Self {
            s3_upload: Some(s3_upload),
            ..self
        }
    }
}

/// Broker connection parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MqttConnection {
    pub connection_type: String,
    pub endpoint_url: String,
    pub client_id: String,
    pub collection_scheme_list_topic: String,
    pub decoder_manifest_topic: String,
    pub can_data_topic: String,
    pub checkin_topic: String,
    pub certificate_filename: String,
    pub private_key_filename: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Where the worker exchanges its certificate for temporary credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsProvider {
    pub endpoint_url: String,
    pub role_alias: String,
}

/// Rich data upload limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct S3Upload {
    pub max_envelope_size: u64,
    pub multipart_size: u64,
    pub max_connections: u32,
}

impl Default for S3Upload {
    fn default() -> Self {
        Self {
            max_envelope_size: 104_857_600,
            multipart_size: 5_242_880,
            max_connections: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_fields_round_trip() {
        let input = json!({
            "version": "1.0",
            "networkInterfaces": [{"type": "canInterface"}],
            "customTopLevel": 7,
            "staticConfig": {
                "bufferSizes": {"decodedSignalsBufferSize": 10000},
                "internalParameters": {"readyToPublishDataBufferSize": 10000},
                "mqttConnection": {"endpointUrl": "", "keepAliveIntervalSeconds": 60}
            }
        });

        let config: EdgeConfig = serde_json::from_value(input).unwrap();
        assert_eq!(config.extra["customTopLevel"], json!(7));
        let output = serde_json::to_value(&config).unwrap();

        assert_eq!(output["customTopLevel"], json!(7));
        assert_eq!(
            output["staticConfig"]["internalParameters"],
            json!({"readyToPublishDataBufferSize": 10000})
        );
        assert_eq!(
            output["staticConfig"]["mqttConnection"]["keepAliveIntervalSeconds"],
            json!(60)
        );
        assert!(output["staticConfig"].get("credentialsProvider").is_none());
    }

    #[test]
    fn test_partial_s3_upload_takes_defaults() {
        let upload: S3Upload = serde_json::from_value(json!({"maxEnvelopeSize": 500})).unwrap();
        assert_eq!(upload.max_envelope_size, 500);
        assert_eq!(upload.max_connections, 10);
    }

    #[test]
    fn test_missing_network_interfaces_is_rejected() {
        let input = json!({"version": "1.0", "staticConfig": {}});
        assert!(serde_json::from_value::<EdgeConfig>(input).is_err());
    }
}
