//! Injects endpoint and credential settings into per-vehicle config documents.

use std::collections::BTreeMap;
use thiserror::Error;
use tracing::error;

use super::{
    CredentialsProvider, EdgeConfig, MqttConnection, S3Upload, Topics, CONNECTION_TYPE_IOT_CORE,
    DEVICE_CERT_DIR,
};
use crate::storage::{CERT_FILE_NAME, PRIVATE_KEY_FILE_NAME};

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("invalid config document for vehicle {vehicle_id}: {message}")]
    InvalidDocument { vehicle_id: String, message: String },
}

/// Rewrites per-vehicle config documents (`vehicle_id -> JSON text`).
///
/// Every operation parses each document, replaces one part and serialises it
/// again. One unparsable document fails the whole call.
#[derive(Debug, Clone)]
pub struct ConfigComposer {
    stage: String,
    region: String,
}

impl ConfigComposer {
    pub fn new(stage: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            region: region.into(),
        }
    }

    /// Points each worker at the credentials provider and sets rich data
    /// upload limits.
    pub fn apply_credentials_provider(
        &self,
        configs: &BTreeMap<String, String>,
        role_alias: &str,
        endpoint: &str,
    ) -> Result<BTreeMap<String, String>, ComposeError> {
        rewrite(configs, |_, config| {
            let static_config = config
                .static_config
                .clone()
                .with_credentials_provider(CredentialsProvider {
                    endpoint_url: endpoint.to_string(),
                    role_alias: role_alias.to_string(),
                })
                .with_s3_upload(S3Upload::default());
            config.with_static_config(static_config)
        })
    }

    /// Sets each worker's broker connection: endpoint, client id, topics and
    /// certificate paths.
    pub fn apply_mqtt_connection(
        &self,
        configs: &BTreeMap<String, String>,
        endpoint: &str,
    ) -> Result<BTreeMap<String, String>, ComposeError> {
        rewrite(configs, |vehicle_id, config| {
            let extra = config
                .static_config
                .mqtt_connection
                .as_ref()
                .map(|existing| existing.extra.clone())
                .unwrap_or_default();
            let static_config = config
                .static_config
                .clone()
                .with_mqtt_connection(MqttConnection {
                    extra,
                    ..self.mqtt_connection(vehicle_id, endpoint)
                });
            config.with_static_config(static_config)
        })
    }

    fn mqtt_connection(&self, vehicle_id: &str, endpoint: &str) -> MqttConnection {
        let topics = Topics::new(&self.stage, &self.region, vehicle_id);
        MqttConnection {
            connection_type: CONNECTION_TYPE_IOT_CORE.to_string(),
            endpoint_url: endpoint.to_string(),
            client_id: vehicle_id.to_string(),
            collection_scheme_list_topic: topics.collection_schemes(),
            decoder_manifest_topic: topics.decoder_manifests(),
            can_data_topic: topics.signals(),
            checkin_topic: topics.checkins(),
            certificate_filename: format!("{}/{}/{}", DEVICE_CERT_DIR, vehicle_id, CERT_FILE_NAME),
            private_key_filename: format!(
                "{}/{}/{}",
                DEVICE_CERT_DIR, vehicle_id, PRIVATE_KEY_FILE_NAME
            ),
            extra: Default::default(),
        }
    }
}

fn rewrite<F>(
    configs: &BTreeMap<String, String>,
    update: F,
) -> Result<BTreeMap<String, String>, ComposeError>
where
    F: Fn(&str, EdgeConfig) -> EdgeConfig,
{
    configs
        .iter()
        .map(|(vehicle_id, json)| {
            let config: EdgeConfig = serde_json::from_str(json).map_err(|e| {
                error!(vehicle_id = %vehicle_id, "Config document does not parse: {}", e);
                invalid(vehicle_id, e)
            })?;
            let updated = update(vehicle_id, config);
            let json = serde_json::to_string(&updated).map_err(|e| invalid(vehicle_id, e))?;
            Ok((vehicle_id.clone(), json))
        })
        .collect()
}

fn invalid(vehicle_id: &str, e: serde_json::Error) -> ComposeError {
    ComposeError::InvalidDocument {
        vehicle_id: vehicle_id.to_string(),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    const CONFIG: &str = r#"{
        "version": "1.0",
        "networkInterfaces": [],
        "staticConfig": {
            "bufferSizes": {},
            "threadIdleTimes": {},
            "persistency": {},
            "internalParameters": {"maximumAwsSdkHeapMemoryBytes": 10000000},
            "publishToCloudParameters": {},
            "s3Upload": {"maxEnvelopeSize": 500},
            "mqttConnection": {"endpointUrl": "", "clientId": ""}
        }
    }"#;

    fn configs(ids: &[&str]) -> BTreeMap<String, String> {
        ids.iter()
            .map(|id| (id.to_string(), CONFIG.to_string()))
            .collect()
    }

    fn parse(json: &str) -> Value {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_mqtt_connection_is_per_vehicle() {
        let composer = ConfigComposer::new("prod", "us-east-1");
        let composed = composer
            .apply_mqtt_connection(&configs(&["car1", "car2"]), "data.endpoint")
            .unwrap();

        for id in ["car1", "car2"] {
            let mqtt = &parse(&composed[id])["staticConfig"]["mqttConnection"];
            assert_eq!(mqtt["connectionType"], "iotCore");
            assert_eq!(mqtt["endpointUrl"], "data.endpoint");
            assert_eq!(mqtt["clientId"], id);
            assert_eq!(
                mqtt["checkinTopic"],
                format!("$aws/iotfleetwise/vehicles/{}/checkins", id)
            );
            assert_eq!(
                mqtt["canDataTopic"],
                format!("$aws/iotfleetwise/vehicles/{}/signals", id)
            );
            assert_eq!(
                mqtt["certificateFilename"],
                format!("/etc/aws-iot-fleetwise/{}/cert.crt", id)
            );
            assert_eq!(
                mqtt["privateKeyFilename"],
                format!("/etc/aws-iot-fleetwise/{}/pri.key", id)
            );
        }
    }

    #[test]
    fn test_credentials_provider_sets_upload_limits() {
        let composer = ConfigComposer::new("prod", "us-east-1");
        let composed = composer
            .apply_credentials_provider(&configs(&["car1"]), "alias", "creds.endpoint")
            .unwrap();

        let static_config = &parse(&composed["car1"])["staticConfig"];
        assert_eq!(
            static_config["credentialsProvider"],
            json!({"endpointUrl": "creds.endpoint", "roleAlias": "alias"})
        );
        assert_eq!(
            static_config["s3Upload"],
            json!({"maxEnvelopeSize": 104857600, "multipartSize": 5242880, "maxConnections": 10})
        );
    }

    #[test]
    fn test_composition_preserves_unrelated_fields() {
        let composer = ConfigComposer::new("gamma", "us-west-2");
        let mut input = configs(&["car1"]);
        let mut document = parse(CONFIG);
        document["unknownTopLevel"] = json!({"kept": true});
        input.insert("car1".to_string(), document.to_string());

        let composed = composer
            .apply_credentials_provider(&input, "alias", "creds.endpoint")
            .and_then(|configs| composer.apply_mqtt_connection(&configs, "data.endpoint"))
            .unwrap();

        let output = parse(&composed["car1"]);
        assert_eq!(output["unknownTopLevel"], json!({"kept": true}));
        assert_eq!(
            output["staticConfig"]["internalParameters"],
            json!({"maximumAwsSdkHeapMemoryBytes": 10000000})
        );
        assert_eq!(output["staticConfig"]["credentialsProvider"]["roleAlias"], "alias");
        assert_eq!(
            output["staticConfig"]["mqttConnection"]["collectionSchemeListTopic"],
            "$aws/iotfleetwise/gamma-us-west-2/vehicles/car1/collection_schemes"
        );
    }

    #[test]
    fn test_unparsable_document_names_vehicle() {
        let composer = ConfigComposer::new("prod", "us-east-1");
        let mut input = configs(&["car1"]);
        input.insert("car2".to_string(), "{not json".to_string());

        let err = composer
            .apply_mqtt_connection(&input, "data.endpoint")
            .unwrap_err();

        match err {
            ComposeError::InvalidDocument { vehicle_id, .. } => assert_eq!(vehicle_id, "car2"),
        }
    }
}
