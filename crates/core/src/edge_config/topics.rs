/// Topic names a vehicle's worker publishes and subscribes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    prefix: String,
}

impl Topics {
    /// Production uses the bare prefix; other stages are namespaced by stage
    /// and region.
    pub fn new(stage: &str, region: &str, vehicle_id: &str) -> Self {
        let prefix = if stage == "prod" {
            format!("$aws/iotfleetwise/vehicles/{}", vehicle_id)
        } else {
            format!("$aws/iotfleetwise/{}-{}/vehicles/{}", stage, region, vehicle_id)
        };
        Self { prefix }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn checkins(&self) -> String {
        format!("{}/checkins", self.prefix)
    }

    pub fn signals(&self) -> String {
        format!("{}/signals", self.prefix)
    }

    pub fn collection_schemes(&self) -> String {
        format!("{}/collection_schemes", self.prefix)
    }

    pub fn decoder_manifests(&self) -> String {
        format!("{}/decoder_manifests", self.prefix)
    }
}
