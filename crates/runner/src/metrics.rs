//! Prometheus registry for the runner process.
//!
//! The counters themselves live in `fleetsim_core::metrics`; the runner only
//! owns the registry and dumps it once the job finishes.

use once_cell::sync::Lazy;
use prometheus::{Encoder, Registry, TextEncoder};
use tracing::warn;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    for collector in fleetsim_core::metrics::all_metrics() {
        if let Err(e) = registry.register(collector) {
            warn!("Failed to register metric: {}", e);
        }
    }
    registry
});

/// Encode all metrics in Prometheus text format.
pub fn encode_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
