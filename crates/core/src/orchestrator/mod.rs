//! Fleet orchestrator.
//!
//! Sequences identity provisioning, certificate issuance, config composition
//! and task launch into the four fleet operations: pre-launch, launch, stop
//! and clean. Nothing is persisted between calls; callers keep the returned
//! outcomes and decide on dependent steps themselves.

mod fleet;
mod types;

pub use fleet::{FleetOrchestrator, FleetServices};
pub use types::{CleanRequest, OrchestratorError, PreLaunchRequest};
