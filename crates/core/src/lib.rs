pub mod batch;
pub mod certificate;
pub mod config;
pub mod edge_config;
pub mod identity;
pub mod metrics;
pub mod orchestrator;
pub mod retry;
pub mod scheduler;
pub mod storage;
pub mod testing;
pub mod vehicle;
pub mod vehicle_model;

pub use certificate::{
    AcmPcaAuthority, CaError, CertificateAuthority, CertificateError, CertificateIssuer,
};
pub use config::{load_config, load_config_from_str, validate_config, Config, ConfigError};
pub use edge_config::{ComposeError, ConfigComposer, EdgeConfig};
pub use identity::{
    AwsIotRegistry, IdentityError, IdentityProvisioner, IdentityRegistry, RegistryError,
    TeardownOutcome,
};
pub use orchestrator::{
    CleanRequest, FleetOrchestrator, FleetServices, OrchestratorError, PreLaunchRequest,
};
pub use retry::RetryPolicy;
pub use scheduler::{
    ContainerScheduler, EcsScheduler, LaunchError, LaunchOptions, SchedulerError, TaskLauncher,
    WaitOptions,
};
pub use storage::{ObjectStore, S3ObjectStore, StorageError};
pub use vehicle::{
    CertificateRequest, FleetOutcome, LaunchRecord, LaunchStatus, StopOutcome, StorageLocation,
    VehicleDescriptor,
};
pub use vehicle_model::{AwsFleetWiseRegistry, ModelError, VehicleModel, VehicleModelRegistry};
