mod job;
mod metrics;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fleetsim_core::{
    load_config, validate_config, AcmPcaAuthority, AwsFleetWiseRegistry, AwsIotRegistry, Config,
    EcsScheduler, FleetOrchestrator, FleetServices, LaunchOptions, S3ObjectStore, WaitOptions,
};

use job::{CleanReport, Job, LaunchReport};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("fleetsim v{}", VERSION);

    let config_path = std::env::var("FLEETSIM_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("fleetsim.toml"));

    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Configuration validation failed")?;
    info!(
        region = %config.aws.region,
        stage = %config.aws.stage,
        cluster = %config.scheduler.cluster_name(),
        "Configuration loaded successfully"
    );

    let job_path = std::env::var("FLEETSIM_JOB")
        .map(PathBuf::from)
        .context("FLEETSIM_JOB must name a job document")?;
    let job = Job::from_file(&job_path)?;

    let orchestrator = build_orchestrator(&config).await;
    let result = execute(&orchestrator, &config, job).await;

    if let Ok(path) = std::env::var("FLEETSIM_METRICS_FILE") {
        match metrics::encode_metrics() {
            Ok(text) => {
                if let Err(e) = std::fs::write(&path, text) {
                    warn!("Failed to write metrics to {}: {}", path, e);
                }
            }
            Err(e) => warn!("Failed to encode metrics: {}", e),
        }
    }

    result
}

/// Wires AWS-backed services into an orchestrator.
async fn build_orchestrator(config: &Config) -> FleetOrchestrator {
    let sdk_config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.aws.region.clone()))
        .load()
        .await;

    let services = FleetServices {
        registry: Arc::new(AwsIotRegistry::new(
            aws_sdk_iot::Client::new(&sdk_config),
            aws_sdk_iam::Client::new(&sdk_config),
        )),
        authority: Arc::new(AcmPcaAuthority::new(aws_sdk_acmpca::Client::new(
            &sdk_config,
        ))),
        scheduler: Arc::new(EcsScheduler::new(
            aws_sdk_ecs::Client::new(&sdk_config),
            config.scheduler.cluster_name(),
            config.scheduler.container_name(),
        )),
        store: Arc::new(S3ObjectStore::new(aws_sdk_s3::Client::new(&sdk_config))),
        vehicle_models: Some(Arc::new(AwsFleetWiseRegistry::new(
            aws_sdk_iotfleetwise::Client::new(&sdk_config),
        ))),
    };

    FleetOrchestrator::new(services, config)
}

async fn execute(orchestrator: &FleetOrchestrator, config: &Config, job: Job) -> Result<()> {
    match job {
        Job::Launch(job) => {
            let outcome = orchestrator
                .pre_launch(&job.pre_launch_request())
                .await
                .context("Provisioning failed")?;
            if !outcome.failed.is_empty() {
                print_json(&LaunchReport {
                    provisioning: outcome.clone(),
                    launched: Vec::new(),
                })?;
                bail!(
                    "{} vehicle(s) failed provisioning, not launching",
                    outcome.failed.len()
                );
            }

            let options = LaunchOptions::from_config(&config.scheduler, job.tags.clone());
            let launched = orchestrator
                .launch_vehicles(&job.provisioned(&outcome), &options)
                .await
                .context("Launch failed")?;
            info!(launched = launched.len(), "Launch complete");
            print_json(&LaunchReport {
                provisioning: outcome,
                launched,
            })
        }
        Job::Stop(job) => {
            let wait = WaitOptions::from(&config.scheduler);
            let outcome = orchestrator.stop_vehicles(&job.task_arns, &wait).await;
            if !outcome.still_pending.is_empty() {
                warn!(
                    pending = outcome.still_pending.len(),
                    "Some tasks did not reach STOPPED"
                );
            }
            print_json(&outcome)
        }
        Job::Clean(job) => {
            let teardown = orchestrator
                .clean(&job.clean_request())
                .await
                .context("Clean failed")?;
            print_json(&CleanReport::from(teardown))
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
