pub mod checking;
mod cli;
pub mod core;
pub mod schemas;
pub mod services;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use anyhow::Context;

use crate::checking::{CheckRequest, CheckingOrchestrator};
use crate::core::{config::Settings, redis::RedisHandle, telemetry};
use crate::schemas::checking::TaskContext;

/// Checks one photo described by the command line and prints the result as
/// JSON on stdout.
pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args = cli::parse_args(std::env::args().skip(1))?;

    let settings = Settings::load()?;
    telemetry::init_tracing(settings.telemetry())?;
    core::metrics::init(settings.telemetry())?;

    let photo = tokio::fs::read(&args.photo)
        .await
        .with_context(|| format!("Failed to read {}", args.photo.display()))?;

    let redis = RedisHandle::new(settings.redis().redis_url());
    if let Err(err) = redis.connect().await {
        tracing::error!(error = %err, "Failed to connect to Redis; continuing without cache");
    } else {
        tracing::info!(health = ?redis.health().await, "Redis connected successfully");
    }

    let orchestrator = CheckingOrchestrator::from_settings(&settings, Arc::new(redis.clone()))?;

    tracing::info!(
        environment = %settings.runtime().environment.as_str(),
        quality = args.quality.as_str(),
        user_id = %args.user_id,
        "Checking photo"
    );

    let result = orchestrator
        .check(CheckRequest {
            photo,
            task: TaskContext {
                description: args.task,
                task_type: args.task_type,
                checking_criteria: args.criteria,
            },
            user_id: args.user_id,
            quality: args.quality,
            bypass_cache: args.no_cache,
        })
        .await;

    println!("{}", serde_json::to_string_pretty(&result)?);

    if let Some(rendered) = core::metrics::render() {
        tracing::debug!(metrics = %rendered, "Metrics snapshot");
    }

    redis.disconnect().await;
    tracing::info!("Redis disconnected");

    Ok(())
}
