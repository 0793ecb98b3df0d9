//! Slotwise background worker
//!
//! Runs the periodic subscription sweep (hourly, plus once at startup) and
//! drains the notification outbox. The sweep guarantees forward progress on
//! wall-clock transitions even when provider webhooks are lost.

mod notifier;

use std::sync::Arc;

use anyhow::Context;
use slotwise_billing::{PeriodicSweeper, StateMachineConfig, SweepConfig, DEFAULT_GRACE_PERIOD_DAYS};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Hourly, at minute 7 so sweeps do not pile onto the top of the hour
const SWEEP_SCHEDULE: &str = "0 7 * * * *";
/// Outbox drain cadence
const NOTIFY_SCHEDULE: &str = "30 * * * * *";
/// Daily maintenance
const CLEANUP_SCHEDULE: &str = "0 45 3 * * *";

const NOTIFICATION_RETENTION_DAYS: i32 = 30;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let notify_sink_url = std::env::var("NOTIFY_SINK_URL").ok();

    let grace_period_days = std::env::var("GRACE_PERIOD_DAYS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_GRACE_PERIOD_DAYS);

    let pool = slotwise_shared::db::create_pool(&database_url)
        .await
        .context("Failed to connect to database")?;

    let machine_cfg = StateMachineConfig { grace_period_days };
    let sweeper = Arc::new(PeriodicSweeper::new(
        pool.clone(),
        machine_cfg,
        SweepConfig::default(),
    ));

    // One sweep at process start: a restart must never delay trial or grace
    // expiries by a full interval.
    match sweeper.sweep_all().await {
        Ok(report) => {
            tracing::info!(
                evaluated = report.evaluated,
                transitioned = report.transitioned,
                failures = report.failures.len(),
                "Startup sweep complete"
            );
        }
        Err(e) => {
            tracing::error!(error = %e, "Startup sweep failed");
        }
    }

    let scheduler = JobScheduler::new().await.context("Failed to create scheduler")?;

    let sweep_job = {
        let sweeper = sweeper.clone();
        Job::new_async(SWEEP_SCHEDULE, move |_uuid, _lock| {
            let sweeper = sweeper.clone();
            Box::pin(async move {
                if let Err(e) = sweeper.sweep_all().await {
                    tracing::error!(error = %e, "Scheduled sweep failed");
                }
            })
        })
        .context("Invalid sweep schedule")?
    };
    scheduler.add(sweep_job).await.context("Failed to add sweep job")?;

    if let Some(sink_url) = notify_sink_url {
        let http_client = reqwest::Client::new();
        let notify_pool = pool.clone();
        let notify_job = Job::new_async(NOTIFY_SCHEDULE, move |_uuid, _lock| {
            let pool = notify_pool.clone();
            let client = http_client.clone();
            let sink_url = sink_url.clone();
            Box::pin(async move {
                notifier::process_notification_outbox(&pool, &client, &sink_url).await;
            })
        })
        .context("Invalid notify schedule")?;
        scheduler.add(notify_job).await.context("Failed to add notify job")?;
    } else {
        tracing::warn!("NOTIFY_SINK_URL not set; notifications stay queued in the outbox");
    }

    let cleanup_pool = pool.clone();
    let cleanup_job = Job::new_async(CLEANUP_SCHEDULE, move |_uuid, _lock| {
        let pool = cleanup_pool.clone();
        Box::pin(async move {
            notifier::cleanup_old_notifications(&pool, NOTIFICATION_RETENTION_DAYS).await;
        })
    })
    .context("Invalid cleanup schedule")?;
    scheduler.add(cleanup_job).await.context("Failed to add cleanup job")?;

    scheduler.start().await.context("Failed to start scheduler")?;

    tracing::info!("Slotwise worker running");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    tracing::info!("Shutdown signal received, stopping worker");

    Ok(())
}
