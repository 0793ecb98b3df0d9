//! Periodic subscription sweep
//!
//! Re-evaluates every non-terminal subscription against wall-clock time so
//! trial and grace expiries make forward progress even if a webhook is lost.
//! Tenants are processed independently: one malformed record or slow lookup
//! is collected as a failure and the sweep moves on.
//!
//! Provider-sourced events always win over the sweep. A record the
//! reconciler touched after this sweep's snapshot read is skipped, and the
//! row lock plus clock-only transitions make re-runs after a crash harmless.

use slotwise_shared::types::TenantId;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::error::BillingResult;
use crate::events::{ActorType, BillingEventLogger};
use crate::notify::NotificationOutbox;
use crate::state_machine::{self, StateMachineConfig};
use crate::subscription::SubscriptionStore;

/// Sweep tuning
#[derive(Debug, Clone, Copy)]
pub struct SweepConfig {
    /// Budget for a single tenant's evaluation; timed-out tenants are
    /// retried on the next cycle.
    pub per_tenant_timeout: std::time::Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            per_tenant_timeout: std::time::Duration::from_secs(5),
        }
    }
}

/// What happened to one tenant during a sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SweepOutcome {
    Unchanged,
    Transitioned,
    SkippedRecentReconcile,
}

/// A tenant the sweep could not evaluate
#[derive(Debug, Clone)]
pub struct SweepFailure {
    pub tenant_id: TenantId,
    pub message: String,
}

/// Summary of one full sweep cycle
#[derive(Debug, Clone)]
pub struct SweepReport {
    pub started_at: OffsetDateTime,
    pub evaluated: usize,
    pub transitioned: usize,
    pub skipped_recent_reconcile: usize,
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    pub fn healthy(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The sweeper service
pub struct PeriodicSweeper {
    store: SubscriptionStore,
    outbox: NotificationOutbox,
    event_logger: BillingEventLogger,
    machine_cfg: StateMachineConfig,
    sweep_cfg: SweepConfig,
}

impl PeriodicSweeper {
    pub fn new(pool: PgPool, machine_cfg: StateMachineConfig, sweep_cfg: SweepConfig) -> Self {
        Self {
            store: SubscriptionStore::new(pool.clone()),
            outbox: NotificationOutbox::new(pool.clone()),
            event_logger: BillingEventLogger::new(pool),
            machine_cfg,
            sweep_cfg,
        }
    }

    /// Run one full sweep over every non-terminal subscription.
    /// Only the initial listing can fail the call; per-tenant problems are
    /// collected in the report.
    pub async fn sweep_all(&self) -> BillingResult<SweepReport> {
        let started_at = OffsetDateTime::now_utc();
        let tenants = self.store.list_non_terminal_tenants().await?;

        let mut report = SweepReport {
            started_at,
            evaluated: 0,
            transitioned: 0,
            skipped_recent_reconcile: 0,
            failures: Vec::new(),
        };

        for tenant_id in tenants {
            report.evaluated += 1;

            let outcome = tokio::time::timeout(
                self.sweep_cfg.per_tenant_timeout,
                self.sweep_tenant(tenant_id, started_at),
            )
            .await;

            match outcome {
                Ok(Ok(SweepOutcome::Transitioned)) => report.transitioned += 1,
                Ok(Ok(SweepOutcome::SkippedRecentReconcile)) => {
                    report.skipped_recent_reconcile += 1
                }
                Ok(Ok(SweepOutcome::Unchanged)) => {}
                Ok(Err(e)) => {
                    tracing::error!(tenant_id = %tenant_id, error = %e, "Sweep failed for tenant");
                    report.failures.push(SweepFailure {
                        tenant_id,
                        message: e.to_string(),
                    });
                }
                Err(_) => {
                    tracing::warn!(tenant_id = %tenant_id, "Sweep timed out for tenant, will retry next cycle");
                    report.failures.push(SweepFailure {
                        tenant_id,
                        message: "per-tenant timeout exceeded".to_string(),
                    });
                }
            }
        }

        tracing::info!(
            evaluated = report.evaluated,
            transitioned = report.transitioned,
            skipped = report.skipped_recent_reconcile,
            failures = report.failures.len(),
            "Sweep cycle complete"
        );

        Ok(report)
    }

    async fn sweep_tenant(
        &self,
        tenant_id: TenantId,
        snapshot_at: OffsetDateTime,
    ) -> BillingResult<SweepOutcome> {
        let mut tx = self.store.pool().begin().await?;

        let Some(record) = self.store.lock_by_tenant(&mut tx, tenant_id).await? else {
            return Ok(SweepOutcome::Unchanged);
        };

        // The reconciler got here after our snapshot read: its word is
        // provider truth, the clock defers.
        if let Some(reconciled_at) = record.last_reconciled_at {
            if reconciled_at > snapshot_at {
                return Ok(SweepOutcome::SkippedRecentReconcile);
            }
        }

        record.validate().map_err(|e| {
            tracing::error!(
                tenant_id = %tenant_id,
                error = %e,
                "Record fails invariants, skipped without changes"
            );
            e
        })?;

        let now = OffsetDateTime::now_utc();
        let before = record.status;
        let decision = state_machine::evaluate_clock(&record, now, &self.machine_cfg);

        if !decision.changed {
            return Ok(SweepOutcome::Unchanged);
        }

        self.store.commit_decision(&mut tx, &decision).await?;
        tx.commit().await?;

        if decision.record.status != before {
            tracing::info!(
                tenant_id = %tenant_id,
                from = %before,
                to = %decision.record.status,
                "Sweep applied wall-clock transition"
            );

            if let Err(e) = self
                .event_logger
                .log_status_change(
                    tenant_id,
                    &before.to_string(),
                    &decision.record.status.to_string(),
                    ActorType::System,
                    None,
                )
                .await
            {
                tracing::warn!(error = %e, "Failed to log sweep transition event");
            }
        }

        self.outbox.enqueue_effects(tenant_id, &decision.effects).await;

        Ok(SweepOutcome::Transitioned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_health() {
        let report = SweepReport {
            started_at: OffsetDateTime::UNIX_EPOCH,
            evaluated: 10,
            transitioned: 2,
            skipped_recent_reconcile: 1,
            failures: Vec::new(),
        };
        assert!(report.healthy());

        let mut failing = report.clone();
        failing.failures.push(SweepFailure {
            tenant_id: TenantId::new(),
            message: "boom".to_string(),
        });
        assert!(!failing.healthy());
    }
}
