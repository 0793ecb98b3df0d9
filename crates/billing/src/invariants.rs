//! Billing Invariants Module
//!
//! Runnable consistency checks for the subscription core. These can be run
//! after any mutation or webhook replay to confirm the system is in a valid
//! state.
//!
//! ## Design Principles
//!
//! 1. **Executable**: Each invariant is a real SQL query that can be run
//! 2. **Explanatory**: Violations include enough context to debug
//! 3. **Non-destructive**: Checks only read, never write

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Tenant(s) affected
    pub tenant_ids: Vec<Uuid>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    /// Severity level
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - access decisions may be wrong right now
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
    /// Low - minor inconsistency, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct SuspensionMismatchRow {
    tenant_id: Uuid,
    status: String,
    suspended: bool,
    suspended_reason: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct PeriodRow {
    tenant_id: Uuid,
    current_period_start: OffsetDateTime,
    current_period_end: OffsetDateTime,
}

#[derive(Debug, sqlx::FromRow)]
struct TrialRow {
    tenant_id: Uuid,
    trial_start: Option<OffsetDateTime>,
    trial_end: Option<OffsetDateTime>,
}

#[derive(Debug, sqlx::FromRow)]
struct MultipleSubsRow {
    tenant_id: Uuid,
    sub_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct MissingGraceRow {
    tenant_id: Uuid,
}

#[derive(Debug, sqlx::FromRow)]
struct UnknownPlanRow {
    tenant_id: Uuid,
    plan_slug: String,
}

/// Service for running billing invariant checks
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_suspension_matches_status().await?);
        violations.extend(self.check_period_boundaries_ordered().await?);
        violations.extend(self.check_trial_boundaries_ordered().await?);
        violations.extend(self.check_single_subscription_per_tenant().await?);
        violations.extend(self.check_past_due_has_grace_clock().await?);
        violations.extend(self.check_plan_slug_resolves().await?);

        let checks_run = 6;
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: tenant.suspended == true exactly when the subscription is
    /// SUSPENDED or CANCELLED.
    ///
    /// A mismatch means a tenant is wrongly blocked, or wrongly online.
    async fn check_suspension_matches_status(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<SuspensionMismatchRow> = sqlx::query_as(
            r#"
            SELECT t.id as tenant_id, s.status, t.suspended, t.suspended_reason
            FROM tenants t
            JOIN subscriptions s ON s.tenant_id = t.id
            WHERE t.suspended != (s.status IN ('suspended', 'cancelled'))
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "suspension_matches_status".to_string(),
                tenant_ids: vec![row.tenant_id],
                description: format!(
                    "Tenant suspended={} but subscription status is '{}'",
                    row.suspended, row.status
                ),
                context: serde_json::json!({
                    "status": row.status,
                    "suspended": row.suspended,
                    "suspended_reason": row.suspended_reason,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 2: current_period_end > current_period_start.
    async fn check_period_boundaries_ordered(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<PeriodRow> = sqlx::query_as(
            r#"
            SELECT tenant_id, current_period_start, current_period_end
            FROM subscriptions
            WHERE current_period_end <= current_period_start
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "period_boundaries_ordered".to_string(),
                tenant_ids: vec![row.tenant_id],
                description: "Billing period ends before it starts".to_string(),
                context: serde_json::json!({
                    "current_period_start": row.current_period_start.to_string(),
                    "current_period_end": row.current_period_end.to_string(),
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 3: trial_end > trial_start whenever both are present.
    async fn check_trial_boundaries_ordered(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<TrialRow> = sqlx::query_as(
            r#"
            SELECT tenant_id, trial_start, trial_end
            FROM subscriptions
            WHERE trial_start IS NOT NULL
              AND trial_end IS NOT NULL
              AND trial_end <= trial_start
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "trial_boundaries_ordered".to_string(),
                tenant_ids: vec![row.tenant_id],
                description: "Trial window ends before it starts".to_string(),
                context: serde_json::json!({
                    "trial_start": row.trial_start.map(|t| t.to_string()),
                    "trial_end": row.trial_end.map(|t| t.to_string()),
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 4: exactly one subscription row per tenant.
    async fn check_single_subscription_per_tenant(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<MultipleSubsRow> = sqlx::query_as(
            r#"
            SELECT tenant_id, COUNT(*) as sub_count
            FROM subscriptions
            GROUP BY tenant_id
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "single_subscription_per_tenant".to_string(),
                tenant_ids: vec![row.tenant_id],
                description: format!(
                    "Tenant has {} subscription rows (expected 1)",
                    row.sub_count
                ),
                context: serde_json::json!({
                    "subscription_count": row.sub_count,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 5: PAST_DUE records carry a grace clock, otherwise the
    /// suspension deadline cannot be computed.
    async fn check_past_due_has_grace_clock(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<MissingGraceRow> = sqlx::query_as(
            r#"
            SELECT tenant_id
            FROM subscriptions
            WHERE status = 'past_due'
              AND grace_started_at IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "past_due_has_grace_clock".to_string(),
                tenant_ids: vec![row.tenant_id],
                description: "PAST_DUE subscription has no grace clock".to_string(),
                context: serde_json::json!({}),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Invariant 6: every subscription's plan slug resolves to a plan row.
    /// Plans are soft-deactivated, never deleted, so this should never fire.
    async fn check_plan_slug_resolves(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<UnknownPlanRow> = sqlx::query_as(
            r#"
            SELECT s.tenant_id, s.plan_slug
            FROM subscriptions s
            LEFT JOIN plans p ON p.slug = s.plan_slug
            WHERE p.slug IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "plan_slug_resolves".to_string(),
                tenant_ids: vec![row.tenant_id],
                description: format!("Subscription references unknown plan '{}'", row.plan_slug),
                context: serde_json::json!({
                    "plan_slug": row.plan_slug,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            "suspension_matches_status" => self.check_suspension_matches_status().await,
            "period_boundaries_ordered" => self.check_period_boundaries_ordered().await,
            "trial_boundaries_ordered" => self.check_trial_boundaries_ordered().await,
            "single_subscription_per_tenant" => self.check_single_subscription_per_tenant().await,
            "past_due_has_grace_clock" => self.check_past_due_has_grace_clock().await,
            "plan_slug_resolves" => self.check_plan_slug_resolves().await,
            _ => Ok(vec![]),
        }
    }

    /// Get list of all available invariant checks
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "suspension_matches_status",
            "period_boundaries_ordered",
            "trial_boundaries_ordered",
            "single_subscription_per_tenant",
            "past_due_has_grace_clock",
            "plan_slug_resolves",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_severity_display() {
        assert_eq!(ViolationSeverity::Critical.to_string(), "CRITICAL");
        assert_eq!(ViolationSeverity::High.to_string(), "HIGH");
        assert_eq!(ViolationSeverity::Medium.to_string(), "MEDIUM");
        assert_eq!(ViolationSeverity::Low.to_string(), "LOW");
    }

    #[test]
    fn test_available_checks() {
        let checks = InvariantChecker::available_checks();
        assert_eq!(checks.len(), 6);
        assert!(checks.contains(&"suspension_matches_status"));
        assert!(checks.contains(&"single_subscription_per_tenant"));
    }
}
