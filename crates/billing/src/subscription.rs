//! Subscription records and persistence
//!
//! One subscription per tenant, created at signup and never deleted:
//! cancellation is a terminal status, not a row deletion, so billing history
//! stays auditable. All mutation goes through the state machine's decisions;
//! this module only loads, locks, and persists.

use slotwise_shared::types::{SubscriptionStatus, TenantId};
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::catalog::Plan;
use crate::error::{BillingError, BillingResult};
use crate::state_machine::{self, Decision, SideEffect};

/// The persisted state of one tenant's subscription
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, serde::Serialize)]
pub struct SubscriptionRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub plan_slug: String,
    pub status: SubscriptionStatus,
    pub current_period_start: OffsetDateTime,
    pub current_period_end: OffsetDateTime,
    pub trial_start: Option<OffsetDateTime>,
    pub trial_end: Option<OffsetDateTime>,
    pub trial_consumed: bool,
    pub external_customer_id: Option<String>,
    pub external_subscription_id: Option<String>,
    pub cancel_at_period_end: bool,
    pub grace_started_at: Option<OffsetDateTime>,
    pub last_payment_error: Option<String>,
    pub last_payment_error_at: Option<OffsetDateTime>,
    /// High-water mark of provider event timestamps applied to this record.
    /// Events at or below this mark are stale and dropped.
    pub last_event_at: Option<OffsetDateTime>,
    /// Wall-clock time of the last reconciler write. The sweeper no-ops when
    /// this is newer than its own snapshot read.
    pub last_reconciled_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl SubscriptionRecord {
    /// Check the stored-data invariants.
    ///
    /// A violation is fatal for this record: callers log loudly and leave the
    /// row untouched rather than guessing a fix.
    pub fn validate(&self) -> BillingResult<()> {
        if self.current_period_end <= self.current_period_start {
            return Err(BillingError::InvalidRecord {
                tenant_id: self.tenant_id.to_string(),
                reason: "current_period_end must be after current_period_start".to_string(),
            });
        }
        if let (Some(start), Some(end)) = (self.trial_start, self.trial_end) {
            if end <= start {
                return Err(BillingError::InvalidRecord {
                    tenant_id: self.tenant_id.to_string(),
                    reason: "trial_end must be after trial_start".to_string(),
                });
            }
        }
        Ok(())
    }
}

const RECORD_COLUMNS: &str = r#"
    id, tenant_id, plan_slug, status,
    current_period_start, current_period_end,
    trial_start, trial_end, trial_consumed,
    external_customer_id, external_subscription_id,
    cancel_at_period_end, grace_started_at,
    last_payment_error, last_payment_error_at,
    last_event_at, last_reconciled_at,
    created_at, updated_at
"#;

/// Persistence layer for subscription records and tenant suspension flags
#[derive(Clone)]
pub struct SubscriptionStore {
    pool: PgPool,
}

impl SubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the subscription at tenant signup: TRIALING with the plan's
    /// default trial window.
    pub async fn create_for_tenant(
        &self,
        tenant_id: TenantId,
        plan: &Plan,
        now: OffsetDateTime,
    ) -> BillingResult<SubscriptionRecord> {
        // A zero-day trial plan starts on a full billing period instead of a
        // degenerate trial window.
        let (trial_start, trial_end, period_end) = if plan.trial_days > 0 {
            let trial_end = now + time::Duration::days(plan.trial_days);
            (Some(now), Some(trial_end), trial_end)
        } else {
            (None, None, state_machine::add_one_month(now))
        };

        let record: SubscriptionRecord = sqlx::query_as(&format!(
            r#"
            INSERT INTO subscriptions (
                id, tenant_id, plan_slug, status,
                current_period_start, current_period_end,
                trial_start, trial_end, trial_consumed,
                cancel_at_period_end, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, false, false, $9, $9)
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(tenant_id.0)
        .bind(&plan.slug)
        .bind(SubscriptionStatus::Trialing)
        .bind(now)
        .bind(period_end)
        .bind(trial_start)
        .bind(trial_end)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            tenant_id = %tenant_id,
            plan = %plan.slug,
            trial_end = ?trial_end,
            "Subscription created at signup"
        );

        Ok(record)
    }

    pub async fn get_by_tenant(
        &self,
        tenant_id: TenantId,
    ) -> BillingResult<Option<SubscriptionRecord>> {
        let record = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM subscriptions WHERE tenant_id = $1"
        ))
        .bind(tenant_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Load a record with a row lock. All mutation of a single subscription,
    /// whether from the reconciler or the sweeper, goes through this lock so
    /// concurrent writers serialize per tenant.
    pub async fn lock_by_tenant(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: TenantId,
    ) -> BillingResult<Option<SubscriptionRecord>> {
        let record = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM subscriptions WHERE tenant_id = $1 FOR UPDATE"
        ))
        .bind(tenant_id.0)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(record)
    }

    pub async fn lock_by_external_subscription(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        external_subscription_id: &str,
    ) -> BillingResult<Option<SubscriptionRecord>> {
        let record = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM subscriptions WHERE external_subscription_id = $1 FOR UPDATE"
        ))
        .bind(external_subscription_id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(record)
    }

    /// Fallback lookup for the very first provider event, before the local
    /// record has an external subscription id: match by customer id, then by
    /// tenant contact email.
    pub async fn lock_by_customer_fallback(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        external_customer_id: &str,
        customer_email: Option<&str>,
    ) -> BillingResult<Option<SubscriptionRecord>> {
        let record: Option<SubscriptionRecord> = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM subscriptions WHERE external_customer_id = $1 FOR UPDATE"
        ))
        .bind(external_customer_id)
        .fetch_optional(&mut **tx)
        .await?;

        if record.is_some() {
            return Ok(record);
        }

        let Some(email) = customer_email else {
            return Ok(None);
        };

        let record = sqlx::query_as(&format!(
            r#"
            SELECT {RECORD_COLUMNS} FROM subscriptions
            WHERE external_subscription_id IS NULL
              AND tenant_id = (SELECT id FROM tenants WHERE contact_email = $1)
            FOR UPDATE
            "#
        ))
        .bind(email)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(record)
    }

    /// Attach provider identifiers learned from the first event.
    pub async fn attach_external_ids(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        external_customer_id: Option<&str>,
        external_subscription_id: Option<&str>,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE subscriptions
            SET external_customer_id = COALESCE(external_customer_id, $2),
                external_subscription_id = COALESCE(external_subscription_id, $3),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(external_customer_id)
        .bind(external_subscription_id)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Write back every mutable field of a record.
    pub async fn persist(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        record: &SubscriptionRecord,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE subscriptions
            SET plan_slug = $2,
                status = $3,
                current_period_start = $4,
                current_period_end = $5,
                trial_start = $6,
                trial_end = $7,
                trial_consumed = $8,
                cancel_at_period_end = $9,
                grace_started_at = $10,
                last_payment_error = $11,
                last_payment_error_at = $12,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(&record.plan_slug)
        .bind(record.status)
        .bind(record.current_period_start)
        .bind(record.current_period_end)
        .bind(record.trial_start)
        .bind(record.trial_end)
        .bind(record.trial_consumed)
        .bind(record.cancel_at_period_end)
        .bind(record.grace_started_at)
        .bind(&record.last_payment_error)
        .bind(record.last_payment_error_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Bump the reconciliation watermarks after applying a provider event.
    pub async fn mark_reconciled(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        event_occurred_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE subscriptions
            SET last_event_at = GREATEST(COALESCE(last_event_at, $2), $2),
                last_reconciled_at = $3,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(event_occurred_at)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// The state machine and the gate are the only writers of the tenant
    /// suspension flag.
    pub async fn set_tenant_suspension(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: TenantId,
        suspended: bool,
        reason: Option<&str>,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE tenants
            SET suspended = $2, suspended_reason = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(tenant_id.0)
        .bind(suspended)
        .bind(reason)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Persist a state-machine decision: the record itself plus the tenant
    /// suspension effects, all inside the caller's transaction so status and
    /// the suspended flag can never disagree. Notification effects are NOT
    /// handled here; callers enqueue them after commit, fire-and-forget.
    pub async fn commit_decision(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        decision: &Decision,
    ) -> BillingResult<()> {
        self.persist(tx, &decision.record).await?;

        let tenant_id = TenantId(decision.record.tenant_id);
        for effect in &decision.effects {
            match effect {
                SideEffect::SuspendTenant { reason } => {
                    self.set_tenant_suspension(tx, tenant_id, true, Some(reason))
                        .await?;
                }
                SideEffect::UnsuspendTenant => {
                    self.set_tenant_suspension(tx, tenant_id, false, None).await?;
                }
                SideEffect::Notify(_) => {}
            }
        }

        Ok(())
    }

    /// User-driven cancel/resume: flip `cancel_at_period_end`. The actual
    /// CANCELLED transition happens at the period boundary via the sweeper.
    pub async fn set_cancel_at_period_end(
        &self,
        tenant_id: TenantId,
        cancel: bool,
    ) -> BillingResult<SubscriptionRecord> {
        let mut tx = self.pool.begin().await?;

        let Some(mut record) = self.lock_by_tenant(&mut tx, tenant_id).await? else {
            return Err(BillingError::SubscriptionNotFound(tenant_id.to_string()));
        };

        if record.status.is_terminal() {
            return Err(BillingError::InvalidInput(
                "subscription is already cancelled".to_string(),
            ));
        }

        record.cancel_at_period_end = cancel;
        self.persist(&mut tx, &record).await?;
        tx.commit().await?;

        tracing::info!(
            tenant_id = %tenant_id,
            cancel_at_period_end = cancel,
            "Cancellation flag updated"
        );

        Ok(record)
    }

    /// Re-point the subscription at a new plan. The old plan row is
    /// untouched; entitlements snapshot forward from the new slug.
    pub async fn change_plan(
        &self,
        tenant_id: TenantId,
        plan: &Plan,
    ) -> BillingResult<SubscriptionRecord> {
        let mut tx = self.pool.begin().await?;

        let Some(mut record) = self.lock_by_tenant(&mut tx, tenant_id).await? else {
            return Err(BillingError::SubscriptionNotFound(tenant_id.to_string()));
        };

        if record.status.is_terminal() {
            return Err(BillingError::InvalidInput(
                "cannot change plan on a cancelled subscription".to_string(),
            ));
        }

        record.plan_slug = plan.slug.clone();
        self.persist(&mut tx, &record).await?;
        tx.commit().await?;

        tracing::info!(tenant_id = %tenant_id, plan = %plan.slug, "Plan changed");

        Ok(record)
    }

    /// Explicit new checkout after cancellation, the only exit from the
    /// terminal status. Returns the restarted record and its side effects.
    pub async fn restart_after_checkout(
        &self,
        tenant_id: TenantId,
        plan: &Plan,
        now: OffsetDateTime,
    ) -> BillingResult<Decision> {
        let mut tx = self.pool.begin().await?;

        let Some(record) = self.lock_by_tenant(&mut tx, tenant_id).await? else {
            return Err(BillingError::SubscriptionNotFound(tenant_id.to_string()));
        };

        if record.status != SubscriptionStatus::Cancelled {
            return Err(BillingError::InvalidInput(format!(
                "new checkout requires a cancelled subscription, found {}",
                record.status
            )));
        }

        let decision = state_machine::restart_for_checkout(&record, plan, now);
        self.commit_decision(&mut tx, &decision).await?;
        tx.commit().await?;

        tracing::info!(
            tenant_id = %tenant_id,
            plan = %plan.slug,
            status = %decision.record.status,
            "Subscription restarted after checkout"
        );

        Ok(decision)
    }

    /// Tenants whose subscriptions the sweeper must re-evaluate.
    pub async fn list_non_terminal_tenants(&self) -> BillingResult<Vec<TenantId>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT tenant_id FROM subscriptions WHERE status != 'cancelled' ORDER BY tenant_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| TenantId(id)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_record(status: SubscriptionStatus, now: OffsetDateTime) -> SubscriptionRecord {
        SubscriptionRecord {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            plan_slug: "starter".to_string(),
            status,
            current_period_start: now,
            current_period_end: now + time::Duration::days(7),
            trial_start: Some(now),
            trial_end: Some(now + time::Duration::days(7)),
            trial_consumed: false,
            external_customer_id: None,
            external_subscription_id: None,
            cancel_at_period_end: false,
            grace_started_at: None,
            last_payment_error: None,
            last_payment_error_at: None,
            last_event_at: None,
            last_reconciled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_validate_accepts_well_formed_record() {
        let now = OffsetDateTime::UNIX_EPOCH;
        assert!(test_record(SubscriptionStatus::Trialing, now).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_period() {
        let now = OffsetDateTime::UNIX_EPOCH;
        let mut record = test_record(SubscriptionStatus::Active, now);
        record.current_period_end = record.current_period_start;
        assert!(matches!(
            record.validate(),
            Err(BillingError::InvalidRecord { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_inverted_trial() {
        let now = OffsetDateTime::UNIX_EPOCH;
        let mut record = test_record(SubscriptionStatus::Trialing, now);
        record.trial_end = Some(now - time::Duration::days(1));
        assert!(record.validate().is_err());
    }
}
