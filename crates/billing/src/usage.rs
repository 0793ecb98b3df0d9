//! Usage counters
//!
//! Per-tenant, per-resource, per-billing-period counters. Rows are created
//! lazily on first use within a period and keyed by the subscription's
//! period start, so a period advance naturally rolls over to a fresh row.
//!
//! The reserve path is the one hot, highly concurrent write in the core: a
//! single conditional `INSERT .. ON CONFLICT .. RETURNING` statement does the
//! compare-and-increment so two requests can never both take the last slot.

use slotwise_shared::types::{Limit, ResourceKind, TenantId};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Result of an atomic reserve attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveResult {
    /// Counter incremented; new count included
    Reserved { count: i64 },
    /// Increment would exceed the limit; counter untouched
    LimitExceeded { count: i64 },
}

/// Usage of one resource kind within the current period
#[derive(Debug, Clone, serde::Serialize)]
pub struct ResourceUsage {
    pub resource: ResourceKind,
    pub used: i64,
    /// None = unlimited
    pub limit: Option<i64>,
    /// None = unlimited
    pub remaining: Option<i64>,
    pub percent_used: Option<f64>,
}

impl ResourceUsage {
    pub fn from_count(resource: ResourceKind, used: i64, limit: Limit) -> Self {
        let limit_db = limit.to_db();
        let remaining = limit.remaining(used);
        let percent_used = limit_db.map(|l| {
            if l <= 0 {
                100.0
            } else {
                (used as f64 / l as f64) * 100.0
            }
        });
        Self {
            resource,
            used,
            limit: limit_db,
            remaining,
            percent_used,
        }
    }
}

/// Store for usage counter rows
#[derive(Clone)]
pub struct UsageCounterStore {
    pool: PgPool,
}

impl UsageCounterStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Atomically increment the current period's counter if, and only if,
    /// the new count stays within `limit`. `limit = None` means unlimited;
    /// the increment still happens for reporting.
    pub async fn reserve(
        &self,
        tenant_id: TenantId,
        resource: ResourceKind,
        period_start: OffsetDateTime,
        period_end: OffsetDateTime,
        delta: i64,
        limit: Option<i64>,
    ) -> BillingResult<ReserveResult> {
        if delta <= 0 {
            return Err(BillingError::InvalidInput(
                "reservation delta must be positive".to_string(),
            ));
        }

        // A fresh row inserts count = delta, which the ON CONFLICT guard
        // never sees; reject an oversized first reservation up front.
        if let Some(l) = limit {
            if delta > l {
                let count = self
                    .current_count(tenant_id, resource, period_start)
                    .await?;
                return Ok(ReserveResult::LimitExceeded { count });
            }
        }

        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            INSERT INTO usage_counters AS uc
                (id, tenant_id, resource_kind, period_start, period_end, count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            ON CONFLICT (tenant_id, resource_kind, period_start) DO UPDATE
                SET count = uc.count + $6, updated_at = NOW()
                WHERE $7::BIGINT IS NULL OR uc.count + $6 <= $7
            RETURNING count
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id.0)
        .bind(resource)
        .bind(period_start)
        .bind(period_end)
        .bind(delta)
        .bind(limit)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((count,)) => Ok(ReserveResult::Reserved { count }),
            None => {
                let count = self
                    .current_count(tenant_id, resource, period_start)
                    .await?;
                Ok(ReserveResult::LimitExceeded { count })
            }
        }
    }

    /// Compensating decrement, e.g. a cancelled booking freeing its slot.
    /// Only kinds that allow it; SMS counters never go down. Floors at zero.
    pub async fn release(
        &self,
        tenant_id: TenantId,
        resource: ResourceKind,
        period_start: OffsetDateTime,
        delta: i64,
    ) -> BillingResult<i64> {
        if !resource.allows_decrement() {
            return Err(BillingError::InvalidInput(format!(
                "{} counters never decrement",
                resource
            )));
        }
        if delta <= 0 {
            return Err(BillingError::InvalidInput(
                "release delta must be positive".to_string(),
            ));
        }

        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE usage_counters
            SET count = GREATEST(count - $4, 0), updated_at = NOW()
            WHERE tenant_id = $1 AND resource_kind = $2 AND period_start = $3
            RETURNING count
            "#,
        )
        .bind(tenant_id.0)
        .bind(resource)
        .bind(period_start)
        .bind(delta)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(count,)| count).unwrap_or(0))
    }

    /// Current count for a period; a missing row reads as zero.
    pub async fn current_count(
        &self,
        tenant_id: TenantId,
        resource: ResourceKind,
        period_start: OffsetDateTime,
    ) -> BillingResult<i64> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT count FROM usage_counters
            WHERE tenant_id = $1 AND resource_kind = $2 AND period_start = $3
            "#,
        )
        .bind(tenant_id.0)
        .bind(resource)
        .bind(period_start)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(count,)| count).unwrap_or(0))
    }

    /// Live count of active employee rows. Employees are a standing-count
    /// resource: no counter, no period, recomputed on every check.
    pub async fn active_employee_count(&self, tenant_id: TenantId) -> BillingResult<i64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM employees WHERE tenant_id = $1 AND active = true",
        )
        .bind(tenant_id.0)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// Usage of one kind for the dashboard: standing count for employees,
    /// the period counter for everything else.
    pub async fn usage_for(
        &self,
        tenant_id: TenantId,
        resource: ResourceKind,
        period_start: OffsetDateTime,
        limit: Limit,
    ) -> BillingResult<ResourceUsage> {
        let used = if resource.is_standing_count() {
            self.active_employee_count(tenant_id).await?
        } else {
            self.current_count(tenant_id, resource, period_start).await?
        };

        Ok(ResourceUsage::from_count(resource, used, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_usage_percentages() {
        let u = ResourceUsage::from_count(ResourceKind::Bookings, 25, Limit::Limited(100));
        assert_eq!(u.limit, Some(100));
        assert_eq!(u.remaining, Some(75));
        assert_eq!(u.percent_used, Some(25.0));
    }

    #[test]
    fn test_resource_usage_unlimited() {
        let u = ResourceUsage::from_count(ResourceKind::Bookings, 1_000_001, Limit::Unlimited);
        assert_eq!(u.limit, None);
        assert_eq!(u.remaining, None);
        assert_eq!(u.percent_used, None);
    }

    #[test]
    fn test_resource_usage_overrun_clamps_remaining() {
        let u = ResourceUsage::from_count(ResourceKind::Sms, 120, Limit::Limited(100));
        assert_eq!(u.remaining, Some(0));
        assert_eq!(u.percent_used, Some(120.0));
    }
}
