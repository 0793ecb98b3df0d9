//! Entitlement Gate
//!
//! The enforcement point every tenant-scoped write calls before doing work.
//! Answers allow/deny with enough context for the frontend to render the
//! right call-to-action: a quota denial and an access-blocked denial are
//! different products of this function, and neither is an error.
//!
//! Every check takes an authenticated [`TenantContext`]; there is no way to
//! ask about a tenant without holding its context.

use std::sync::Arc;

use slotwise_shared::types::{Limit, ResourceKind, SubscriptionStatus, TenantId, UserId};

use crate::catalog::PlanCatalog;
use crate::error::{BillingError, BillingResult};
use crate::subscription::SubscriptionStore;
use crate::usage::{ReserveResult, UsageCounterStore};

/// Authenticated tenant identity every gate call requires.
/// Super-admin contexts are always entitled; that is an authorization-layer
/// fact, not a subscription state.
#[derive(Debug, Clone, Copy)]
pub struct TenantContext {
    pub tenant_id: TenantId,
    pub user_id: Option<UserId>,
    pub is_super_admin: bool,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId, user_id: Option<UserId>) -> Self {
        Self {
            tenant_id,
            user_id,
            is_super_admin: false,
        }
    }

    pub fn super_admin(tenant_id: TenantId, user_id: Option<UserId>) -> Self {
        Self {
            tenant_id,
            user_id,
            is_super_admin: true,
        }
    }
}

/// Outcome of a `check_and_reserve` call
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReservationOutcome {
    pub allowed: bool,
    pub current: i64,
    /// None = unlimited
    pub limit: Option<i64>,
    /// None = unlimited
    pub remaining: Option<i64>,
    pub message: Option<String>,
}

impl ReservationOutcome {
    fn allowed(current: i64, limit: Limit) -> Self {
        Self {
            allowed: true,
            current,
            limit: limit.to_db(),
            remaining: limit.remaining(current),
            message: None,
        }
    }

    fn denied_quota(resource: ResourceKind, current: i64, limit: i64) -> Self {
        Self {
            allowed: false,
            current,
            limit: Some(limit),
            remaining: Some((limit - current).max(0)),
            message: Some(quota_message(resource, current, limit)),
        }
    }

    fn denied_access(message: String) -> Self {
        Self {
            allowed: false,
            current: 0,
            limit: None,
            remaining: None,
            message: Some(message),
        }
    }
}

/// Human-readable denial for a blocked subscription, or None if the status
/// permits usage. PAST_DUE is grace: access is not yet blocked.
fn access_denial(status: SubscriptionStatus) -> Option<String> {
    match status {
        SubscriptionStatus::Suspended => Some(
            "Account suspended: payment required. Update your payment method to restore access."
                .to_string(),
        ),
        SubscriptionStatus::Cancelled => Some(
            "Subscription cancelled. Choose a plan to reactivate your account.".to_string(),
        ),
        SubscriptionStatus::Trialing
        | SubscriptionStatus::Active
        | SubscriptionStatus::PastDue => None,
    }
}

fn quota_message(resource: ResourceKind, current: i64, limit: i64) -> String {
    match resource {
        ResourceKind::Bookings => format!(
            "Monthly booking limit reached ({} of {} used). Upgrade your plan to accept more bookings.",
            current.min(limit), limit
        ),
        ResourceKind::Employees => format!(
            "Employee seat limit reached ({} of {} seats in use). Upgrade your plan to add more staff.",
            current.min(limit), limit
        ),
        ResourceKind::Sms => format!(
            "Monthly SMS limit reached ({} of {} sent). Upgrade your plan to send more messages.",
            current.min(limit), limit
        ),
    }
}

/// The gate itself
#[derive(Clone)]
pub struct EntitlementGate {
    store: SubscriptionStore,
    counters: UsageCounterStore,
    catalog: Arc<PlanCatalog>,
}

impl EntitlementGate {
    pub fn new(
        store: SubscriptionStore,
        counters: UsageCounterStore,
        catalog: Arc<PlanCatalog>,
    ) -> Self {
        Self {
            store,
            counters,
            catalog,
        }
    }

    /// Check a requested usage delta against the tenant's plan and, when
    /// allowed, reserve it. Reservation is the only path that mutates a
    /// counter; denials are read-only.
    pub async fn check_and_reserve(
        &self,
        ctx: &TenantContext,
        resource: ResourceKind,
        delta: i64,
    ) -> BillingResult<ReservationOutcome> {
        if delta <= 0 {
            return Err(BillingError::InvalidInput(
                "requested delta must be positive".to_string(),
            ));
        }

        if ctx.is_super_admin {
            return self.reserve_unchecked(ctx.tenant_id, resource, delta).await;
        }

        // Missing subscription reads as "not entitled", never as unlimited.
        let Some(record) = self.store.get_by_tenant(ctx.tenant_id).await? else {
            tracing::warn!(tenant_id = %ctx.tenant_id, "Gate check without a subscription");
            return Ok(ReservationOutcome::denied_access(
                "No subscription found for this account.".to_string(),
            ));
        };

        if let Some(message) = access_denial(record.status) {
            return Ok(ReservationOutcome::denied_access(message));
        }

        let plan = self.catalog.get(&record.plan_slug)?;
        let limit = plan.limit_for(resource);

        if resource.is_standing_count() {
            return self.check_standing_count(ctx.tenant_id, resource, delta, limit).await;
        }

        match limit {
            Limit::Unlimited => {
                // No limit to consult; still metered for reporting.
                let result = self
                    .counters
                    .reserve(
                        ctx.tenant_id,
                        resource,
                        record.current_period_start,
                        record.current_period_end,
                        delta,
                        None,
                    )
                    .await?;
                let count = match result {
                    ReserveResult::Reserved { count } => count,
                    ReserveResult::LimitExceeded { count } => count,
                };
                Ok(ReservationOutcome::allowed(count, Limit::Unlimited))
            }
            Limit::Limited(l) => {
                let result = self
                    .counters
                    .reserve(
                        ctx.tenant_id,
                        resource,
                        record.current_period_start,
                        record.current_period_end,
                        delta,
                        Some(l),
                    )
                    .await?;
                match result {
                    ReserveResult::Reserved { count } => {
                        Ok(ReservationOutcome::allowed(count, limit))
                    }
                    ReserveResult::LimitExceeded { count } => {
                        Ok(ReservationOutcome::denied_quota(resource, count, l))
                    }
                }
            }
        }
    }

    /// Employees are a standing count: the live number of active rows, not a
    /// period counter. The caller creates the row only after an allow.
    async fn check_standing_count(
        &self,
        tenant_id: TenantId,
        resource: ResourceKind,
        delta: i64,
        limit: Limit,
    ) -> BillingResult<ReservationOutcome> {
        let live = self.counters.active_employee_count(tenant_id).await?;

        match limit {
            Limit::Unlimited => Ok(ReservationOutcome::allowed(live, Limit::Unlimited)),
            Limit::Limited(l) if live + delta <= l => {
                Ok(ReservationOutcome::allowed(live, limit))
            }
            Limit::Limited(l) => Ok(ReservationOutcome::denied_quota(resource, live, l)),
        }
    }

    /// Super-admin path: always entitled, but cumulative usage is still
    /// recorded so reporting stays truthful.
    async fn reserve_unchecked(
        &self,
        tenant_id: TenantId,
        resource: ResourceKind,
        delta: i64,
    ) -> BillingResult<ReservationOutcome> {
        if resource.is_standing_count() {
            let live = self.counters.active_employee_count(tenant_id).await?;
            return Ok(ReservationOutcome::allowed(live, Limit::Unlimited));
        }

        let Some(record) = self.store.get_by_tenant(tenant_id).await? else {
            return Ok(ReservationOutcome::allowed(0, Limit::Unlimited));
        };

        let result = self
            .counters
            .reserve(
                tenant_id,
                resource,
                record.current_period_start,
                record.current_period_end,
                delta,
                None,
            )
            .await?;
        let count = match result {
            ReserveResult::Reserved { count } => count,
            ReserveResult::LimitExceeded { count } => count,
        };

        Ok(ReservationOutcome::allowed(count, Limit::Unlimited))
    }

    /// Compensating release, e.g. a cancelled booking freeing its slot.
    pub async fn release(
        &self,
        ctx: &TenantContext,
        resource: ResourceKind,
        delta: i64,
    ) -> BillingResult<i64> {
        let Some(record) = self.store.get_by_tenant(ctx.tenant_id).await? else {
            return Err(BillingError::SubscriptionNotFound(ctx.tenant_id.to_string()));
        };

        self.counters
            .release(ctx.tenant_id, resource, record.current_period_start, delta)
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_access_denial_distinguishes_suspended_from_cancelled() {
        let suspended = access_denial(SubscriptionStatus::Suspended).unwrap();
        let cancelled = access_denial(SubscriptionStatus::Cancelled).unwrap();
        assert!(suspended.contains("payment required"));
        assert!(cancelled.contains("cancelled"));
        assert_ne!(suspended, cancelled);
    }

    #[test]
    fn test_grace_period_does_not_block_access() {
        assert!(access_denial(SubscriptionStatus::PastDue).is_none());
        assert!(access_denial(SubscriptionStatus::Trialing).is_none());
        assert!(access_denial(SubscriptionStatus::Active).is_none());
    }

    #[test]
    fn test_quota_messages_name_the_resource() {
        let msg = quota_message(ResourceKind::Employees, 5, 5);
        assert!(msg.contains("seat"));
        assert!(msg.contains("5 of 5"));

        let msg = quota_message(ResourceKind::Bookings, 100, 100);
        assert!(msg.contains("booking"));
    }

    #[test]
    fn test_denied_quota_outcome_fields() {
        let o = ReservationOutcome::denied_quota(ResourceKind::Bookings, 100, 100);
        assert!(!o.allowed);
        assert_eq!(o.remaining, Some(0));
        assert_eq!(o.limit, Some(100));
        assert!(o.message.unwrap().contains("limit reached"));
    }

    #[test]
    fn test_allowed_outcome_tracks_remaining() {
        let o = ReservationOutcome::allowed(40, Limit::Limited(100));
        assert!(o.allowed);
        assert_eq!(o.remaining, Some(60));
        assert!(o.message.is_none());
    }
}
