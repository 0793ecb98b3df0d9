//! Billing Events Module
//!
//! Append-only audit log of everything that changed a subscription and who
//! caused it. Answers "why is this tenant suspended?" after the fact and
//! lets webhook replays be audited against what was actually applied.

use serde::{Deserialize, Serialize};
use slotwise_shared::types::TenantId;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Types of billing events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillingEventType {
    SubscriptionCreated,
    StatusChanged,
    PlanChanged,
    CancellationScheduled,
    CancellationRevoked,
    CheckoutRestarted,
    PaymentFailed,
    TrialEnding,
    AdminOverride,
}

impl std::fmt::Display for BillingEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BillingEventType::SubscriptionCreated => "SUBSCRIPTION_CREATED",
            BillingEventType::StatusChanged => "STATUS_CHANGED",
            BillingEventType::PlanChanged => "PLAN_CHANGED",
            BillingEventType::CancellationScheduled => "CANCELLATION_SCHEDULED",
            BillingEventType::CancellationRevoked => "CANCELLATION_REVOKED",
            BillingEventType::CheckoutRestarted => "CHECKOUT_RESTARTED",
            BillingEventType::PaymentFailed => "PAYMENT_FAILED",
            BillingEventType::TrialEnding => "TRIAL_ENDING",
            BillingEventType::AdminOverride => "ADMIN_OVERRIDE",
        };
        write!(f, "{}", s)
    }
}

/// Who triggered the event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorType {
    /// Tenant user through the dashboard
    User,
    /// Platform super-admin
    Admin,
    /// Sweeper or other automation
    System,
    /// Payment provider webhook
    Provider,
}

impl std::fmt::Display for ActorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActorType::User => write!(f, "user"),
            ActorType::Admin => write!(f, "admin"),
            ActorType::System => write!(f, "system"),
            ActorType::Provider => write!(f, "provider"),
        }
    }
}

/// A billing event record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BillingEvent {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub provider_event_id: Option<String>,
    pub actor_id: Option<Uuid>,
    pub actor_type: String,
    pub created_at: OffsetDateTime,
}

/// Builder for creating billing events
pub struct BillingEventBuilder {
    tenant_id: TenantId,
    event_type: BillingEventType,
    event_data: serde_json::Value,
    provider_event_id: Option<String>,
    actor_id: Option<Uuid>,
    actor_type: ActorType,
}

impl BillingEventBuilder {
    pub fn new(tenant_id: TenantId, event_type: BillingEventType) -> Self {
        Self {
            tenant_id,
            event_type,
            event_data: serde_json::json!({}),
            provider_event_id: None,
            actor_id: None,
            actor_type: ActorType::System,
        }
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.event_data = data;
        self
    }

    pub fn provider_event(mut self, event_id: impl Into<String>) -> Self {
        self.provider_event_id = Some(event_id.into());
        self
    }

    pub fn actor(mut self, actor_id: Uuid, actor_type: ActorType) -> Self {
        self.actor_id = Some(actor_id);
        self.actor_type = actor_type;
        self
    }

    pub fn actor_type(mut self, actor_type: ActorType) -> Self {
        self.actor_type = actor_type;
        self
    }
}

/// Service for logging and querying billing events
#[derive(Clone)]
pub struct BillingEventLogger {
    pool: PgPool,
}

impl BillingEventLogger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one event.
    pub async fn log_event(&self, builder: BillingEventBuilder) -> BillingResult<Uuid> {
        let event_id: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO billing_events (
                id, tenant_id, event_type, event_data,
                provider_event_id, actor_id, actor_type, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(builder.tenant_id.0)
        .bind(builder.event_type.to_string())
        .bind(&builder.event_data)
        .bind(&builder.provider_event_id)
        .bind(builder.actor_id)
        .bind(builder.actor_type.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(event_id.0)
    }

    /// Convenience: log a status transition with before/after.
    pub async fn log_status_change(
        &self,
        tenant_id: TenantId,
        from: &str,
        to: &str,
        actor_type: ActorType,
        provider_event_id: Option<&str>,
    ) -> BillingResult<Uuid> {
        let mut builder = BillingEventBuilder::new(tenant_id, BillingEventType::StatusChanged)
            .data(serde_json::json!({
                "from": from,
                "to": to,
            }))
            .actor_type(actor_type);

        if let Some(event_id) = provider_event_id {
            builder = builder.provider_event(event_id);
        }

        self.log_event(builder).await
    }

    /// Recent events for a tenant, newest first.
    pub async fn get_events_for_tenant(
        &self,
        tenant_id: TenantId,
        limit: i64,
    ) -> BillingResult<Vec<BillingEvent>> {
        let events: Vec<BillingEvent> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, event_type, event_data,
                   provider_event_id, actor_id, actor_type, created_at
            FROM billing_events
            WHERE tenant_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(tenant_id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_billing_event_type_display() {
        assert_eq!(
            BillingEventType::SubscriptionCreated.to_string(),
            "SUBSCRIPTION_CREATED"
        );
        assert_eq!(BillingEventType::StatusChanged.to_string(), "STATUS_CHANGED");
    }

    #[test]
    fn test_actor_type_display() {
        assert_eq!(ActorType::User.to_string(), "user");
        assert_eq!(ActorType::Provider.to_string(), "provider");
    }

    #[test]
    fn test_event_builder() {
        let tenant_id = TenantId::new();
        let builder = BillingEventBuilder::new(tenant_id, BillingEventType::StatusChanged)
            .data(serde_json::json!({"from": "trialing", "to": "past_due"}))
            .provider_event("evt_123")
            .actor_type(ActorType::Provider);

        assert_eq!(builder.tenant_id, tenant_id);
        assert_eq!(builder.event_type, BillingEventType::StatusChanged);
        assert_eq!(builder.provider_event_id, Some("evt_123".to_string()));
        assert_eq!(builder.actor_type, ActorType::Provider);
    }
}
