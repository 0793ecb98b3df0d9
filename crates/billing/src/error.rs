//! Billing error types

use thiserror::Error;

/// Billing-specific errors
///
/// Business-state outcomes (trial expired, payment failed, quota reached) are
/// never errors; they are values returned by the state machine and the gate.
/// Only genuinely unexpected conditions live here.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Tenant not found: {0}")]
    TenantNotFound(String),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("Plan not found: {0}")]
    PlanNotFound(String),

    #[error("Plan is deactivated: {0}")]
    PlanDeactivated(String),

    #[error("Invalid plan definition for '{slug}': {reason}")]
    InvalidPlan { slug: String, reason: String },

    #[error("Subscription record invariant violated for tenant {tenant_id}: {reason}")]
    InvalidRecord { tenant_id: String, reason: String },

    #[error("Webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("Webhook payload malformed: {0}")]
    WebhookPayloadInvalid(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
