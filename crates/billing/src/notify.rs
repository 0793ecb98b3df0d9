//! Notification outbox
//!
//! The core decides *that* and *when* a notification class fires, nothing
//! else. Decisions land in an outbox table the worker drains; rendering and
//! delivery live outside this repository.
//!
//! Enqueueing is fire-and-forget: a failed insert is logged and swallowed.
//! A notification must never block or fail a state transition.

use slotwise_shared::types::TenantId;
use sqlx::PgPool;
use uuid::Uuid;

use crate::state_machine::{NotificationClass, SideEffect};

/// Writer side of the notification outbox
#[derive(Clone)]
pub struct NotificationOutbox {
    pool: PgPool,
}

impl NotificationOutbox {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueue one notification. Never fails the caller; insert errors are
    /// logged and swallowed.
    pub async fn enqueue(
        &self,
        tenant_id: TenantId,
        class: NotificationClass,
        payload: serde_json::Value,
    ) {
        let result = sqlx::query(
            r#"
            INSERT INTO notification_outbox (id, tenant_id, class, payload, status, created_at)
            VALUES ($1, $2, $3, $4, 'pending', NOW())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id.0)
        .bind(class.to_string())
        .bind(payload)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                tracing::info!(tenant_id = %tenant_id, class = %class, "Notification enqueued");
            }
            Err(e) => {
                tracing::error!(
                    tenant_id = %tenant_id,
                    class = %class,
                    error = %e,
                    "Failed to enqueue notification; transition proceeds without it"
                );
            }
        }
    }

    /// Enqueue every notification carried by a decision's side effects.
    pub async fn enqueue_effects(&self, tenant_id: TenantId, effects: &[SideEffect]) {
        for effect in effects {
            if let SideEffect::Notify(class) = effect {
                self.enqueue(
                    tenant_id,
                    *class,
                    serde_json::json!({ "tenant_id": tenant_id }),
                )
                .await;
            }
        }
    }
}
