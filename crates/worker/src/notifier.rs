//! Notification Outbox Dispatcher
//!
//! Drains the notification outbox with retry logic. The core enqueues
//! notification classes fire-and-forget; this is the reliable half that
//! actually pushes them to the delivery sink.

use sqlx::PgPool;
use uuid::Uuid;
use serde_json::Value;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::{error, info, warn};

/// Process pending notifications from the outbox
pub async fn process_notification_outbox(
    pool: &PgPool,
    http_client: &reqwest::Client,
    sink_url: &str,
) {
    // Find notifications to dispatch (pending or failed with retries remaining)
    let notifications: Vec<(Uuid, Uuid, String, Value, i32, i32)> = match sqlx::query_as(
        r#"
        SELECT id, tenant_id, class, payload, attempts, max_attempts
        FROM notification_outbox
        WHERE (status = 'pending' OR (status = 'failed' AND attempts < max_attempts))
          AND (last_attempt_at IS NULL OR last_attempt_at < NOW() - INTERVAL '5 minutes')
        ORDER BY created_at ASC
        LIMIT 10
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .fetch_all(pool)
    .await
    {
        Ok(n) => n,
        Err(e) => {
            error!(error = %e, "Failed to fetch notifications from outbox");
            return;
        }
    };

    if notifications.is_empty() {
        return; // No work to do
    }

    info!(count = notifications.len(), "Dispatching notifications from outbox");

    for (outbox_id, tenant_id, class, payload, attempts, max_attempts) in notifications {
        // Mark as processing
        if let Err(e) = sqlx::query(
            r#"
            UPDATE notification_outbox
            SET status = 'processing', last_attempt_at = NOW(), attempts = attempts + 1
            WHERE id = $1
            "#,
        )
        .bind(outbox_id)
        .execute(pool)
        .await
        {
            error!(outbox_id = %outbox_id, error = %e, "Failed to mark notification as processing");
            continue;
        }

        let result = dispatch_notification(http_client, sink_url, tenant_id, &class, &payload).await;

        match result {
            Ok(_) => {
                if let Err(e) = sqlx::query(
                    "UPDATE notification_outbox SET status = 'sent', processed_at = NOW() WHERE id = $1",
                )
                .bind(outbox_id)
                .execute(pool)
                .await
                {
                    error!(outbox_id = %outbox_id, error = %e, "Failed to mark notification as sent");
                }
                info!(outbox_id = %outbox_id, tenant_id = %tenant_id, class = %class, "Notification dispatched");
            }
            Err(e) => {
                let error_msg = e.to_string();
                let new_attempts = attempts + 1;

                if let Err(e) = sqlx::query(
                    "UPDATE notification_outbox SET status = 'failed', last_error = $1 WHERE id = $2",
                )
                .bind(&error_msg)
                .bind(outbox_id)
                .execute(pool)
                .await
                {
                    error!(outbox_id = %outbox_id, error = %e, "Failed to mark notification as failed");
                }

                if new_attempts >= max_attempts {
                    error!(
                        outbox_id = %outbox_id,
                        tenant_id = %tenant_id,
                        class = %class,
                        attempts = new_attempts,
                        error = %error_msg,
                        "Notification permanently failed after max retries"
                    );
                } else {
                    warn!(
                        outbox_id = %outbox_id,
                        tenant_id = %tenant_id,
                        class = %class,
                        attempts = new_attempts,
                        max_attempts = max_attempts,
                        error = %error_msg,
                        "Notification dispatch failed, will retry"
                    );
                }
            }
        }
    }
}

/// POST one notification to the delivery sink with exponential backoff.
/// The sink owns templates and channels; we only hand over the decision.
async fn dispatch_notification(
    http_client: &reqwest::Client,
    sink_url: &str,
    tenant_id: Uuid,
    class: &str,
    payload: &Value,
) -> anyhow::Result<()> {
    let strategy = ExponentialBackoff::from_millis(200).factor(2).map(jitter).take(3);

    let body = serde_json::json!({
        "tenant_id": tenant_id,
        "class": class,
        "payload": payload,
    });

    Retry::spawn(strategy, || async {
        let response = http_client
            .post(sink_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("sink unreachable: {}", e))?;

        if !response.status().is_success() {
            anyhow::bail!("sink returned {}", response.status());
        }
        Ok(())
    })
    .await
}

/// Cleanup old sent/failed notifications (for maintenance job)
pub async fn cleanup_old_notifications(pool: &PgPool, retention_days: i32) {
    let result = sqlx::query(
        r#"
        DELETE FROM notification_outbox
        WHERE processed_at < NOW() - ($1 || ' days')::INTERVAL
          AND status IN ('sent', 'failed')
        "#,
    )
    .bind(retention_days)
    .execute(pool)
    .await;

    match result {
        Ok(rows) => {
            if rows.rows_affected() > 0 {
                info!(
                    deleted = rows.rows_affected(),
                    retention_days = retention_days,
                    "Cleaned up old notification outbox entries"
                );
            }
        }
        Err(e) => {
            error!(error = %e, "Failed to cleanup old notifications");
        }
    }
}
