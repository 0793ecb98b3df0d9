//! Payment provider webhook reconciliation
//!
//! Applies the provider's asynchronous truth to local subscription records.
//! Delivery is at-least-once, unordered, and occasionally duplicated, so the
//! pipeline is: verify the signature, claim the event id atomically, locate
//! the record under a row lock, drop anything stale, then let the state
//! machine decide.
//!
//! An event referencing a subscription we do not know is logged and dropped,
//! never surfaced as fatal: the provider may deliver events for records that
//! have not been created yet, and will redeliver on its own schedule.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use slotwise_shared::types::TenantId;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::events::{ActorType, BillingEventLogger};
use crate::notify::NotificationOutbox;
use crate::state_machine::{self, ProviderEventKind};
use crate::subscription::{SubscriptionRecord, SubscriptionStore};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a webhook signature timestamp (replay window)
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// How long a claimed event may sit in `processing` before another delivery
/// is allowed to re-claim it
const PROCESSING_TIMEOUT_MINUTES: i32 = 30;

/// Configuration for the provider webhook endpoint
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Shared secret the provider signs payloads with
    pub webhook_secret: String,
}

impl ProviderConfig {
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            webhook_secret: std::env::var("PROVIDER_WEBHOOK_SECRET")
                .map_err(|_| BillingError::Config("PROVIDER_WEBHOOK_SECRET not set".to_string()))?,
        })
    }
}

/// Provider event as it arrives on the wire
#[derive(Debug, Deserialize)]
struct WireEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    /// Unix seconds, the provider's own clock
    occurred_at: i64,
    subscription_id: Option<String>,
    customer_id: Option<String>,
    #[serde(default)]
    data: serde_json::Value,
}

/// Normalized provider event after verification and parsing
#[derive(Debug, Clone)]
pub struct ProviderEvent {
    pub id: String,
    pub event_type: String,
    pub kind: Option<ProviderEventKind>,
    pub external_subscription_id: Option<String>,
    pub external_customer_id: Option<String>,
    pub customer_email: Option<String>,
    pub occurred_at: OffsetDateTime,
    pub payload: serde_json::Value,
}

/// Map the provider's event taxonomy to the internal transition vocabulary.
/// Unknown types map to None and are acknowledged without any state change.
pub fn map_event_type(event_type: &str) -> Option<ProviderEventKind> {
    match event_type {
        "invoice.payment_succeeded" | "charge.succeeded" | "checkout.completed" => {
            Some(ProviderEventKind::PaymentSucceeded)
        }
        "invoice.payment_failed" | "charge.failed" => Some(ProviderEventKind::PaymentFailed),
        "subscription.cancelled" | "subscription.deleted" => {
            Some(ProviderEventKind::SubscriptionCancelled)
        }
        "subscription.trial_will_end" => Some(ProviderEventKind::TrialWillEnd),
        _ => None,
    }
}

/// Verify a `t=<unix>,v1=<hex>` signature header against the payload.
/// Split out with an injectable clock for tests.
fn verify_signature_at(
    payload: &str,
    signature: &str,
    secret: &str,
    now_unix: i64,
) -> BillingResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut v1_signature: Option<String> = None;

    for part in signature.split(',') {
        let kv: Vec<&str> = part.splitn(2, '=').collect();
        if kv.len() == 2 {
            match kv[0] {
                "t" => timestamp = kv[1].parse().ok(),
                "v1" => v1_signature = Some(kv[1].to_string()),
                _ => {}
            }
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        tracing::warn!("Missing timestamp in signature header");
        BillingError::WebhookSignatureInvalid
    })?;

    let v1_signature = v1_signature.ok_or_else(|| {
        tracing::warn!("Missing v1 signature in signature header");
        BillingError::WebhookSignatureInvalid
    })?;

    if (now_unix - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        tracing::warn!(
            timestamp = timestamp,
            now = now_unix,
            "Webhook timestamp outside tolerance"
        );
        return Err(BillingError::WebhookSignatureInvalid);
    }

    let secret_key = secret.strip_prefix("whsec_").unwrap_or(secret);
    let signed_payload = format!("{}.{}", timestamp, payload);

    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .map_err(|_| BillingError::WebhookSignatureInvalid)?;
    mac.update(signed_payload.as_bytes());
    let computed = hex::encode(mac.finalize().into_bytes());

    if computed != v1_signature {
        tracing::warn!("Webhook signature mismatch");
        return Err(BillingError::WebhookSignatureInvalid);
    }

    Ok(())
}

fn parse_event(payload: &str) -> BillingResult<ProviderEvent> {
    let wire: WireEvent = serde_json::from_str(payload)
        .map_err(|e| BillingError::WebhookPayloadInvalid(e.to_string()))?;

    let occurred_at = OffsetDateTime::from_unix_timestamp(wire.occurred_at)
        .map_err(|e| BillingError::WebhookPayloadInvalid(format!("occurred_at: {}", e)))?;

    let customer_email = wire
        .data
        .get("customer_email")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    Ok(ProviderEvent {
        kind: map_event_type(&wire.event_type),
        id: wire.id,
        event_type: wire.event_type,
        external_subscription_id: wire.subscription_id,
        external_customer_id: wire.customer_id,
        customer_email,
        occurred_at,
        payload: wire.data,
    })
}

/// Webhook handler for provider events
pub struct WebhookReconciler {
    pool: PgPool,
    store: SubscriptionStore,
    outbox: NotificationOutbox,
    event_logger: BillingEventLogger,
    config: ProviderConfig,
}

impl WebhookReconciler {
    pub fn new(pool: PgPool, config: ProviderConfig) -> Self {
        Self {
            store: SubscriptionStore::new(pool.clone()),
            outbox: NotificationOutbox::new(pool.clone()),
            event_logger: BillingEventLogger::new(pool.clone()),
            pool,
            config,
        }
    }

    /// Verify a raw webhook delivery and parse it into a normalized event.
    /// Unsigned or mis-signed deliveries are rejected outright.
    pub fn verify_and_parse(&self, payload: &str, signature: &str) -> BillingResult<ProviderEvent> {
        let now_unix = OffsetDateTime::now_utc().unix_timestamp();
        verify_signature_at(payload, signature, &self.config.webhook_secret, now_unix)?;
        parse_event(payload)
    }

    /// Handle a verified event.
    ///
    /// Idempotency is atomic: `INSERT .. ON CONFLICT .. RETURNING` claims
    /// exclusive processing rights for the event id, so two concurrent
    /// deliveries of the same event cannot both pass an exists-check. Events
    /// stuck in `processing` beyond a timeout may be re-claimed.
    pub async fn handle_event(&self, event: ProviderEvent) -> BillingResult<()> {
        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO provider_webhook_events
                (id, provider_event_id, event_type, event_timestamp, processing_result, processing_started_at)
            VALUES ($1, $2, $3, $4, 'processing', NOW())
            ON CONFLICT (provider_event_id) DO UPDATE SET
                processing_result = 'processing',
                processing_started_at = NOW()
            WHERE provider_webhook_events.processing_result = 'processing'
              AND provider_webhook_events.processing_started_at < NOW() - ($5 || ' minutes')::INTERVAL
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&event.id)
        .bind(&event.event_type)
        .bind(event.occurred_at)
        .bind(PROCESSING_TIMEOUT_MINUTES)
        .fetch_optional(&self.pool)
        .await?;

        if claimed.is_none() {
            tracing::info!(
                event_id = %event.id,
                event_type = %event.event_type,
                "Duplicate webhook event, already claimed"
            );
            return Ok(());
        }

        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            "Processing provider webhook event"
        );

        let result = self.process_event_internal(&event).await;

        let (processing_result, error_message) = match &result {
            Ok(()) => ("success", None),
            Err(e) => ("error", Some(e.to_string())),
        };

        if let Err(e) = sqlx::query(
            r#"
            UPDATE provider_webhook_events
            SET processing_result = $1, error_message = $2
            WHERE provider_event_id = $3
            "#,
        )
        .bind(processing_result)
        .bind(&error_message)
        .bind(&event.id)
        .execute(&self.pool)
        .await
        {
            tracing::error!(
                event_id = %event.id,
                error = %e,
                "Failed to record webhook processing result; event may appear stuck"
            );
        }

        result
    }

    async fn process_event_internal(&self, event: &ProviderEvent) -> BillingResult<()> {
        let Some(kind) = event.kind else {
            tracing::info!(
                event_type = %event.event_type,
                event_id = %event.id,
                "Unhandled provider event type, acknowledged without action"
            );
            return Ok(());
        };

        let mut tx = self.pool.begin().await?;

        let record = self.locate_record(&mut tx, event).await?;
        let Some(record) = record else {
            tracing::warn!(
                event_id = %event.id,
                subscription_id = ?event.external_subscription_id,
                customer_id = ?event.external_customer_id,
                "Provider event references no known subscription, dropped"
            );
            return Ok(());
        };

        // Out-of-order delivery: anything at or below the applied high-water
        // mark is stale and discarded.
        if let Some(last_event_at) = record.last_event_at {
            if event.occurred_at <= last_event_at {
                tracing::info!(
                    event_id = %event.id,
                    occurred_at = %event.occurred_at,
                    last_event_at = %last_event_at,
                    "Stale provider event discarded"
                );
                return Ok(());
            }
        }

        if let Err(e) = record.validate() {
            tracing::error!(
                tenant_id = %record.tenant_id,
                event_id = %event.id,
                error = %e,
                "Subscription record fails invariants; left untouched"
            );
            return Err(e);
        }

        let before = record.status;
        let decision = state_machine::apply_provider_event(&record, kind, event.occurred_at);

        if decision.changed {
            self.store.commit_decision(&mut tx, &decision).await?;
        }
        self.store
            .mark_reconciled(&mut tx, record.id, event.occurred_at, OffsetDateTime::now_utc())
            .await?;

        tx.commit().await?;

        let tenant_id = TenantId(record.tenant_id);

        if decision.record.status != before {
            tracing::info!(
                tenant_id = %tenant_id,
                event_id = %event.id,
                from = %before,
                to = %decision.record.status,
                "Provider event applied"
            );

            if let Err(e) = self
                .event_logger
                .log_status_change(
                    tenant_id,
                    &before.to_string(),
                    &decision.record.status.to_string(),
                    ActorType::Provider,
                    Some(&event.id),
                )
                .await
            {
                tracing::warn!(error = %e, "Failed to log status change event");
            }
        }

        self.outbox.enqueue_effects(tenant_id, &decision.effects).await;

        Ok(())
    }

    /// Find the record a provider event refers to, locking it for the length
    /// of the transaction. Falls back to customer id + tenant email for the
    /// first event of a subscription, attaching the external ids on the way.
    async fn locate_record(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        event: &ProviderEvent,
    ) -> BillingResult<Option<SubscriptionRecord>> {
        if let Some(sub_id) = event.external_subscription_id.as_deref() {
            if let Some(record) = self.store.lock_by_external_subscription(tx, sub_id).await? {
                return Ok(Some(record));
            }
        }

        let Some(customer_id) = event.external_customer_id.as_deref() else {
            return Ok(None);
        };

        let record = self
            .store
            .lock_by_customer_fallback(tx, customer_id, event.customer_email.as_deref())
            .await?;

        if let Some(record) = &record {
            self.store
                .attach_external_ids(
                    tx,
                    record.id,
                    event.external_customer_id.as_deref(),
                    event.external_subscription_id.as_deref(),
                )
                .await?;
        }

        Ok(record)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sign(payload: &str, secret: &str, timestamp: i64) -> String {
        let key = secret.strip_prefix("whsec_").unwrap_or(secret);
        let signed_payload = format!("{}.{}", timestamp, payload);
        let mut mac = HmacSha256::new_from_slice(key.as_bytes()).unwrap();
        mac.update(signed_payload.as_bytes());
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    const SECRET: &str = "whsec_test_secret_key";

    fn event_json(event_type: &str, occurred_at: i64) -> String {
        serde_json::json!({
            "id": "evt_test_123",
            "type": event_type,
            "occurred_at": occurred_at,
            "subscription_id": "psub_123",
            "customer_id": "pcus_123",
            "data": {
                "customer_email": "owner@salon.example"
            }
        })
        .to_string()
    }

    #[test]
    fn test_valid_signature_accepted() {
        let now = 1_700_000_000;
        let payload = event_json("invoice.payment_succeeded", now);
        let sig = sign(&payload, SECRET, now);
        assert!(verify_signature_at(&payload, &sig, SECRET, now).is_ok());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let now = 1_700_000_000;
        let payload = event_json("invoice.payment_succeeded", now);
        let sig = sign(&payload, SECRET, now);
        let tampered = payload.replace("psub_123", "psub_999");
        assert!(matches!(
            verify_signature_at(&tampered, &sig, SECRET, now),
            Err(BillingError::WebhookSignatureInvalid)
        ));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let now = 1_700_000_000;
        let payload = event_json("invoice.payment_succeeded", now);
        let sig = sign(&payload, "whsec_other_secret", now);
        assert!(verify_signature_at(&payload, &sig, SECRET, now).is_err());
    }

    #[test]
    fn test_expired_timestamp_rejected() {
        let now = 1_700_000_000;
        let payload = event_json("invoice.payment_succeeded", now);
        let sig = sign(&payload, SECRET, now - 600);
        assert!(verify_signature_at(&payload, &sig, SECRET, now).is_err());
    }

    #[test]
    fn test_malformed_signature_header_rejected() {
        let now = 1_700_000_000;
        let payload = event_json("invoice.payment_succeeded", now);
        assert!(verify_signature_at(&payload, "garbage", SECRET, now).is_err());
        assert!(verify_signature_at(&payload, "t=notanumber,v1=abc", SECRET, now).is_err());
        assert!(verify_signature_at(&payload, &format!("t={}", now), SECRET, now).is_err());
    }

    #[test]
    fn test_parse_normalizes_event() {
        let now = 1_700_000_000;
        let payload = event_json("invoice.payment_failed", now);
        let event = parse_event(&payload).unwrap();
        assert_eq!(event.id, "evt_test_123");
        assert_eq!(event.kind, Some(ProviderEventKind::PaymentFailed));
        assert_eq!(event.external_subscription_id.as_deref(), Some("psub_123"));
        assert_eq!(event.external_customer_id.as_deref(), Some("pcus_123"));
        assert_eq!(event.customer_email.as_deref(), Some("owner@salon.example"));
        assert_eq!(event.occurred_at.unix_timestamp(), now);
    }

    #[test]
    fn test_unknown_event_type_maps_to_none() {
        assert_eq!(map_event_type("customer.updated"), None);
        let payload = event_json("customer.updated", 1_700_000_000);
        let event = parse_event(&payload).unwrap();
        assert_eq!(event.kind, None);
    }

    #[test]
    fn test_event_taxonomy_mapping() {
        assert_eq!(
            map_event_type("invoice.payment_succeeded"),
            Some(ProviderEventKind::PaymentSucceeded)
        );
        assert_eq!(
            map_event_type("checkout.completed"),
            Some(ProviderEventKind::PaymentSucceeded)
        );
        assert_eq!(
            map_event_type("invoice.payment_failed"),
            Some(ProviderEventKind::PaymentFailed)
        );
        assert_eq!(
            map_event_type("subscription.deleted"),
            Some(ProviderEventKind::SubscriptionCancelled)
        );
        assert_eq!(
            map_event_type("subscription.trial_will_end"),
            Some(ProviderEventKind::TrialWillEnd)
        );
    }

    #[test]
    fn test_malformed_payload_rejected() {
        assert!(matches!(
            parse_event("not json"),
            Err(BillingError::WebhookPayloadInvalid(_))
        ));
        assert!(parse_event(r#"{"id": "evt_1"}"#).is_err());
    }
}
