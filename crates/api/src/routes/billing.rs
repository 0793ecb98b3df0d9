//! Billing routes: subscription status, lifecycle actions, webhook ingress

use axum::{
    extract::{Extension, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use slotwise_billing::{
    state_machine, ActorType, BillingEventBuilder, BillingEventType, SubscriptionRecord,
};
use slotwise_shared::types::{SubscriptionStatus, TenantId};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::{auth::AuthUser, error::ApiError, state::AppState, state::CachedStatus};

/// Subscription status as the dashboard consumes it.
/// Every countdown field is computed at read time from stored timestamps.
#[derive(Debug, Serialize)]
pub struct SubscriptionStatusResponse {
    pub status: String,
    pub is_trial_active: bool,
    pub remaining_trial_days: i64,
    pub trial_end: Option<String>,
    pub is_past_due: bool,
    pub days_until_block: Option<i64>,
    pub current_period_end: String,
    pub cancel_at_period_end: bool,
    pub plan_name: String,
    pub has_active_subscription: bool,
    pub is_super_admin: bool,
}

/// Request to create the subscription at tenant signup
#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub plan: String,
}

/// Request to change plan
#[derive(Debug, Deserialize)]
pub struct ChangePlanRequest {
    pub plan: String,
}

/// Request to restart a cancelled subscription after a new checkout
#[derive(Debug, Deserialize)]
pub struct ReactivateRequest {
    pub plan: String,
}

fn fmt_ts(t: OffsetDateTime) -> String {
    t.format(&Rfc3339).unwrap_or_else(|_| t.to_string())
}

fn build_response(cached: &CachedStatus, is_super_admin: bool) -> SubscriptionStatusResponse {
    let view = &cached.view;
    let has_active = matches!(
        view.status,
        SubscriptionStatus::Trialing | SubscriptionStatus::Active | SubscriptionStatus::PastDue
    );

    SubscriptionStatusResponse {
        status: view.status.to_string(),
        is_trial_active: view.is_trial_active,
        remaining_trial_days: view.remaining_trial_days,
        trial_end: view.trial_end.map(fmt_ts),
        is_past_due: view.is_past_due,
        days_until_block: view.days_until_block,
        current_period_end: fmt_ts(view.current_period_end),
        cancel_at_period_end: view.cancel_at_period_end,
        plan_name: cached.plan_name.clone(),
        // Super-admins are reported entitled regardless of subscription state
        has_active_subscription: has_active || is_super_admin,
        is_super_admin,
    }
}

async fn load_status(state: &AppState, tenant_id: TenantId) -> Result<CachedStatus, ApiError> {
    if let Some(cached) = state.status_cache.get(tenant_id.0) {
        return Ok(cached);
    }

    let record = state
        .store
        .get_by_tenant(tenant_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let plan_name = state
        .catalog
        .get(&record.plan_slug)
        .map(|p| p.name.clone())?;

    let view = state_machine::status_view(&record, OffsetDateTime::now_utc(), &state.machine_cfg);
    let cached = CachedStatus { view, plan_name };

    state.status_cache.set(tenant_id.0, cached.clone());
    Ok(cached)
}

/// Get the authenticated tenant's subscription status
pub async fn get_subscription_status(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<SubscriptionStatusResponse>, ApiError> {
    let ctx = auth_user.context()?;
    let cached = load_status(&state, ctx.tenant_id).await?;
    Ok(Json(build_response(&cached, auth_user.is_super_admin)))
}

/// Create the subscription at tenant signup: TRIALING on the chosen plan
pub async fn create_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CreateSubscriptionRequest>,
) -> Result<(StatusCode, Json<SubscriptionStatusResponse>), ApiError> {
    let ctx = auth_user.context()?;

    if state.store.get_by_tenant(ctx.tenant_id).await?.is_some() {
        return Err(ApiError::BadRequest(
            "Tenant already has a subscription".to_string(),
        ));
    }

    let plan = state.catalog.get_active(&req.plan)?;
    let record = state
        .store
        .create_for_tenant(ctx.tenant_id, plan, OffsetDateTime::now_utc())
        .await?;

    log_event(
        &state,
        ctx.tenant_id,
        BillingEventBuilder::new(ctx.tenant_id, BillingEventType::SubscriptionCreated)
            .data(serde_json::json!({ "plan": plan.slug }))
            .actor(auth_user.user_id, ActorType::User),
    )
    .await;

    state.status_cache.invalidate(ctx.tenant_id.0);
    respond_with_record(&state, &record, auth_user.is_super_admin, StatusCode::CREATED)
}

/// Schedule cancellation at the end of the current period
pub async fn cancel_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<(StatusCode, Json<SubscriptionStatusResponse>), ApiError> {
    let ctx = auth_user.context()?;
    let record = state.store.set_cancel_at_period_end(ctx.tenant_id, true).await?;

    log_event(
        &state,
        ctx.tenant_id,
        BillingEventBuilder::new(ctx.tenant_id, BillingEventType::CancellationScheduled)
            .data(serde_json::json!({ "period_end": fmt_ts(record.current_period_end) }))
            .actor(auth_user.user_id, ActorType::User),
    )
    .await;

    state.status_cache.invalidate(ctx.tenant_id.0);
    respond_with_record(&state, &record, auth_user.is_super_admin, StatusCode::OK)
}

/// Revoke a scheduled cancellation
pub async fn resume_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<(StatusCode, Json<SubscriptionStatusResponse>), ApiError> {
    let ctx = auth_user.context()?;
    let record = state
        .store
        .set_cancel_at_period_end(ctx.tenant_id, false)
        .await?;

    log_event(
        &state,
        ctx.tenant_id,
        BillingEventBuilder::new(ctx.tenant_id, BillingEventType::CancellationRevoked)
            .actor(auth_user.user_id, ActorType::User),
    )
    .await;

    state.status_cache.invalidate(ctx.tenant_id.0);
    respond_with_record(&state, &record, auth_user.is_super_admin, StatusCode::OK)
}

/// Change plan. Entitlements snapshot forward from the new plan; history
/// keeps pointing at the old slug.
pub async fn change_plan(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<ChangePlanRequest>,
) -> Result<(StatusCode, Json<SubscriptionStatusResponse>), ApiError> {
    let ctx = auth_user.context()?;
    let plan = state.catalog.get_active(&req.plan)?;
    let record = state.store.change_plan(ctx.tenant_id, plan).await?;

    log_event(
        &state,
        ctx.tenant_id,
        BillingEventBuilder::new(ctx.tenant_id, BillingEventType::PlanChanged)
            .data(serde_json::json!({ "to_plan": plan.slug }))
            .actor(auth_user.user_id, ActorType::User),
    )
    .await;

    state.status_cache.invalidate(ctx.tenant_id.0);
    respond_with_record(&state, &record, auth_user.is_super_admin, StatusCode::OK)
}

/// Explicit new checkout after cancellation: the one exit from CANCELLED.
/// No fresh trial if one was already consumed.
pub async fn reactivate_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<ReactivateRequest>,
) -> Result<(StatusCode, Json<SubscriptionStatusResponse>), ApiError> {
    let ctx = auth_user.context()?;
    let plan = state.catalog.get_active(&req.plan)?;
    let decision = state
        .store
        .restart_after_checkout(ctx.tenant_id, plan, OffsetDateTime::now_utc())
        .await?;

    state
        .outbox
        .enqueue_effects(ctx.tenant_id, &decision.effects)
        .await;

    log_event(
        &state,
        ctx.tenant_id,
        BillingEventBuilder::new(ctx.tenant_id, BillingEventType::CheckoutRestarted)
            .data(serde_json::json!({
                "plan": plan.slug,
                "status": decision.record.status.to_string(),
            }))
            .actor(auth_user.user_id, ActorType::User),
    )
    .await;

    state.status_cache.invalidate(ctx.tenant_id.0);
    respond_with_record(
        &state,
        &decision.record,
        auth_user.is_super_admin,
        StatusCode::OK,
    )
}

/// Handle payment provider webhook events.
///
/// Verification happens before anything is trusted; the ack must be fast,
/// and redeliveries are harmless because processing is idempotent.
pub async fn provider_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<StatusCode, ApiError> {
    let signature = headers
        .get("provider-signature")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Provider webhook missing signature header");
            ApiError::BadRequest("Missing signature header".to_string())
        })?;

    let event = state.reconciler.verify_and_parse(&body, signature).map_err(|e| {
        tracing::warn!(error = %e, "Provider webhook rejected");
        ApiError::BadRequest("Invalid webhook signature".to_string())
    })?;

    let event_id = event.id.clone();
    state.reconciler.handle_event(event).await.map_err(|e| {
        tracing::error!(event_id = %event_id, error = %e, "Webhook processing failed");
        ApiError::Database(e.to_string())
    })?;

    Ok(StatusCode::OK)
}

fn respond_with_record(
    state: &AppState,
    record: &SubscriptionRecord,
    is_super_admin: bool,
    code: StatusCode,
) -> Result<(StatusCode, Json<SubscriptionStatusResponse>), ApiError> {
    let plan_name = state
        .catalog
        .get(&record.plan_slug)
        .map(|p| p.name.clone())?;
    let view = state_machine::status_view(record, OffsetDateTime::now_utc(), &state.machine_cfg);
    let cached = CachedStatus { view, plan_name };
    Ok((code, Json(build_response(&cached, is_super_admin))))
}

async fn log_event(state: &AppState, tenant_id: TenantId, builder: BillingEventBuilder) {
    if let Err(e) = state.events.log_event(builder).await {
        tracing::warn!(tenant_id = %tenant_id, error = %e, "Failed to log billing event");
    }
}
