//! Usage read API and the entitlement checkpoint

use axum::{
    extract::{Extension, State},
    Json,
};
use serde::{Deserialize, Serialize};
use slotwise_shared::types::ResourceKind;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::{auth::AuthUser, error::ApiError, state::AppState};

/// Usage of one resource kind
#[derive(Debug, Serialize)]
pub struct ResourceUsageItem {
    pub resource: String,
    pub used: i64,
    /// null = unlimited
    pub limit: Option<i64>,
    /// null = unlimited
    pub remaining: Option<i64>,
    pub percent_used: Option<f64>,
}

/// Usage across all resource kinds for the current billing period
#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub period_start: String,
    pub period_end: String,
    pub resources: Vec<ResourceUsageItem>,
}

/// Request to reserve usage before a tenant-scoped write
#[derive(Debug, Deserialize)]
pub struct ReserveRequest {
    pub resource: String,
    /// Usually 1; bulk dispatch may reserve more
    pub delta: Option<i64>,
}

/// Outcome of a reserve check. `allowed = false` is a normal response, not
/// an error: quota exhaustion and access blocks arrive here with a message,
/// actual failures arrive as HTTP errors.
#[derive(Debug, Serialize)]
pub struct ReserveResponse {
    pub allowed: bool,
    pub current: i64,
    pub limit: Option<i64>,
    pub remaining: Option<i64>,
    pub message: Option<String>,
}

/// Request to release previously reserved usage (compensating event)
#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    pub resource: String,
    pub delta: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ReleaseResponse {
    pub count: i64,
}

fn parse_resource(raw: &str) -> Result<ResourceKind, ApiError> {
    // Unknown resource kinds are a caller bug, rejected loudly rather than
    // treated as a business denial.
    raw.parse()
        .map_err(|_| ApiError::Validation(format!("Unknown resource kind: {}", raw)))
}

/// Get current-period usage for every resource kind
pub async fn get_usage(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<UsageResponse>, ApiError> {
    let ctx = auth_user.context()?;

    let record = state
        .store
        .get_by_tenant(ctx.tenant_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    let plan = state.catalog.get(&record.plan_slug)?;

    let mut resources = Vec::with_capacity(ResourceKind::ALL.len());
    for kind in ResourceKind::ALL {
        let usage = state
            .counters
            .usage_for(
                ctx.tenant_id,
                kind,
                record.current_period_start,
                plan.limit_for(kind),
            )
            .await?;
        resources.push(ResourceUsageItem {
            resource: usage.resource.to_string(),
            used: usage.used,
            limit: usage.limit,
            remaining: usage.remaining,
            percent_used: usage.percent_used,
        });
    }

    Ok(Json(UsageResponse {
        period_start: fmt_ts(record.current_period_start),
        period_end: fmt_ts(record.current_period_end),
        resources,
    }))
}

/// The enforcement checkpoint: check the requested delta against the
/// tenant's plan and reserve it if allowed.
pub async fn reserve_usage(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<ReserveRequest>,
) -> Result<Json<ReserveResponse>, ApiError> {
    let ctx = auth_user.context()?;
    let resource = parse_resource(&req.resource)?;
    let delta = req.delta.unwrap_or(1);

    let outcome = state.gate.check_and_reserve(&ctx, resource, delta).await?;

    if !outcome.allowed {
        tracing::info!(
            tenant_id = %ctx.tenant_id,
            resource = %resource,
            delta = delta,
            "Entitlement check denied"
        );
    }

    Ok(Json(ReserveResponse {
        allowed: outcome.allowed,
        current: outcome.current,
        limit: outcome.limit,
        remaining: outcome.remaining,
        message: outcome.message,
    }))
}

/// Compensating release, e.g. a cancelled booking freeing its slot
pub async fn release_usage(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<ReleaseRequest>,
) -> Result<Json<ReleaseResponse>, ApiError> {
    let ctx = auth_user.context()?;
    let resource = parse_resource(&req.resource)?;
    let delta = req.delta.unwrap_or(1);

    let count = state.gate.release(&ctx, resource, delta).await?;

    Ok(Json(ReleaseResponse { count }))
}

fn fmt_ts(t: OffsetDateTime) -> String {
    t.format(&Rfc3339).unwrap_or_else(|_| t.to_string())
}
