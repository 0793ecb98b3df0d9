//! Platform admin routes
//!
//! Super-admin only: consistency checks and cross-tenant status reads.

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use slotwise_billing::{state_machine, InvariantChecker, InvariantCheckSummary};
use slotwise_shared::types::TenantId;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{auth::AuthUser, error::ApiError, state::AppState};

fn require_super_admin(auth_user: &AuthUser) -> Result<(), ApiError> {
    if !auth_user.is_super_admin {
        return Err(ApiError::Forbidden);
    }
    Ok(())
}

/// Run every billing invariant check and return the summary
pub async fn run_invariant_checks(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<InvariantCheckSummary>, ApiError> {
    require_super_admin(&auth_user)?;

    let summary = InvariantChecker::new(state.pool.clone())
        .run_all_checks()
        .await?;

    if !summary.healthy {
        tracing::warn!(
            violations = summary.violations.len(),
            "Invariant check found violations"
        );
    }

    Ok(Json(summary))
}

/// Read any tenant's subscription status view
pub async fn get_tenant_status(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_super_admin(&auth_user)?;

    let record = state
        .store
        .get_by_tenant(TenantId(tenant_id))
        .await?
        .ok_or(ApiError::NotFound)?;

    let view = state_machine::status_view(&record, OffsetDateTime::now_utc(), &state.machine_cfg);

    Ok(Json(serde_json::json!({
        "tenant_id": tenant_id,
        "plan_slug": record.plan_slug,
        "view": view,
        "last_event_at": record.last_event_at.map(|t| t.to_string()),
        "last_reconciled_at": record.last_reconciled_at.map(|t| t.to_string()),
        "last_payment_error": record.last_payment_error,
    })))
}
