//! API routes

pub mod admin;
pub mod billing;
pub mod health;
pub mod usage;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{auth::require_auth, state::AppState};

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health checks at root level for infrastructure monitoring
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::ready));

    // Webhook ingress is authenticated by signature, not by bearer token
    let webhook_routes = Router::new().route("/webhooks/payments", post(billing::provider_webhook));

    let api_routes = Router::new()
        .route(
            "/billing/subscription",
            get(billing::get_subscription_status).post(billing::create_subscription),
        )
        .route("/billing/cancel", post(billing::cancel_subscription))
        .route("/billing/resume", post(billing::resume_subscription))
        .route("/billing/plan", post(billing::change_plan))
        .route("/billing/reactivate", post(billing::reactivate_subscription))
        .route("/usage", get(usage::get_usage))
        .route("/entitlements/reserve", post(usage::reserve_usage))
        .route("/entitlements/release", post(usage::release_usage))
        .route("/admin/invariants", get(admin::run_invariant_checks))
        .route("/admin/tenants/:tenant_id/status", get(admin::get_tenant_status))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(health_routes)
        .merge(webhook_routes)
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
