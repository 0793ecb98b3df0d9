//! Shared application state

use std::sync::Arc;
use std::time::Duration;

use slotwise_billing::{
    BillingEventLogger, EntitlementGate, NotificationOutbox, PlanCatalog, ProviderConfig,
    StateMachineConfig, StatusView, SubscriptionStore, UsageCounterStore, WebhookReconciler,
};
use sqlx::PgPool;

use crate::cache::StatusCache;
use crate::config::Config;

/// Cached projection of one tenant's subscription status.
/// Identity-dependent fields (super-admin) are layered on per request.
#[derive(Debug, Clone)]
pub struct CachedStatus {
    pub view: StatusView,
    pub plan_name: String,
}

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub catalog: Arc<PlanCatalog>,
    pub store: SubscriptionStore,
    pub counters: UsageCounterStore,
    pub gate: EntitlementGate,
    pub reconciler: Arc<WebhookReconciler>,
    pub outbox: NotificationOutbox,
    pub events: BillingEventLogger,
    pub machine_cfg: StateMachineConfig,
    pub status_cache: Arc<StatusCache<CachedStatus>>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config, catalog: PlanCatalog) -> Self {
        let catalog = Arc::new(catalog);
        let machine_cfg = StateMachineConfig {
            grace_period_days: config.grace_period_days,
        };

        let store = SubscriptionStore::new(pool.clone());
        let counters = UsageCounterStore::new(pool.clone());
        let gate = EntitlementGate::new(store.clone(), counters.clone(), catalog.clone());
        let reconciler = Arc::new(WebhookReconciler::new(
            pool.clone(),
            ProviderConfig {
                webhook_secret: config.provider_webhook_secret.clone(),
            },
        ));
        let status_cache = Arc::new(StatusCache::with_ttl(Duration::from_secs(
            config.status_cache_ttl_secs,
        )));

        Self {
            outbox: NotificationOutbox::new(pool.clone()),
            events: BillingEventLogger::new(pool.clone()),
            pool,
            config: Arc::new(config),
            catalog,
            store,
            counters,
            gate,
            reconciler,
            machine_cfg,
            status_cache,
        }
    }
}
