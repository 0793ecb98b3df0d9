//! Slotwise Billing
//!
//! The subscription lifecycle and entitlement-enforcement core: a
//! time-driven state machine reconciled against payment-provider events,
//! plus the gate every tenant-scoped write consults before doing work.

pub mod catalog;
pub mod error;
pub mod events;
pub mod gate;
pub mod invariants;
pub mod notify;
pub mod reconciler;
pub mod state_machine;
pub mod subscription;
pub mod sweep;
pub mod usage;

pub use catalog::{FeatureSchemaVersion, Plan, PlanCatalog, PlanFeatures, ReminderChannel};
pub use error::{BillingError, BillingResult};
pub use events::{ActorType, BillingEventBuilder, BillingEventLogger, BillingEventType};
pub use gate::{EntitlementGate, ReservationOutcome, TenantContext};
pub use invariants::{InvariantChecker, InvariantCheckSummary};
pub use notify::NotificationOutbox;
pub use reconciler::{ProviderConfig, ProviderEvent, WebhookReconciler};
pub use state_machine::{
    NotificationClass, ProviderEventKind, StateMachineConfig, StatusView,
    DEFAULT_GRACE_PERIOD_DAYS,
};
pub use subscription::{SubscriptionRecord, SubscriptionStore};
pub use sweep::{PeriodicSweeper, SweepConfig, SweepReport};
pub use usage::{ResourceUsage, UsageCounterStore};
