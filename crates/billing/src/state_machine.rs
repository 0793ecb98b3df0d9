//! Subscription state machine
//!
//! Pure decision logic: given a subscription record and the current time (or
//! a provider event), compute the state the record should be in and the side
//! effects that follow. Nothing here touches the database; callers persist
//! the returned record and apply the effects.
//!
//! Expected business outcomes (trial expired, payment failed) are inputs,
//! not errors: every function below is total over valid records.

use serde::Serialize;
use slotwise_shared::types::SubscriptionStatus;
use time::{Date, Duration, Month, OffsetDateTime};

use crate::catalog::Plan;
use crate::subscription::SubscriptionRecord;

/// Default grace period after a failed payment, in days.
/// One global value, never plan-specific.
pub const DEFAULT_GRACE_PERIOD_DAYS: i64 = 3;

/// Tunable knobs for the state machine
#[derive(Debug, Clone, Copy)]
pub struct StateMachineConfig {
    pub grace_period_days: i64,
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self {
            grace_period_days: DEFAULT_GRACE_PERIOD_DAYS,
        }
    }
}

/// Internal transition vocabulary the reconciler maps provider events into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderEventKind {
    PaymentSucceeded,
    PaymentFailed,
    SubscriptionCancelled,
    TrialWillEnd,
}

impl std::fmt::Display for ProviderEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderEventKind::PaymentSucceeded => write!(f, "payment_succeeded"),
            ProviderEventKind::PaymentFailed => write!(f, "payment_failed"),
            ProviderEventKind::SubscriptionCancelled => write!(f, "subscription_cancelled"),
            ProviderEventKind::TrialWillEnd => write!(f, "trial_will_end"),
        }
    }
}

/// Notification classes the core can decide to fire.
/// Rendering and delivery are somebody else's problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationClass {
    TrialEnding,
    TrialEnded,
    PaymentFailed,
    SubscriptionSuspended,
    SubscriptionCancelled,
    SubscriptionReactivated,
}

impl std::fmt::Display for NotificationClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationClass::TrialEnding => write!(f, "trial_ending"),
            NotificationClass::TrialEnded => write!(f, "trial_ended"),
            NotificationClass::PaymentFailed => write!(f, "payment_failed"),
            NotificationClass::SubscriptionSuspended => write!(f, "subscription_suspended"),
            NotificationClass::SubscriptionCancelled => write!(f, "subscription_cancelled"),
            NotificationClass::SubscriptionReactivated => write!(f, "subscription_reactivated"),
        }
    }
}

/// Side effects a transition carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    Notify(NotificationClass),
    SuspendTenant { reason: &'static str },
    UnsuspendTenant,
}

/// Outcome of evaluating a record: the updated copy plus effects.
/// `changed == false` means a pure no-op (the record is byte-identical).
#[derive(Debug, Clone)]
pub struct Decision {
    pub record: SubscriptionRecord,
    pub effects: Vec<SideEffect>,
    pub changed: bool,
}

impl Decision {
    fn noop(record: &SubscriptionRecord) -> Self {
        Self {
            record: record.clone(),
            effects: Vec::new(),
            changed: false,
        }
    }
}

/// Wall-clock-only transitions: trial expiry, grace expiry, scheduled
/// cancellation at period end. This is what the sweeper applies; it never
/// needs provider input, so a lost webhook cannot stall forward progress.
pub fn evaluate_clock(
    record: &SubscriptionRecord,
    now: OffsetDateTime,
    cfg: &StateMachineConfig,
) -> Decision {
    let mut next = record.clone();
    let mut effects = Vec::new();

    match record.status {
        SubscriptionStatus::Trialing => {
            let Some(trial_end) = record.trial_end else {
                return Decision::noop(record);
            };
            if now < trial_end {
                return Decision::noop(record);
            }
            // Trial over with no successful first payment (a charge would
            // have moved us to ACTIVE already): start the grace clock.
            next.status = SubscriptionStatus::PastDue;
            next.trial_consumed = true;
            next.grace_started_at = Some(now);
            effects.push(SideEffect::Notify(NotificationClass::TrialEnded));
        }
        SubscriptionStatus::PastDue => {
            // Missing grace clock on a PAST_DUE record: start it now so the
            // record cannot stall, rather than suspending on a guess.
            let Some(grace_started_at) = record.grace_started_at else {
                next.grace_started_at = Some(now);
                return Decision {
                    record: next,
                    effects,
                    changed: true,
                };
            };
            if now - grace_started_at < Duration::days(cfg.grace_period_days) {
                return Decision::noop(record);
            }
            next.status = SubscriptionStatus::Suspended;
            effects.push(SideEffect::SuspendTenant {
                reason: "payment_required",
            });
            effects.push(SideEffect::Notify(NotificationClass::SubscriptionSuspended));
        }
        SubscriptionStatus::Active => {
            if !(record.cancel_at_period_end && now >= record.current_period_end) {
                return Decision::noop(record);
            }
            next.status = SubscriptionStatus::Cancelled;
            effects.push(SideEffect::SuspendTenant { reason: "cancelled" });
            effects.push(SideEffect::Notify(NotificationClass::SubscriptionCancelled));
        }
        // Leaving SUSPENDED or CANCELLED takes a provider event or an
        // explicit new checkout, never the clock.
        SubscriptionStatus::Suspended | SubscriptionStatus::Cancelled => {
            return Decision::noop(record);
        }
    }

    Decision {
        record: next,
        effects,
        changed: true,
    }
}

/// Provider-sourced transitions. `occurred_at` is the provider's own event
/// timestamp; renewed periods are anchored to it, not to processing time.
pub fn apply_provider_event(
    record: &SubscriptionRecord,
    kind: ProviderEventKind,
    occurred_at: OffsetDateTime,
) -> Decision {
    match kind {
        ProviderEventKind::TrialWillEnd => {
            // Advisory only; no state change.
            Decision {
                record: record.clone(),
                effects: vec![SideEffect::Notify(NotificationClass::TrialEnding)],
                changed: false,
            }
        }
        ProviderEventKind::PaymentSucceeded => apply_payment_succeeded(record, occurred_at),
        ProviderEventKind::PaymentFailed => apply_payment_failed(record, occurred_at),
        ProviderEventKind::SubscriptionCancelled => {
            if record.status == SubscriptionStatus::Cancelled {
                return Decision::noop(record);
            }
            let mut next = record.clone();
            next.status = SubscriptionStatus::Cancelled;
            Decision {
                record: next,
                effects: vec![
                    SideEffect::SuspendTenant { reason: "cancelled" },
                    SideEffect::Notify(NotificationClass::SubscriptionCancelled),
                ],
                changed: true,
            }
        }
    }
}

fn apply_payment_succeeded(record: &SubscriptionRecord, occurred_at: OffsetDateTime) -> Decision {
    let mut next = record.clone();
    let mut effects = Vec::new();

    // A paid charge always opens a fresh billing period anchored to the
    // charge timestamp and clears any payment-failure bookkeeping.
    next.current_period_start = occurred_at;
    next.current_period_end = add_one_month(occurred_at);
    next.grace_started_at = None;
    next.last_payment_error = None;
    next.last_payment_error_at = None;

    match record.status {
        SubscriptionStatus::Trialing => {
            next.status = SubscriptionStatus::Active;
            next.trial_consumed = true;
        }
        SubscriptionStatus::Active => {
            // Renewal charge; status unchanged.
        }
        SubscriptionStatus::PastDue => {
            next.status = SubscriptionStatus::Active;
        }
        SubscriptionStatus::Suspended => {
            // Customer paid via the provider portal while blocked.
            next.status = SubscriptionStatus::Active;
            effects.push(SideEffect::UnsuspendTenant);
            effects.push(SideEffect::Notify(NotificationClass::SubscriptionReactivated));
        }
        SubscriptionStatus::Cancelled => {
            // A charge against a cancelled subscription means the customer
            // completed a fresh checkout at the provider.
            next.status = SubscriptionStatus::Active;
            next.cancel_at_period_end = false;
            effects.push(SideEffect::UnsuspendTenant);
            effects.push(SideEffect::Notify(NotificationClass::SubscriptionReactivated));
        }
    }

    Decision {
        record: next,
        effects,
        changed: true,
    }
}

fn apply_payment_failed(record: &SubscriptionRecord, occurred_at: OffsetDateTime) -> Decision {
    match record.status {
        SubscriptionStatus::Active | SubscriptionStatus::Trialing => {
            let mut next = record.clone();
            next.status = SubscriptionStatus::PastDue;
            next.grace_started_at = Some(occurred_at);
            next.last_payment_error = Some("renewal charge failed".to_string());
            next.last_payment_error_at = Some(occurred_at);
            if record.status == SubscriptionStatus::Trialing {
                next.trial_consumed = true;
                next.last_payment_error = Some("initial charge failed".to_string());
            }
            Decision {
                record: next,
                effects: vec![SideEffect::Notify(NotificationClass::PaymentFailed)],
                changed: true,
            }
        }
        SubscriptionStatus::PastDue | SubscriptionStatus::Suspended => {
            // Retry failed; keep the grace clock where it is.
            let mut next = record.clone();
            next.last_payment_error = Some("retry charge failed".to_string());
            next.last_payment_error_at = Some(occurred_at);
            Decision {
                record: next,
                effects: Vec::new(),
                changed: true,
            }
        }
        SubscriptionStatus::Cancelled => Decision::noop(record),
    }
}

/// Restart a cancelled subscription after an explicit new checkout.
/// Plan-dependent: a fresh trial only if one was never consumed.
pub fn restart_for_checkout(
    record: &SubscriptionRecord,
    plan: &Plan,
    now: OffsetDateTime,
) -> Decision {
    let mut next = record.clone();
    let mut effects = vec![SideEffect::UnsuspendTenant];

    next.plan_slug = plan.slug.clone();
    next.cancel_at_period_end = false;
    next.grace_started_at = None;
    next.last_payment_error = None;
    next.last_payment_error_at = None;

    if plan.trial_days > 0 && !record.trial_consumed {
        next.status = SubscriptionStatus::Trialing;
        next.trial_start = Some(now);
        next.trial_end = Some(now + Duration::days(plan.trial_days));
        next.current_period_start = now;
        next.current_period_end = now + Duration::days(plan.trial_days);
    } else {
        next.status = SubscriptionStatus::Active;
        next.trial_start = None;
        next.trial_end = None;
        next.current_period_start = now;
        next.current_period_end = add_one_month(now);
        effects.push(SideEffect::Notify(NotificationClass::SubscriptionReactivated));
    }

    Decision {
        record: next,
        effects,
        changed: true,
    }
}

/// Read-time projection of a record for the status API.
/// Every countdown is computed here from stored timestamps, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub status: SubscriptionStatus,
    pub is_trial_active: bool,
    pub remaining_trial_days: i64,
    pub trial_end: Option<OffsetDateTime>,
    pub is_past_due: bool,
    pub days_until_block: Option<i64>,
    pub current_period_end: OffsetDateTime,
    pub cancel_at_period_end: bool,
}

pub fn status_view(
    record: &SubscriptionRecord,
    now: OffsetDateTime,
    cfg: &StateMachineConfig,
) -> StatusView {
    let is_trial_active = record.status == SubscriptionStatus::Trialing
        && record.trial_end.map(|end| now < end).unwrap_or(false);

    let remaining_trial_days = if is_trial_active {
        record
            .trial_end
            .map(|end| days_remaining_ceil(end - now))
            .unwrap_or(0)
    } else {
        0
    };

    let is_past_due = record.status == SubscriptionStatus::PastDue;

    let days_until_block = match (is_past_due, record.grace_started_at) {
        (true, Some(started)) => {
            let elapsed_days = (now - started).whole_days();
            Some((cfg.grace_period_days - elapsed_days).max(0))
        }
        _ => None,
    };

    StatusView {
        status: record.status,
        is_trial_active,
        remaining_trial_days,
        trial_end: record.trial_end,
        is_past_due,
        days_until_block,
        current_period_end: record.current_period_end,
        cancel_at_period_end: record.cancel_at_period_end,
    }
}

fn days_remaining_ceil(span: Duration) -> i64 {
    let secs = span.whole_seconds();
    if secs <= 0 {
        0
    } else {
        (secs + 86_399) / 86_400
    }
}

/// One billing cycle forward, calendar-month semantics with day clamping
/// (Jan 31 renews on Feb 28/29).
pub fn add_one_month(t: OffsetDateTime) -> OffsetDateTime {
    let date = t.date();
    let (year, month) = match date.month() {
        Month::December => (date.year() + 1, Month::January),
        m => (date.year(), m.next()),
    };
    let day = date.day().min(month.length(year));
    match Date::from_calendar_date(year, month, day) {
        Ok(next) => t.replace_date(next),
        // Unreachable with a clamped day; keep a sane fallback anyway.
        Err(_) => t + Duration::days(30),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::catalog::{FeatureSchemaVersion, PlanFeatures, ReminderChannel};
    use slotwise_shared::types::Limit;
    use time::macros::datetime;
    use uuid::Uuid;

    fn record(status: SubscriptionStatus) -> SubscriptionRecord {
        let now = datetime!(2024-03-01 12:00 UTC);
        SubscriptionRecord {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            plan_slug: "starter".to_string(),
            status,
            current_period_start: now,
            current_period_end: now + Duration::days(7),
            trial_start: Some(now),
            trial_end: Some(now + Duration::days(7)),
            trial_consumed: false,
            external_customer_id: None,
            external_subscription_id: None,
            cancel_at_period_end: false,
            grace_started_at: None,
            last_payment_error: None,
            last_payment_error_at: None,
            last_event_at: None,
            last_reconciled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn plan(trial_days: i64) -> Plan {
        Plan {
            slug: "starter".to_string(),
            name: "Starter".to_string(),
            price_cents: 1900,
            currency: "USD".to_string(),
            trial_days,
            bookings_per_month: Limit::Limited(100),
            employee_seats: Limit::Limited(2),
            sms_per_month: 50,
            features: PlanFeatures {
                version: FeatureSchemaVersion::V1,
                online_payments: true,
                custom_branding: false,
                reminders: ReminderChannel::Email,
            },
            active: true,
        }
    }

    fn cfg() -> StateMachineConfig {
        StateMachineConfig::default()
    }

    #[test]
    fn test_trial_still_running_is_noop() {
        let r = record(SubscriptionStatus::Trialing);
        let d = evaluate_clock(&r, r.trial_start.unwrap() + Duration::days(3), &cfg());
        assert!(!d.changed);
        assert!(d.effects.is_empty());
    }

    #[test]
    fn test_trial_expiry_starts_grace() {
        let r = record(SubscriptionStatus::Trialing);
        let at = r.trial_end.unwrap();
        let d = evaluate_clock(&r, at, &cfg());
        assert!(d.changed);
        assert_eq!(d.record.status, SubscriptionStatus::PastDue);
        assert_eq!(d.record.grace_started_at, Some(at));
        assert!(d.record.trial_consumed);
        assert_eq!(
            d.effects,
            vec![SideEffect::Notify(NotificationClass::TrialEnded)]
        );
    }

    #[test]
    fn test_past_due_within_grace_is_noop() {
        let mut r = record(SubscriptionStatus::PastDue);
        let started = datetime!(2024-03-08 12:00 UTC);
        r.grace_started_at = Some(started);
        let d = evaluate_clock(&r, started + Duration::days(2), &cfg());
        assert!(!d.changed);
    }

    #[test]
    fn test_grace_expiry_suspends() {
        let mut r = record(SubscriptionStatus::PastDue);
        let started = datetime!(2024-03-08 12:00 UTC);
        r.grace_started_at = Some(started);
        let d = evaluate_clock(&r, started + Duration::days(3), &cfg());
        assert!(d.changed);
        assert_eq!(d.record.status, SubscriptionStatus::Suspended);
        assert!(d.effects.contains(&SideEffect::SuspendTenant {
            reason: "payment_required"
        }));
        assert!(d
            .effects
            .contains(&SideEffect::Notify(NotificationClass::SubscriptionSuspended)));
    }

    #[test]
    fn test_suspend_is_idempotent_under_resweep() {
        let mut r = record(SubscriptionStatus::PastDue);
        r.grace_started_at = Some(datetime!(2024-03-08 12:00 UTC));
        let now = datetime!(2024-03-12 12:00 UTC);

        let first = evaluate_clock(&r, now, &cfg());
        assert_eq!(first.record.status, SubscriptionStatus::Suspended);

        // Crash between sweeps: re-applying to the already-suspended record
        // is a pure no-op.
        let second = evaluate_clock(&first.record, now + Duration::hours(1), &cfg());
        assert!(!second.changed);
        assert!(second.effects.is_empty());
    }

    #[test]
    fn test_scheduled_cancellation_at_period_end() {
        let mut r = record(SubscriptionStatus::Active);
        r.cancel_at_period_end = true;
        let d = evaluate_clock(&r, r.current_period_end, &cfg());
        assert_eq!(d.record.status, SubscriptionStatus::Cancelled);
        assert!(d.effects.contains(&SideEffect::SuspendTenant { reason: "cancelled" }));
    }

    #[test]
    fn test_active_without_cancel_flag_waits_for_provider() {
        let r = record(SubscriptionStatus::Active);
        let d = evaluate_clock(&r, r.current_period_end + Duration::days(2), &cfg());
        assert!(!d.changed, "renewal is the provider's call, not the clock's");
    }

    #[test]
    fn test_clock_never_leaves_suspended_or_cancelled() {
        for status in [SubscriptionStatus::Suspended, SubscriptionStatus::Cancelled] {
            let r = record(status);
            let d = evaluate_clock(&r, datetime!(2030-01-01 0:00 UTC), &cfg());
            assert!(!d.changed);
        }
    }

    #[test]
    fn test_payment_succeeded_from_past_due_recovers() {
        let mut r = record(SubscriptionStatus::PastDue);
        r.grace_started_at = Some(datetime!(2024-03-08 12:00 UTC));
        r.last_payment_error = Some("card declined".to_string());
        let paid_at = datetime!(2024-03-09 09:30 UTC);

        let d = apply_provider_event(&r, ProviderEventKind::PaymentSucceeded, paid_at);
        assert_eq!(d.record.status, SubscriptionStatus::Active);
        assert_eq!(d.record.grace_started_at, None);
        assert_eq!(d.record.last_payment_error, None);
        assert_eq!(d.record.current_period_start, paid_at);
        assert_eq!(d.record.current_period_end, datetime!(2024-04-09 09:30 UTC));
    }

    #[test]
    fn test_payment_succeeded_from_suspended_unsuspends() {
        let r = record(SubscriptionStatus::Suspended);
        let paid_at = datetime!(2024-03-15 10:00 UTC);

        let d = apply_provider_event(&r, ProviderEventKind::PaymentSucceeded, paid_at);
        assert_eq!(d.record.status, SubscriptionStatus::Active);
        assert!(d.effects.contains(&SideEffect::UnsuspendTenant));
        assert!(d
            .effects
            .contains(&SideEffect::Notify(NotificationClass::SubscriptionReactivated)));
        // Exactly one billing cycle past the payment event's timestamp.
        assert_eq!(d.record.current_period_end, datetime!(2024-04-15 10:00 UTC));
    }

    #[test]
    fn test_payment_succeeded_replay_is_idempotent() {
        let r = record(SubscriptionStatus::PastDue);
        let paid_at = datetime!(2024-03-09 09:30 UTC);

        let once = apply_provider_event(&r, ProviderEventKind::PaymentSucceeded, paid_at);
        let twice =
            apply_provider_event(&once.record, ProviderEventKind::PaymentSucceeded, paid_at);
        assert_eq!(once.record, twice.record);
    }

    #[test]
    fn test_initial_charge_converts_trial() {
        let r = record(SubscriptionStatus::Trialing);
        let paid_at = datetime!(2024-03-05 08:00 UTC);
        let d = apply_provider_event(&r, ProviderEventKind::PaymentSucceeded, paid_at);
        assert_eq!(d.record.status, SubscriptionStatus::Active);
        assert!(d.record.trial_consumed);
    }

    #[test]
    fn test_payment_failed_on_active_starts_grace() {
        let mut r = record(SubscriptionStatus::Active);
        r.trial_consumed = true;
        let failed_at = datetime!(2024-04-01 03:00 UTC);
        let d = apply_provider_event(&r, ProviderEventKind::PaymentFailed, failed_at);
        assert_eq!(d.record.status, SubscriptionStatus::PastDue);
        assert_eq!(d.record.grace_started_at, Some(failed_at));
        assert!(d.record.last_payment_error.is_some());
        assert_eq!(
            d.effects,
            vec![SideEffect::Notify(NotificationClass::PaymentFailed)]
        );
    }

    #[test]
    fn test_payment_failed_retry_keeps_grace_clock() {
        let mut r = record(SubscriptionStatus::PastDue);
        let started = datetime!(2024-04-01 03:00 UTC);
        r.grace_started_at = Some(started);
        let d = apply_provider_event(
            &r,
            ProviderEventKind::PaymentFailed,
            started + Duration::days(1),
        );
        assert_eq!(d.record.status, SubscriptionStatus::PastDue);
        assert_eq!(d.record.grace_started_at, Some(started));
        assert!(d.effects.is_empty());
    }

    #[test]
    fn test_provider_cancellation_from_any_state() {
        for status in [
            SubscriptionStatus::Trialing,
            SubscriptionStatus::Active,
            SubscriptionStatus::PastDue,
            SubscriptionStatus::Suspended,
        ] {
            let r = record(status);
            let d = apply_provider_event(
                &r,
                ProviderEventKind::SubscriptionCancelled,
                datetime!(2024-03-20 0:00 UTC),
            );
            assert_eq!(d.record.status, SubscriptionStatus::Cancelled);
            assert!(d.effects.contains(&SideEffect::SuspendTenant { reason: "cancelled" }));
        }

        let r = record(SubscriptionStatus::Cancelled);
        let d = apply_provider_event(
            &r,
            ProviderEventKind::SubscriptionCancelled,
            datetime!(2024-03-20 0:00 UTC),
        );
        assert!(!d.changed);
    }

    #[test]
    fn test_trial_will_end_is_notify_only() {
        let r = record(SubscriptionStatus::Trialing);
        let d = apply_provider_event(
            &r,
            ProviderEventKind::TrialWillEnd,
            datetime!(2024-03-05 0:00 UTC),
        );
        assert!(!d.changed);
        assert_eq!(
            d.effects,
            vec![SideEffect::Notify(NotificationClass::TrialEnding)]
        );
    }

    #[test]
    fn test_restart_with_unconsumed_trial() {
        let r = record(SubscriptionStatus::Cancelled);
        let now = datetime!(2024-05-01 12:00 UTC);
        let d = restart_for_checkout(&r, &plan(7), now);
        assert_eq!(d.record.status, SubscriptionStatus::Trialing);
        assert_eq!(d.record.trial_end, Some(now + Duration::days(7)));
        assert!(d.effects.contains(&SideEffect::UnsuspendTenant));
    }

    #[test]
    fn test_restart_after_consumed_trial_goes_straight_to_active() {
        let mut r = record(SubscriptionStatus::Cancelled);
        r.trial_consumed = true;
        let now = datetime!(2024-05-01 12:00 UTC);
        let d = restart_for_checkout(&r, &plan(7), now);
        assert_eq!(d.record.status, SubscriptionStatus::Active);
        assert_eq!(d.record.trial_end, None);
        assert_eq!(d.record.current_period_end, datetime!(2024-06-01 12:00 UTC));
    }

    #[test]
    fn test_status_view_fresh_trial() {
        let r = record(SubscriptionStatus::Trialing);
        let view = status_view(&r, r.trial_start.unwrap(), &cfg());
        assert!(view.is_trial_active);
        assert_eq!(view.remaining_trial_days, 7);
        assert!(!view.is_past_due);
        assert_eq!(view.days_until_block, None);
    }

    #[test]
    fn test_days_until_block_counts_down_monotonically() {
        let mut r = record(SubscriptionStatus::PastDue);
        let started = datetime!(2024-03-08 12:00 UTC);
        r.grace_started_at = Some(started);

        let mut last = i64::MAX;
        for hours in [0, 12, 30, 49, 71, 72, 200] {
            let view = status_view(&r, started + Duration::hours(hours), &cfg());
            let days = view.days_until_block.unwrap();
            assert!(days <= last, "days_until_block must never increase");
            last = days;
        }
        assert_eq!(
            status_view(&r, started, &cfg()).days_until_block,
            Some(3)
        );
        assert_eq!(
            status_view(&r, started + Duration::days(5), &cfg()).days_until_block,
            Some(0)
        );
    }

    #[test]
    fn test_full_trial_to_suspension_timeline() {
        // Signup with a 7-day trial, no payment ever: day 7 the sweep moves
        // to PAST_DUE, day 10 the sweep suspends.
        let r = record(SubscriptionStatus::Trialing);
        let signup = r.trial_start.unwrap();

        let day7 = evaluate_clock(&r, signup + Duration::days(7), &cfg());
        assert_eq!(day7.record.status, SubscriptionStatus::PastDue);

        let day8 = evaluate_clock(&day7.record, signup + Duration::days(8), &cfg());
        assert!(!day8.changed);

        let day10 = evaluate_clock(&day7.record, signup + Duration::days(10), &cfg());
        assert_eq!(day10.record.status, SubscriptionStatus::Suspended);
    }

    #[test]
    fn test_add_one_month_clamps_short_months() {
        assert_eq!(
            add_one_month(datetime!(2024-01-31 10:00 UTC)),
            datetime!(2024-02-29 10:00 UTC)
        );
        assert_eq!(
            add_one_month(datetime!(2023-01-31 10:00 UTC)),
            datetime!(2023-02-28 10:00 UTC)
        );
        assert_eq!(
            add_one_month(datetime!(2024-12-15 10:00 UTC)),
            datetime!(2025-01-15 10:00 UTC)
        );
    }
}
