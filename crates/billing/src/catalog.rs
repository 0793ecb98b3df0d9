//! Plan Catalog
//!
//! Immutable lookup of plan slugs to entitlements. Plans are created by an
//! operator, never hard-deleted: deactivation only stops new subscriptions,
//! existing subscriptions keep resolving their plan for the life of the row.
//!
//! Feature flags are a closed, versioned schema. Unknown or legacy keys fail
//! validation at load time instead of silently defaulting.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use slotwise_shared::types::{Limit, ResourceKind};
use sqlx::PgPool;

use crate::error::{BillingError, BillingResult};

/// Reminder delivery channel granted by a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderChannel {
    None,
    Email,
    EmailAndSms,
}

/// Feature schema version tag. A single variant today; adding one is how an
/// entitlement schema change becomes deliberate instead of accidental.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureSchemaVersion {
    #[serde(rename = "1")]
    V1,
}

/// Versioned plan feature set
///
/// `deny_unknown_fields` makes a stray or legacy key in the plans table fail
/// catalog load rather than silently defaulting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanFeatures {
    pub version: FeatureSchemaVersion,
    pub online_payments: bool,
    pub custom_branding: bool,
    pub reminders: ReminderChannel,
}

/// A plan and its entitlement set
///
/// Immutable once referenced by a subscription. A plan change re-points the
/// subscription at another slug; it never mutates this record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub slug: String,
    pub name: String,
    pub price_cents: i64,
    pub currency: String,
    pub trial_days: i64,
    pub bookings_per_month: Limit,
    pub employee_seats: Limit,
    pub sms_per_month: i64,
    pub features: PlanFeatures,
    pub active: bool,
}

impl Plan {
    /// Limit for a resource kind. SMS is always finite.
    pub fn limit_for(&self, kind: ResourceKind) -> Limit {
        match kind {
            ResourceKind::Bookings => self.bookings_per_month,
            ResourceKind::Employees => self.employee_seats,
            ResourceKind::Sms => Limit::Limited(self.sms_per_month),
        }
    }
}

/// Raw plan row as stored
#[derive(Debug, sqlx::FromRow)]
struct PlanRow {
    slug: String,
    name: String,
    price_cents: i64,
    currency: String,
    trial_days: i64,
    bookings_per_month: Option<i64>,
    employee_seats: Option<i64>,
    sms_per_month: i64,
    features: serde_json::Value,
    active: bool,
}

impl PlanRow {
    fn validate(self) -> BillingResult<Plan> {
        if self.trial_days < 0 {
            return Err(BillingError::InvalidPlan {
                slug: self.slug,
                reason: "trial_days must be non-negative".to_string(),
            });
        }
        if self.sms_per_month < 0 {
            return Err(BillingError::InvalidPlan {
                slug: self.slug,
                reason: "sms_per_month must be non-negative".to_string(),
            });
        }

        let features: PlanFeatures =
            serde_json::from_value(self.features).map_err(|e| BillingError::InvalidPlan {
                slug: self.slug.clone(),
                reason: format!("feature schema rejected: {}", e),
            })?;

        Ok(Plan {
            slug: self.slug,
            name: self.name,
            price_cents: self.price_cents,
            currency: self.currency,
            trial_days: self.trial_days,
            bookings_per_month: Limit::from_db(self.bookings_per_month),
            employee_seats: Limit::from_db(self.employee_seats),
            sms_per_month: self.sms_per_month,
            features,
            active: self.active,
        })
    }
}

/// In-memory plan catalog, loaded once at startup
///
/// Deactivated plans stay in the catalog so past subscriptions keep
/// resolving; they are only excluded from new signups.
pub struct PlanCatalog {
    plans: HashMap<String, Plan>,
}

impl PlanCatalog {
    /// Load every plan row and validate the feature schema of each.
    /// A single malformed plan fails the whole load; an operator mistake in
    /// the catalog should be loud, not latent.
    pub async fn load(pool: &PgPool) -> BillingResult<Self> {
        let rows: Vec<PlanRow> = sqlx::query_as(
            r#"
            SELECT slug, name, price_cents, currency, trial_days,
                   bookings_per_month, employee_seats, sms_per_month,
                   features, active
            FROM plans
            ORDER BY slug
            "#,
        )
        .fetch_all(pool)
        .await?;

        let mut plans = HashMap::with_capacity(rows.len());
        for row in rows {
            let plan = row.validate()?;
            plans.insert(plan.slug.clone(), plan);
        }

        tracing::info!(plan_count = plans.len(), "Plan catalog loaded");
        Ok(Self { plans })
    }

    /// Build a catalog from already-validated plans (tests, fixtures).
    pub fn from_plans(plans: Vec<Plan>) -> Self {
        Self {
            plans: plans.into_iter().map(|p| (p.slug.clone(), p)).collect(),
        }
    }

    /// Resolve a plan by slug, active or not.
    /// A missing plan is an escalating error: a subscription referencing an
    /// unknown slug is a data fault, not a business outcome.
    pub fn get(&self, slug: &str) -> BillingResult<&Plan> {
        self.plans
            .get(slug)
            .ok_or_else(|| BillingError::PlanNotFound(slug.to_string()))
    }

    /// Resolve a plan for a new subscription; deactivated plans are rejected.
    pub fn get_active(&self, slug: &str) -> BillingResult<&Plan> {
        let plan = self.get(slug)?;
        if !plan.active {
            return Err(BillingError::PlanDeactivated(slug.to_string()));
        }
        Ok(plan)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Plan> {
        self.plans.values()
    }

    /// Soft-deactivate a plan. The row is kept for referential history.
    pub async fn deactivate(pool: &PgPool, slug: &str) -> BillingResult<()> {
        let result = sqlx::query("UPDATE plans SET active = false, updated_at = NOW() WHERE slug = $1")
            .bind(slug)
            .execute(pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(BillingError::PlanNotFound(slug.to_string()));
        }

        tracing::info!(plan = %slug, "Plan deactivated");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_plan(slug: &str, bookings: Limit, seats: Limit, trial_days: i64) -> Plan {
        Plan {
            slug: slug.to_string(),
            name: slug.to_string(),
            price_cents: 2900,
            currency: "USD".to_string(),
            trial_days,
            bookings_per_month: bookings,
            employee_seats: seats,
            sms_per_month: 100,
            features: PlanFeatures {
                version: FeatureSchemaVersion::V1,
                online_payments: true,
                custom_branding: false,
                reminders: ReminderChannel::Email,
            },
            active: true,
        }
    }

    #[test]
    fn test_feature_schema_accepts_known_keys() {
        let value = json!({
            "version": "1",
            "online_payments": true,
            "custom_branding": false,
            "reminders": "email_and_sms"
        });
        let features: PlanFeatures = serde_json::from_value(value).unwrap();
        assert!(features.online_payments);
        assert_eq!(features.reminders, ReminderChannel::EmailAndSms);
    }

    #[test]
    fn test_feature_schema_rejects_unknown_keys() {
        let value = json!({
            "version": "1",
            "online_payments": true,
            "custom_branding": false,
            "reminders": "none",
            "legacy_calendar_sync": true
        });
        assert!(serde_json::from_value::<PlanFeatures>(value).is_err());
    }

    #[test]
    fn test_feature_schema_rejects_unknown_version() {
        let value = json!({
            "version": "2",
            "online_payments": true
        });
        assert!(serde_json::from_value::<PlanFeatures>(value).is_err());
    }

    #[test]
    fn test_limit_for_each_kind() {
        let plan = test_plan("starter", Limit::Limited(100), Limit::Limited(2), 7);
        assert_eq!(plan.limit_for(ResourceKind::Bookings), Limit::Limited(100));
        assert_eq!(plan.limit_for(ResourceKind::Employees), Limit::Limited(2));
        assert_eq!(plan.limit_for(ResourceKind::Sms), Limit::Limited(100));
    }

    #[test]
    fn test_catalog_lookup() {
        let mut inactive = test_plan("legacy", Limit::Unlimited, Limit::Unlimited, 0);
        inactive.active = false;
        let catalog = PlanCatalog::from_plans(vec![
            test_plan("starter", Limit::Limited(100), Limit::Limited(2), 7),
            inactive,
        ]);

        assert!(catalog.get("starter").is_ok());
        assert!(catalog.get("legacy").is_ok(), "deactivated plans stay resolvable");
        assert!(matches!(
            catalog.get_active("legacy"),
            Err(BillingError::PlanDeactivated(_))
        ));
        assert!(matches!(
            catalog.get("missing"),
            Err(BillingError::PlanNotFound(_))
        ));
    }
}
