//! Common types used across Slotwise

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

// =============================================================================
// ID Wrappers
// =============================================================================

/// Tenant ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub Uuid);

impl TenantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TenantId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Subscription ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SubscriptionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Subscription lifecycle status
///
/// Transitions between these states are owned exclusively by the state
/// machine in the billing crate. `Cancelled` is terminal except for an
/// explicit new checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Suspended,
    Cancelled,
}

impl SubscriptionStatus {
    /// Terminal states are never re-evaluated by the sweeper.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether the tenant row must carry `suspended = true` in this status.
    pub fn requires_tenant_suspension(&self) -> bool {
        matches!(self, Self::Suspended | Self::Cancelled)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionStatus::Trialing => write!(f, "trialing"),
            SubscriptionStatus::Active => write!(f, "active"),
            SubscriptionStatus::PastDue => write!(f, "past_due"),
            SubscriptionStatus::Suspended => write!(f, "suspended"),
            SubscriptionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trialing" => Ok(Self::Trialing),
            "active" => Ok(Self::Active),
            "past_due" => Ok(Self::PastDue),
            "suspended" => Ok(Self::Suspended),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown subscription status: {}", other)),
        }
    }
}

/// Usage-limited resource kinds
///
/// Closed enum: an unknown resource kind fails at the parse boundary as a
/// caller bug, never as a business-level denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Bookings created in the current billing period (cumulative)
    Bookings,
    /// Active employee seats (standing count, not cumulative)
    Employees,
    /// SMS sent in the current billing period (cumulative, never decremented)
    Sms,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [Self::Bookings, Self::Employees, Self::Sms];

    /// Cumulative kinds count events within a billing period; standing kinds
    /// are recomputed from live rows on every check.
    pub fn is_standing_count(&self) -> bool {
        matches!(self, Self::Employees)
    }

    /// Whether a compensating decrement is permitted for this kind.
    pub fn allows_decrement(&self) -> bool {
        matches!(self, Self::Bookings)
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Bookings => write!(f, "bookings"),
            ResourceKind::Employees => write!(f, "employees"),
            ResourceKind::Sms => write!(f, "sms"),
        }
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bookings" => Ok(Self::Bookings),
            "employees" => Ok(Self::Employees),
            "sms" => Ok(Self::Sms),
            other => Err(format!("unknown resource kind: {}", other)),
        }
    }
}

/// A plan limit: either a finite count or unlimited.
///
/// Stored as a nullable integer (NULL = unlimited) in the plans table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Limit {
    Limited(i64),
    Unlimited,
}

impl Limit {
    pub fn from_db(value: Option<i64>) -> Self {
        match value {
            Some(n) => Self::Limited(n),
            None => Self::Unlimited,
        }
    }

    pub fn to_db(self) -> Option<i64> {
        match self {
            Self::Limited(n) => Some(n),
            Self::Unlimited => None,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, Self::Unlimited)
    }

    /// Remaining headroom given a current count. `None` means unlimited.
    pub fn remaining(&self, current: i64) -> Option<i64> {
        match self {
            Self::Limited(limit) => Some((limit - current).max(0)),
            Self::Unlimited => None,
        }
    }

    /// Whether `current + delta` fits within this limit.
    pub fn permits(&self, current: i64, delta: i64) -> bool {
        match self {
            Self::Limited(limit) => current + delta <= *limit,
            Self::Unlimited => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for s in [
            SubscriptionStatus::Trialing,
            SubscriptionStatus::Active,
            SubscriptionStatus::PastDue,
            SubscriptionStatus::Suspended,
            SubscriptionStatus::Cancelled,
        ] {
            assert_eq!(s.to_string().parse::<SubscriptionStatus>().unwrap(), s);
        }
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert!("paused".parse::<SubscriptionStatus>().is_err());
    }

    #[test]
    fn test_terminal_and_suspension_flags() {
        assert!(SubscriptionStatus::Cancelled.is_terminal());
        assert!(!SubscriptionStatus::Suspended.is_terminal());
        assert!(SubscriptionStatus::Suspended.requires_tenant_suspension());
        assert!(SubscriptionStatus::Cancelled.requires_tenant_suspension());
        assert!(!SubscriptionStatus::PastDue.requires_tenant_suspension());
    }

    #[test]
    fn test_resource_kind_parsing() {
        assert_eq!("bookings".parse::<ResourceKind>().unwrap(), ResourceKind::Bookings);
        assert!("widgets".parse::<ResourceKind>().is_err());
        assert!(ResourceKind::Employees.is_standing_count());
        assert!(ResourceKind::Bookings.allows_decrement());
        assert!(!ResourceKind::Sms.allows_decrement());
    }

    #[test]
    fn test_limit_arithmetic() {
        let l = Limit::Limited(100);
        assert_eq!(l.remaining(40), Some(60));
        assert_eq!(l.remaining(120), Some(0));
        assert!(l.permits(99, 1));
        assert!(!l.permits(100, 1));
        assert!(Limit::Unlimited.permits(i64::MAX - 1, 1));
        assert_eq!(Limit::Unlimited.remaining(1_000_000), None);
        assert_eq!(Limit::from_db(None), Limit::Unlimited);
        assert_eq!(Limit::from_db(Some(5)).to_db(), Some(5));
    }
}
