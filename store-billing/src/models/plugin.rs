//! Add-on plugins a store installs and the subscriptions that pay for them.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Plugin subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginSubscriptionStatus {
    Pending,
    Active,
    Cancelled,
    Expired,
    Failed,
}

impl PluginSubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginSubscriptionStatus::Pending => "pending",
            PluginSubscriptionStatus::Active => "active",
            PluginSubscriptionStatus::Cancelled => "cancelled",
            PluginSubscriptionStatus::Expired => "expired",
            PluginSubscriptionStatus::Failed => "failed",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "active" => PluginSubscriptionStatus::Active,
            "cancelled" => PluginSubscriptionStatus::Cancelled,
            "expired" => PluginSubscriptionStatus::Expired,
            "failed" => PluginSubscriptionStatus::Failed,
            _ => PluginSubscriptionStatus::Pending,
        }
    }

    /// Statuses whose end date still has to be enforced.
    pub fn runs_out(&self) -> bool {
        matches!(
            self,
            PluginSubscriptionStatus::Active | PluginSubscriptionStatus::Cancelled
        )
    }
}

/// Plugin installed on a store.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Plugin {
    pub plugin_id: Uuid,
    pub store_id: Uuid,
    pub slug: String,
    pub is_active: bool,
}

/// Paid subscription to a plugin. A cancelled one stays usable until `end_date`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PluginSubscription {
    pub plugin_subscription_id: Uuid,
    pub store_id: Uuid,
    pub plugin_id: Uuid,
    pub status: String,
    pub monthly_price: Decimal,
    pub end_date: Option<NaiveDate>,
    pub is_active: bool,
    pub updated_utc: DateTime<Utc>,
}

impl PluginSubscription {
    pub fn status(&self) -> PluginSubscriptionStatus {
        PluginSubscriptionStatus::from_string(&self.status)
    }
}

/// Plugin subscription the renewal run just expired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct ExpiredPlugin {
    pub plugin_subscription_id: Uuid,
    pub store_id: Uuid,
    pub plugin_id: Uuid,
}
