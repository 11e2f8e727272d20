//! Store subscription model.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trial,
    Active,
    Blocked,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Trial => "trial",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Blocked => "blocked",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "trial" => SubscriptionStatus::Trial,
            "blocked" => SubscriptionStatus::Blocked,
            "cancelled" => SubscriptionStatus::Cancelled,
            "expired" => SubscriptionStatus::Expired,
            _ => SubscriptionStatus::Active,
        }
    }

    /// Whether a store on this status keeps its storefront running.
    ///
    /// `stores.is_billing_current` is derived from this and nothing else. A
    /// cancelled subscription keeps access until its period runs out and it
    /// becomes `Expired`.
    pub fn grants_store_access(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Trial | SubscriptionStatus::Active | SubscriptionStatus::Cancelled
        )
    }
}

/// Outcome of the most recent renewal attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
        }
    }
}

/// Plan a store subscribes to.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SubscriptionPlan {
    pub plan_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub vat_percentage: Decimal,
    /// Fraction of paid sales owed as commission (`0.005` = 0.5%).
    pub commission_percentage: Decimal,
}

/// Store subscription, one per store.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub subscription_id: Uuid,
    pub store_id: Uuid,
    pub plan_id: Uuid,
    pub status: String,
    pub trial_ends_at: Option<NaiveDate>,
    pub current_period_start: Option<NaiveDate>,
    pub current_period_end: Option<NaiveDate>,
    pub next_payment_date: Option<NaiveDate>,
    pub last_payment_date: Option<DateTime<Utc>>,
    pub last_payment_amount: Option<Decimal>,
    pub last_payment_status: Option<String>,
    pub failed_payment_count: i32,
    pub cancel_at_period_end: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Subscription {
    pub fn status(&self) -> SubscriptionStatus {
        SubscriptionStatus::from_string(&self.status)
    }
}

/// Saved gateway credential of a store.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentToken {
    pub token_id: Uuid,
    pub store_id: Uuid,
    pub gateway_token_uid: String,
    pub gateway_customer_uid: Option<String>,
    pub is_primary: bool,
    pub is_active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// The primary active token a charge is made against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeableToken {
    pub token_id: Uuid,
    pub gateway_token_uid: String,
    pub gateway_customer_uid: Option<String>,
}

/// Active subscription whose next payment is due, joined to its plan and token.
#[derive(Debug, Clone)]
pub struct DueRenewal {
    pub subscription_id: Uuid,
    pub store_id: Uuid,
    pub plan_name: String,
    pub plan_price: Decimal,
    pub plan_vat_percentage: Decimal,
    pub failed_payment_count: i32,
    pub next_payment_date: NaiveDate,
    pub token: Option<ChargeableToken>,
}

/// Period rollover written after a successful renewal charge.
#[derive(Debug, Clone)]
pub struct RenewalPayment {
    pub subscription_id: Uuid,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub paid_at: DateTime<Utc>,
    pub amount: Decimal,
}
