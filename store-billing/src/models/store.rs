//! Store and order rows the billing jobs read.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Order payment state; only settled orders earn commission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinancialStatus {
    Pending,
    Paid,
    PartiallyPaid,
    Refunded,
    Voided,
}

impl FinancialStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinancialStatus::Pending => "pending",
            FinancialStatus::Paid => "paid",
            FinancialStatus::PartiallyPaid => "partially_paid",
            FinancialStatus::Refunded => "refunded",
            FinancialStatus::Voided => "voided",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "paid" => FinancialStatus::Paid,
            "partially_paid" => FinancialStatus::PartiallyPaid,
            "refunded" => FinancialStatus::Refunded,
            "voided" => FinancialStatus::Voided,
            _ => FinancialStatus::Pending,
        }
    }

    pub fn earns_commission(&self) -> bool {
        matches!(self, FinancialStatus::Paid | FinancialStatus::PartiallyPaid)
    }
}

/// Store, as far as billing is concerned.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Store {
    pub store_id: Uuid,
    pub name: String,
    /// Projection of the subscription status; never written directly.
    pub is_billing_current: bool,
}

/// Order contributing to commissionable sales.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub order_id: Uuid,
    pub store_id: Uuid,
    pub total_price: Decimal,
    pub financial_status: String,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn financial_status(&self) -> FinancialStatus {
        FinancialStatus::from_string(&self.financial_status)
    }
}
