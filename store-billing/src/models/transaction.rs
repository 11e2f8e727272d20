//! Billing transaction ledger model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::money::ChargeBreakdown;

/// What a ledger entry was charged for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Subscription,
    Commission,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Subscription => "subscription",
            TransactionType::Commission => "commission",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "commission" => TransactionType::Commission,
            _ => TransactionType::Subscription,
        }
    }
}

/// Outcome of a charge attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Success,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Success => "success",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "success" => TransactionStatus::Success,
            _ => TransactionStatus::Failed,
        }
    }
}

/// Immutable ledger row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BillingTransaction {
    pub transaction_id: Uuid,
    pub store_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub commission_charge_id: Option<Uuid>,
    pub transaction_type: String,
    pub amount: Decimal,
    pub vat_amount: Decimal,
    pub total_amount: Decimal,
    pub status: String,
    pub gateway_transaction_uid: Option<String>,
    pub gateway_approval_num: Option<String>,
    pub gateway_voucher_num: Option<String>,
    pub description: String,
    pub failure_reason: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub processed_at: DateTime<Utc>,
}

impl BillingTransaction {
    pub fn transaction_type(&self) -> TransactionType {
        TransactionType::from_string(&self.transaction_type)
    }

    pub fn status(&self) -> TransactionStatus {
        TransactionStatus::from_string(&self.status)
    }
}

/// Input for appending a ledger row.
#[derive(Debug, Clone)]
pub struct NewBillingTransaction {
    pub store_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub commission_charge_id: Option<Uuid>,
    pub transaction_type: TransactionType,
    pub breakdown: ChargeBreakdown,
    pub status: TransactionStatus,
    pub gateway_transaction_uid: Option<String>,
    pub gateway_approval_num: Option<String>,
    pub gateway_voucher_num: Option<String>,
    pub description: String,
    pub failure_reason: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub processed_at: DateTime<Utc>,
}
