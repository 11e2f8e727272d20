//! Sales commission model.

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::money::ChargeBreakdown;
use super::subscription::ChargeableToken;

/// Charge type written by the monthly calculation.
pub const MONTHLY_CHARGE_TYPE: &str = "monthly";

/// Commission charge status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionStatus {
    Calculated,
    Charged,
    Failed,
}

impl CommissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionStatus::Calculated => "calculated",
            CommissionStatus::Charged => "charged",
            CommissionStatus::Failed => "failed",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "charged" => CommissionStatus::Charged,
            "failed" => CommissionStatus::Failed,
            _ => CommissionStatus::Calculated,
        }
    }
}

/// Which calculated charges a charging pass collects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeMode {
    /// Every calculated charge.
    Full,
    /// Only calculated charges at or above the policy threshold.
    Threshold,
}

/// Deployment-wide commission settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommissionPolicy {
    /// VAT added on top of every commission, in percent.
    pub vat_percentage: Decimal,
    /// Minimum total collected by a mid-month threshold pass.
    pub threshold: Decimal,
}

impl Default for CommissionPolicy {
    fn default() -> Self {
        Self {
            vat_percentage: Decimal::from(18),
            threshold: Decimal::from(5000),
        }
    }
}

/// Closed accounting period, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl CommissionPeriod {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// The calendar month before the one containing `today`.
    pub fn previous_month(today: NaiveDate) -> Self {
        let this_month = today.with_day(1).unwrap_or(today);
        let start = this_month
            .checked_sub_months(Months::new(1))
            .unwrap_or(this_month);
        let end = this_month.pred_opt().unwrap_or(this_month);
        Self { start, end }
    }

    /// Whether an instant falls anywhere within the period's days.
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        let day = instant.date_naive();
        day >= self.start && day <= self.end
    }

    /// Human readable range used in gateway line items and ledger descriptions.
    pub fn label(&self) -> String {
        format!(
            "{} - {}",
            self.start.format("%d.%m.%Y"),
            self.end.format("%d.%m.%Y")
        )
    }
}

/// Stored commission charge.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CommissionCharge {
    pub commission_charge_id: Uuid,
    pub store_id: Uuid,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub charge_type: String,
    pub total_orders: i64,
    pub total_sales: Decimal,
    pub commission_rate: Decimal,
    pub commission_amount: Decimal,
    pub vat_amount: Decimal,
    pub total_amount: Decimal,
    pub status: String,
    pub calculated_at: DateTime<Utc>,
    pub charged_at: Option<DateTime<Utc>>,
    pub updated_utc: DateTime<Utc>,
}

impl CommissionCharge {
    pub fn status(&self) -> CommissionStatus {
        CommissionStatus::from_string(&self.status)
    }

    pub fn period(&self) -> CommissionPeriod {
        CommissionPeriod::new(self.period_start, self.period_end)
    }
}

/// Input for recording a freshly calculated commission.
#[derive(Debug, Clone)]
pub struct NewCommissionCharge {
    pub store_id: Uuid,
    pub period: CommissionPeriod,
    pub total_orders: i64,
    pub total_sales: Decimal,
    pub commission_rate: Decimal,
    pub breakdown: ChargeBreakdown,
    pub calculated_at: DateTime<Utc>,
}

/// Store on a plan that takes a cut of sales.
#[derive(Debug, Clone, FromRow)]
pub struct CommissionableStore {
    pub store_id: Uuid,
    pub commission_rate: Decimal,
}

/// Paid order totals of one store over a period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromRow)]
pub struct SalesSummary {
    pub total_orders: i64,
    pub total_sales: Decimal,
}

/// Calculated commission awaiting collection, joined to the store's token.
#[derive(Debug, Clone)]
pub struct PendingCommission {
    pub commission_charge_id: Uuid,
    pub store_id: Uuid,
    pub period: CommissionPeriod,
    pub total_sales: Decimal,
    pub commission_amount: Decimal,
    pub vat_amount: Decimal,
    pub total_amount: Decimal,
    pub token: Option<ChargeableToken>,
}

impl PendingCommission {
    /// Commission actually taken as a share of sales, in percent with one decimal.
    pub fn effective_rate_percent(&self) -> Decimal {
        if self.total_sales.is_zero() {
            return Decimal::ZERO;
        }
        (self.commission_amount / self.total_sales * Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero)
    }

    pub fn breakdown(&self) -> ChargeBreakdown {
        ChargeBreakdown {
            amount: self.commission_amount,
            vat_amount: self.vat_amount,
            total_amount: self.total_amount,
        }
    }
}
