//! Persistence boundary of the billing jobs.
//!
//! Each job owns the rows of its phase: the renewal scheduler writes
//! subscriptions and tokens, the commission jobs write commission charges,
//! and both append to the ledger. Status-changing subscription writes also
//! refresh `stores.is_billing_current` in the same unit of work and stamp
//! `updated_utc` with the instant the run was given.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::{
    BillingTransaction, CommissionCharge, CommissionPeriod, CommissionableStore, DueRenewal,
    ExpiredPlugin, NewBillingTransaction, NewCommissionCharge, PendingCommission, RenewalPayment,
    SalesSummary,
};

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Block every trial that ended before `now`'s date; returns the affected stores.
    async fn expire_trials(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, AppError>;

    /// Active, non-cancelling subscriptions with `next_payment_date <= today`,
    /// oldest due first.
    async fn find_due_renewals(&self, today: NaiveDate) -> Result<Vec<DueRenewal>, AppError>;

    /// Roll the period forward and clear the failure streak.
    async fn record_renewal(&self, payment: &RenewalPayment) -> Result<(), AppError>;

    /// Set `failed_payment_count` and mark the last payment as failed.
    async fn record_failed_renewal(
        &self,
        subscription_id: Uuid,
        failed_payment_count: i32,
        failed_at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    /// Block a delinquent subscription and revoke its store.
    async fn block_subscription(
        &self,
        subscription_id: Uuid,
        blocked_at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    /// Expire cancelled subscriptions whose period ended before `now`'s date.
    async fn expire_cancelled(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, AppError>;

    async fn touch_payment_token(
        &self,
        token_id: Uuid,
        used_at: DateTime<Utc>,
    ) -> Result<(), AppError>;
}

/// Add-on plugin subscriptions of a store.
#[async_trait]
pub trait PluginStore: Send + Sync {
    /// Expire active or cancelled plugin subscriptions whose end date is
    /// before `now`'s date and switch their plugins off.
    async fn expire_plugin_subscriptions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExpiredPlugin>, AppError>;
}

#[async_trait]
pub trait CommissionStore: Send + Sync {
    /// Stores with an active subscription on a plan with a positive commission rate.
    async fn find_commissionable_stores(&self) -> Result<Vec<CommissionableStore>, AppError>;

    async fn commission_exists(
        &self,
        store_id: Uuid,
        period: &CommissionPeriod,
    ) -> Result<bool, AppError>;

    /// Count and sum of paid or partially paid orders placed within the period.
    async fn summarize_sales(
        &self,
        store_id: Uuid,
        period: &CommissionPeriod,
    ) -> Result<SalesSummary, AppError>;

    async fn insert_commission(
        &self,
        input: &NewCommissionCharge,
    ) -> Result<CommissionCharge, AppError>;

    /// Calculated charges with `total_amount >= min_total` (all when `None`),
    /// largest first.
    async fn find_pending_commissions(
        &self,
        min_total: Option<Decimal>,
    ) -> Result<Vec<PendingCommission>, AppError>;

    async fn mark_commission_charged(
        &self,
        commission_charge_id: Uuid,
        charged_at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    async fn mark_commission_failed(
        &self,
        commission_charge_id: Uuid,
        failed_at: DateTime<Utc>,
    ) -> Result<(), AppError>;
}

/// Append-only ledger; rows are never updated or deleted.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn append_transaction(
        &self,
        entry: &NewBillingTransaction,
    ) -> Result<BillingTransaction, AppError>;
}

/// Everything the billing jobs persist.
#[async_trait]
pub trait BillingStore: SubscriptionStore + PluginStore + CommissionStore + LedgerStore {
    async fn health_check(&self) -> Result<(), AppError>;
}
