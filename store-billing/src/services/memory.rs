//! In-process billing store.
//!
//! Holds every table in memory behind a single mutex. Used by the integration
//! tests and for dry runs without a database. Fault switches let callers make
//! the whole store unavailable or fail individual writes.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use super::repository::{
    BillingStore, CommissionStore, LedgerStore, PluginStore, SubscriptionStore,
};
use crate::models::{
    BillingTransaction, ChargeableToken, CommissionCharge, CommissionPeriod, CommissionStatus,
    CommissionableStore, DueRenewal, ExpiredPlugin, NewBillingTransaction, NewCommissionCharge,
    Order, PaymentStatus, PaymentToken, PendingCommission, Plugin, PluginSubscription,
    PluginSubscriptionStatus, RenewalPayment, SalesSummary, Store, Subscription,
    SubscriptionPlan, SubscriptionStatus, MONTHLY_CHARGE_TYPE,
};

#[derive(Default)]
struct Faults {
    unavailable: bool,
    sales: HashSet<Uuid>,
    renewal_writes: bool,
    plugin_writes: bool,
    ledger_writes: bool,
}

#[derive(Default)]
struct Tables {
    stores: HashMap<Uuid, Store>,
    plans: HashMap<Uuid, SubscriptionPlan>,
    subscriptions: Vec<Subscription>,
    tokens: Vec<PaymentToken>,
    plugins: HashMap<Uuid, Plugin>,
    plugin_subscriptions: Vec<PluginSubscription>,
    orders: Vec<Order>,
    commissions: Vec<CommissionCharge>,
    transactions: Vec<BillingTransaction>,
    faults: Faults,
}

impl Tables {
    fn available(&self) -> Result<(), AppError> {
        if self.faults.unavailable {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "Billing store unavailable"
            )));
        }
        Ok(())
    }

    fn primary_token(&self, store_id: Uuid) -> Option<ChargeableToken> {
        self.tokens
            .iter()
            .find(|t| t.store_id == store_id && t.is_primary && t.is_active)
            .map(|t| ChargeableToken {
                token_id: t.token_id,
                gateway_token_uid: t.gateway_token_uid.clone(),
                gateway_customer_uid: t.gateway_customer_uid.clone(),
            })
    }

    fn plan(&self, plan_id: Uuid) -> Result<&SubscriptionPlan, AppError> {
        self.plans
            .get(&plan_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Plan {} not found", plan_id)))
    }

    fn subscription_mut(&mut self, subscription_id: Uuid) -> Result<&mut Subscription, AppError> {
        self.subscriptions
            .iter_mut()
            .find(|s| s.subscription_id == subscription_id)
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("Subscription {} not found", subscription_id))
            })
    }

    fn commission_mut(
        &mut self,
        commission_charge_id: Uuid,
    ) -> Result<&mut CommissionCharge, AppError> {
        self.commissions
            .iter_mut()
            .find(|c| c.commission_charge_id == commission_charge_id)
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "Commission charge {} not found",
                    commission_charge_id
                ))
            })
    }

    /// Moves every matching subscription to `to` and re-projects its store.
    fn transition_where(
        &mut self,
        to: SubscriptionStatus,
        now: DateTime<Utc>,
        matches: impl Fn(&Subscription) -> bool,
    ) -> Vec<Uuid> {
        let mut store_ids = Vec::new();
        for subscription in self.subscriptions.iter_mut().filter(|s| matches(s)) {
            subscription.status = to.as_str().to_string();
            subscription.updated_utc = now;
            store_ids.push(subscription.store_id);
        }
        self.project_store_access(&store_ids, to);
        store_ids
    }

    fn project_store_access(&mut self, store_ids: &[Uuid], status: SubscriptionStatus) {
        for store_id in store_ids {
            if let Some(store) = self.stores.get_mut(store_id) {
                store.is_billing_current = status.grants_store_access();
            }
        }
    }
}

#[derive(Default)]
pub struct InMemoryBillingStore {
    tables: Mutex<Tables>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn seed_store(&self, store: Store) {
        self.tables().stores.insert(store.store_id, store);
    }

    pub fn seed_plan(&self, plan: SubscriptionPlan) {
        self.tables().plans.insert(plan.plan_id, plan);
    }

    pub fn seed_subscription(&self, subscription: Subscription) {
        self.tables().subscriptions.push(subscription);
    }

    pub fn seed_token(&self, token: PaymentToken) {
        self.tables().tokens.push(token);
    }

    pub fn seed_plugin(&self, plugin: Plugin) {
        self.tables().plugins.insert(plugin.plugin_id, plugin);
    }

    pub fn seed_plugin_subscription(&self, subscription: PluginSubscription) {
        self.tables().plugin_subscriptions.push(subscription);
    }

    pub fn seed_order(&self, order: Order) {
        self.tables().orders.push(order);
    }

    pub fn seed_commission(&self, charge: CommissionCharge) {
        self.tables().commissions.push(charge);
    }

    /// Every call fails with a database error while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.tables().faults.unavailable = unavailable;
    }

    /// Sales aggregation for this store fails.
    pub fn fail_sales_for(&self, store_id: Uuid) {
        self.tables().faults.sales.insert(store_id);
    }

    /// Period rollover after a successful renewal fails.
    pub fn fail_renewal_writes(&self, fail: bool) {
        self.tables().faults.renewal_writes = fail;
    }

    /// Plugin subscription expiry fails.
    pub fn fail_plugin_writes(&self, fail: bool) {
        self.tables().faults.plugin_writes = fail;
    }

    /// Ledger appends fail.
    pub fn fail_ledger_writes(&self, fail: bool) {
        self.tables().faults.ledger_writes = fail;
    }

    pub fn store(&self, store_id: Uuid) -> Option<Store> {
        self.tables().stores.get(&store_id).cloned()
    }

    pub fn subscription_of(&self, store_id: Uuid) -> Option<Subscription> {
        self.tables()
            .subscriptions
            .iter()
            .find(|s| s.store_id == store_id)
            .cloned()
    }

    pub fn token(&self, token_id: Uuid) -> Option<PaymentToken> {
        self.tables()
            .tokens
            .iter()
            .find(|t| t.token_id == token_id)
            .cloned()
    }

    pub fn plugin(&self, plugin_id: Uuid) -> Option<Plugin> {
        self.tables().plugins.get(&plugin_id).cloned()
    }

    pub fn plugin_subscription(&self, plugin_subscription_id: Uuid) -> Option<PluginSubscription> {
        self.tables()
            .plugin_subscriptions
            .iter()
            .find(|s| s.plugin_subscription_id == plugin_subscription_id)
            .cloned()
    }

    pub fn commissions(&self) -> Vec<CommissionCharge> {
        self.tables().commissions.clone()
    }

    pub fn transactions(&self) -> Vec<BillingTransaction> {
        self.tables().transactions.clone()
    }
}

#[async_trait]
impl SubscriptionStore for InMemoryBillingStore {
    async fn expire_trials(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, AppError> {
        let today = now.date_naive();
        let mut tables = self.tables();
        tables.available()?;
        Ok(tables.transition_where(SubscriptionStatus::Blocked, now, |s| {
            s.status() == SubscriptionStatus::Trial
                && s.trial_ends_at.is_some_and(|ends| ends < today)
        }))
    }

    async fn find_due_renewals(&self, today: NaiveDate) -> Result<Vec<DueRenewal>, AppError> {
        let tables = self.tables();
        tables.available()?;

        let mut due = Vec::new();
        for subscription in &tables.subscriptions {
            let Some(next_payment_date) = subscription.next_payment_date else {
                continue;
            };
            if subscription.status() != SubscriptionStatus::Active
                || subscription.cancel_at_period_end
                || next_payment_date > today
            {
                continue;
            }
            let plan = tables.plan(subscription.plan_id)?;
            due.push(DueRenewal {
                subscription_id: subscription.subscription_id,
                store_id: subscription.store_id,
                plan_name: plan.name.clone(),
                plan_price: plan.price,
                plan_vat_percentage: plan.vat_percentage,
                failed_payment_count: subscription.failed_payment_count,
                next_payment_date,
                token: tables.primary_token(subscription.store_id),
            });
        }
        due.sort_by_key(|d| (d.next_payment_date, d.subscription_id));
        Ok(due)
    }

    async fn record_renewal(&self, payment: &RenewalPayment) -> Result<(), AppError> {
        let mut tables = self.tables();
        tables.available()?;
        if tables.faults.renewal_writes {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "Failed to record renewal"
            )));
        }

        let subscription = tables.subscription_mut(payment.subscription_id)?;
        subscription.current_period_start = Some(payment.period_start);
        subscription.current_period_end = Some(payment.period_end);
        subscription.next_payment_date = Some(payment.period_end);
        subscription.last_payment_date = Some(payment.paid_at);
        subscription.last_payment_amount = Some(payment.amount);
        subscription.last_payment_status = Some(PaymentStatus::Success.as_str().to_string());
        subscription.failed_payment_count = 0;
        subscription.updated_utc = payment.paid_at;
        Ok(())
    }

    async fn record_failed_renewal(
        &self,
        subscription_id: Uuid,
        failed_payment_count: i32,
        failed_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut tables = self.tables();
        tables.available()?;

        let subscription = tables.subscription_mut(subscription_id)?;
        subscription.failed_payment_count = failed_payment_count;
        subscription.last_payment_status = Some(PaymentStatus::Failed.as_str().to_string());
        subscription.updated_utc = failed_at;
        Ok(())
    }

    async fn block_subscription(
        &self,
        subscription_id: Uuid,
        blocked_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut tables = self.tables();
        tables.available()?;

        let subscription = tables.subscription_mut(subscription_id)?;
        subscription.last_payment_status = Some(PaymentStatus::Failed.as_str().to_string());
        tables.transition_where(SubscriptionStatus::Blocked, blocked_at, |s| {
            s.subscription_id == subscription_id
        });
        Ok(())
    }

    async fn expire_cancelled(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, AppError> {
        let today = now.date_naive();
        let mut tables = self.tables();
        tables.available()?;
        Ok(tables.transition_where(SubscriptionStatus::Expired, now, |s| {
            s.status() == SubscriptionStatus::Cancelled
                && s.cancel_at_period_end
                && s.current_period_end.is_some_and(|end| end < today)
        }))
    }

    async fn touch_payment_token(
        &self,
        token_id: Uuid,
        used_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut tables = self.tables();
        tables.available()?;
        if let Some(token) = tables.tokens.iter_mut().find(|t| t.token_id == token_id) {
            token.last_used_at = Some(used_at);
        }
        Ok(())
    }
}

#[async_trait]
impl PluginStore for InMemoryBillingStore {
    async fn expire_plugin_subscriptions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExpiredPlugin>, AppError> {
        let today = now.date_naive();
        let mut tables = self.tables();
        tables.available()?;
        if tables.faults.plugin_writes {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "Failed to expire plugin subscriptions"
            )));
        }

        let mut expired = Vec::new();
        for subscription in tables
            .plugin_subscriptions
            .iter_mut()
            .filter(|s| s.status().runs_out() && s.end_date.is_some_and(|end| end < today))
        {
            subscription.status = PluginSubscriptionStatus::Expired.as_str().to_string();
            subscription.is_active = false;
            subscription.updated_utc = now;
            expired.push(ExpiredPlugin {
                plugin_subscription_id: subscription.plugin_subscription_id,
                store_id: subscription.store_id,
                plugin_id: subscription.plugin_id,
            });
        }

        for plugin in &expired {
            if let Some(row) = tables.plugins.get_mut(&plugin.plugin_id) {
                row.is_active = false;
            }
        }
        Ok(expired)
    }
}

#[async_trait]
impl CommissionStore for InMemoryBillingStore {
    async fn find_commissionable_stores(&self) -> Result<Vec<CommissionableStore>, AppError> {
        let tables = self.tables();
        tables.available()?;

        let mut stores = Vec::new();
        for subscription in &tables.subscriptions {
            if subscription.status() != SubscriptionStatus::Active {
                continue;
            }
            let plan = tables.plan(subscription.plan_id)?;
            if plan.commission_percentage > Decimal::ZERO {
                stores.push(CommissionableStore {
                    store_id: subscription.store_id,
                    commission_rate: plan.commission_percentage,
                });
            }
        }
        stores.sort_by_key(|s| s.store_id);
        Ok(stores)
    }

    async fn commission_exists(
        &self,
        store_id: Uuid,
        period: &CommissionPeriod,
    ) -> Result<bool, AppError> {
        let tables = self.tables();
        tables.available()?;
        Ok(tables.commissions.iter().any(|c| {
            c.store_id == store_id
                && c.period_start == period.start
                && c.period_end == period.end
                && c.charge_type == MONTHLY_CHARGE_TYPE
        }))
    }

    async fn summarize_sales(
        &self,
        store_id: Uuid,
        period: &CommissionPeriod,
    ) -> Result<SalesSummary, AppError> {
        let tables = self.tables();
        tables.available()?;
        if tables.faults.sales.contains(&store_id) {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "Failed to summarize sales for store {}",
                store_id
            )));
        }

        Ok(tables
            .orders
            .iter()
            .filter(|o| {
                o.store_id == store_id
                    && o.financial_status().earns_commission()
                    && period.contains(o.created_at)
            })
            .fold(SalesSummary::default(), |mut summary, order| {
                summary.total_orders += 1;
                summary.total_sales += order.total_price;
                summary
            }))
    }

    async fn insert_commission(
        &self,
        input: &NewCommissionCharge,
    ) -> Result<CommissionCharge, AppError> {
        let mut tables = self.tables();
        tables.available()?;

        let duplicate = tables.commissions.iter().any(|c| {
            c.store_id == input.store_id
                && c.period() == input.period
                && c.charge_type == MONTHLY_CHARGE_TYPE
        });
        if duplicate {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Commission already recorded for store {} in {}",
                input.store_id,
                input.period.label()
            )));
        }

        let charge = CommissionCharge {
            commission_charge_id: Uuid::new_v4(),
            store_id: input.store_id,
            period_start: input.period.start,
            period_end: input.period.end,
            charge_type: MONTHLY_CHARGE_TYPE.to_string(),
            total_orders: input.total_orders,
            total_sales: input.total_sales,
            commission_rate: input.commission_rate,
            commission_amount: input.breakdown.amount,
            vat_amount: input.breakdown.vat_amount,
            total_amount: input.breakdown.total_amount,
            status: CommissionStatus::Calculated.as_str().to_string(),
            calculated_at: input.calculated_at,
            charged_at: None,
            updated_utc: input.calculated_at,
        };
        tables.commissions.push(charge.clone());
        Ok(charge)
    }

    async fn find_pending_commissions(
        &self,
        min_total: Option<Decimal>,
    ) -> Result<Vec<PendingCommission>, AppError> {
        let tables = self.tables();
        tables.available()?;

        let mut pending: Vec<PendingCommission> = tables
            .commissions
            .iter()
            .filter(|c| c.status() == CommissionStatus::Calculated)
            .filter(|c| min_total.map_or(true, |min| c.total_amount >= min))
            .map(|c| PendingCommission {
                commission_charge_id: c.commission_charge_id,
                store_id: c.store_id,
                period: c.period(),
                total_sales: c.total_sales,
                commission_amount: c.commission_amount,
                vat_amount: c.vat_amount,
                total_amount: c.total_amount,
                token: tables.primary_token(c.store_id),
            })
            .collect();
        pending.sort_by(|a, b| {
            b.total_amount
                .cmp(&a.total_amount)
                .then(a.commission_charge_id.cmp(&b.commission_charge_id))
        });
        Ok(pending)
    }

    async fn mark_commission_charged(
        &self,
        commission_charge_id: Uuid,
        charged_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut tables = self.tables();
        tables.available()?;

        let charge = tables.commission_mut(commission_charge_id)?;
        if charge.status() == CommissionStatus::Calculated {
            charge.status = CommissionStatus::Charged.as_str().to_string();
            charge.charged_at = Some(charged_at);
            charge.updated_utc = charged_at;
        }
        Ok(())
    }

    async fn mark_commission_failed(
        &self,
        commission_charge_id: Uuid,
        failed_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut tables = self.tables();
        tables.available()?;

        let charge = tables.commission_mut(commission_charge_id)?;
        if charge.status() == CommissionStatus::Calculated {
            charge.status = CommissionStatus::Failed.as_str().to_string();
            charge.updated_utc = failed_at;
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for InMemoryBillingStore {
    async fn append_transaction(
        &self,
        entry: &NewBillingTransaction,
    ) -> Result<BillingTransaction, AppError> {
        let mut tables = self.tables();
        tables.available()?;
        if tables.faults.ledger_writes {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "Failed to append transaction"
            )));
        }

        let transaction = BillingTransaction {
            transaction_id: Uuid::new_v4(),
            store_id: entry.store_id,
            subscription_id: entry.subscription_id,
            commission_charge_id: entry.commission_charge_id,
            transaction_type: entry.transaction_type.as_str().to_string(),
            amount: entry.breakdown.amount,
            vat_amount: entry.breakdown.vat_amount,
            total_amount: entry.breakdown.total_amount,
            status: entry.status.as_str().to_string(),
            gateway_transaction_uid: entry.gateway_transaction_uid.clone(),
            gateway_approval_num: entry.gateway_approval_num.clone(),
            gateway_voucher_num: entry.gateway_voucher_num.clone(),
            description: entry.description.clone(),
            failure_reason: entry.failure_reason.clone(),
            metadata: entry.metadata.clone(),
            processed_at: entry.processed_at,
        };
        tables.transactions.push(transaction.clone());
        Ok(transaction)
    }
}

#[async_trait]
impl BillingStore for InMemoryBillingStore {
    async fn health_check(&self) -> Result<(), AppError> {
        self.tables().available()
    }
}
