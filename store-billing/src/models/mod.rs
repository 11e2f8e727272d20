//! Domain models for store-billing.

mod commission;
mod money;
mod plugin;
mod store;
mod subscription;
mod transaction;

pub use commission::{
    ChargeMode, CommissionCharge, CommissionPeriod, CommissionPolicy, CommissionStatus,
    CommissionableStore, NewCommissionCharge, PendingCommission, SalesSummary,
    MONTHLY_CHARGE_TYPE,
};
pub use money::{round_money, ChargeBreakdown};
pub use plugin::{ExpiredPlugin, Plugin, PluginSubscription, PluginSubscriptionStatus};
pub use store::{FinancialStatus, Order, Store};
pub use subscription::{
    ChargeableToken, DueRenewal, PaymentStatus, PaymentToken, RenewalPayment, Subscription,
    SubscriptionPlan, SubscriptionStatus,
};
pub use transaction::{
    BillingTransaction, NewBillingTransaction, TransactionStatus, TransactionType,
};
