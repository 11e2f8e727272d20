pub mod clock;
pub mod database;
pub mod gateway;
pub mod ledger;
pub mod memory;
pub mod metrics;
pub mod payplus;
pub mod repository;

pub use clock::{Clock, FixedClock, SystemClock};
pub use database::PgBillingStore;
pub use gateway::{
    ChargeMetadata, ChargeReceipt, ChargeRequest, GatewayError, LineItem, PaymentGateway,
};
pub use ledger::Ledger;
pub use memory::InMemoryBillingStore;
pub use metrics::{get_metrics, init_metrics};
pub use payplus::PayPlusGateway;
pub use repository::{BillingStore, CommissionStore, LedgerStore, PluginStore, SubscriptionStore};
