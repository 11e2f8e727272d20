//! Scheduled billing jobs.

pub mod collection;
pub mod commission;
pub mod dispatch;
pub mod renewal;

pub use collection::{CollectionOutcome, CommissionChargeSummary, CommissionCollector};
pub use commission::{CalculationOutcome, CommissionCalculationSummary, CommissionCalculator};
pub use dispatch::{run_commission_schedule, CommissionRunSummary, CommissionSchedule};
pub use renewal::{
    escalate, Escalation, RenewalOutcome, RenewalRunSummary, RenewalScheduler,
    MAX_CONSECUTIVE_FAILURES,
};

use uuid::Uuid;

/// Per-store line in a job's error list.
pub(crate) fn store_error(store_id: Uuid, reason: &str) -> String {
    format!("Store {}: {}", store_id, reason)
}
