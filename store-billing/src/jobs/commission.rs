//! Monthly commission calculation.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::store_error;
use crate::models::{
    ChargeBreakdown, CommissionPeriod, CommissionPolicy, CommissionableStore,
    NewCommissionCharge,
};
use crate::services::metrics::{record_error, record_job_run};
use crate::services::BillingStore;

const JOB: &str = "commission_calculation";

#[derive(Debug, Clone, PartialEq)]
pub enum CalculationOutcome {
    Calculated { total_amount: Decimal },
    AlreadyCalculated,
    NoSales,
    Error { reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommissionCalculationSummary {
    pub calculated: usize,
    pub skipped_existing: usize,
    pub skipped_no_sales: usize,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_commission: Decimal,
    pub errors: Vec<String>,
}

impl CommissionCalculationSummary {
    pub fn record(&mut self, store_id: Uuid, outcome: CalculationOutcome) {
        match outcome {
            CalculationOutcome::Calculated { total_amount } => {
                self.calculated += 1;
                self.total_commission += total_amount;
            }
            CalculationOutcome::AlreadyCalculated => self.skipped_existing += 1,
            CalculationOutcome::NoSales => self.skipped_no_sales += 1,
            CalculationOutcome::Error { reason } => {
                self.errors.push(store_error(store_id, &reason));
            }
        }
    }
}

/// Computes what each commission-paying store owes for a closed period.
///
/// At most one charge is ever recorded per store and period, so re-running a
/// period only fills in stores that were missed.
pub struct CommissionCalculator {
    store: Arc<dyn BillingStore>,
    policy: CommissionPolicy,
}

impl CommissionCalculator {
    pub fn new(store: Arc<dyn BillingStore>, policy: CommissionPolicy) -> Self {
        Self { store, policy }
    }

    #[instrument(skip(self, now), fields(period = %period.label()))]
    pub async fn run(
        &self,
        period: CommissionPeriod,
        now: DateTime<Utc>,
    ) -> Result<CommissionCalculationSummary, AppError> {
        let started = Instant::now();

        let stores = match self.store.find_commissionable_stores().await {
            Ok(stores) => stores,
            Err(e) => {
                record_job_run(JOB, "failed", started.elapsed().as_secs_f64());
                record_error("fatal", JOB);
                error!(error = %e, "Commission calculation aborted");
                return Err(e);
            }
        };
        info!(count = stores.len(), "Stores with commission plans");

        let this = self;
        let summary = stream::iter(stores)
            .fold(
                CommissionCalculationSummary::default(),
                move |mut summary, store| async move {
                    let outcome = this.calculate(&store, &period, now).await;
                    summary.record(store.store_id, outcome);
                    summary
                },
            )
            .await;

        record_job_run(JOB, "completed", started.elapsed().as_secs_f64());
        info!(
            calculated = summary.calculated,
            skipped_existing = summary.skipped_existing,
            skipped_no_sales = summary.skipped_no_sales,
            total_commission = %summary.total_commission,
            errors = summary.errors.len(),
            "Commission calculation completed"
        );

        Ok(summary)
    }

    #[instrument(skip(self, store, period, now), fields(store_id = %store.store_id))]
    async fn calculate(
        &self,
        store: &CommissionableStore,
        period: &CommissionPeriod,
        now: DateTime<Utc>,
    ) -> CalculationOutcome {
        match self.try_calculate(store, period, now).await {
            Ok(outcome) => outcome,
            Err(AppError::Conflict(_)) => CalculationOutcome::AlreadyCalculated,
            Err(e) => {
                record_error("calculation", JOB);
                warn!(error = %e, "Commission calculation failed for store");
                CalculationOutcome::Error {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn try_calculate(
        &self,
        store: &CommissionableStore,
        period: &CommissionPeriod,
        now: DateTime<Utc>,
    ) -> Result<CalculationOutcome, AppError> {
        if self.store.commission_exists(store.store_id, period).await? {
            return Ok(CalculationOutcome::AlreadyCalculated);
        }

        let sales = self.store.summarize_sales(store.store_id, period).await?;
        if sales.total_sales <= Decimal::ZERO {
            return Ok(CalculationOutcome::NoSales);
        }

        let breakdown = ChargeBreakdown::commission(
            sales.total_sales,
            store.commission_rate,
            self.policy.vat_percentage,
        );

        let charge = self
            .store
            .insert_commission(&NewCommissionCharge {
                store_id: store.store_id,
                period: *period,
                total_orders: sales.total_orders,
                total_sales: sales.total_sales,
                commission_rate: store.commission_rate,
                breakdown,
                calculated_at: now,
            })
            .await?;

        info!(
            commission_charge_id = %charge.commission_charge_id,
            total_orders = sales.total_orders,
            total_sales = %sales.total_sales,
            commission_amount = %breakdown.amount,
            total_amount = %breakdown.total_amount,
            "Commission calculated"
        );

        Ok(CalculationOutcome::Calculated {
            total_amount: breakdown.total_amount,
        })
    }
}
