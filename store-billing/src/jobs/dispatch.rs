//! Day-of-month dispatch for the commission jobs.
//!
//! On the 1st the previous month is calculated and everything outstanding is
//! charged. On the 15th only charges at or above the threshold are collected.
//! Any other day does nothing unless a pass is forced.

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use tracing::info;

use super::collection::{CommissionChargeSummary, CommissionCollector};
use super::commission::{CommissionCalculationSummary, CommissionCalculator};
use crate::models::{ChargeMode, CommissionPeriod};

/// Passes to run on a given day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommissionSchedule {
    pub calculate: bool,
    pub charge: Option<ChargeMode>,
}

impl CommissionSchedule {
    /// The force flags only apply on days without a scheduled pass; a forced
    /// charge collects in full mode.
    pub fn for_day(day_of_month: u32, force_calculate: bool, force_charge: bool) -> Self {
        match day_of_month {
            1 => Self {
                calculate: true,
                charge: Some(ChargeMode::Full),
            },
            15 => Self {
                calculate: false,
                charge: Some(ChargeMode::Threshold),
            },
            _ => Self {
                calculate: force_calculate,
                charge: force_charge.then_some(ChargeMode::Full),
            },
        }
    }

    pub fn is_noop(&self) -> bool {
        !self.calculate && self.charge.is_none()
    }
}

/// Combined result of the commission passes run for one trigger.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommissionRunSummary {
    pub calculated: usize,
    pub charged: usize,
    pub failed: usize,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_commission: Decimal,
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calculation: Option<CommissionCalculationSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charging: Option<CommissionChargeSummary>,
}

impl CommissionRunSummary {
    fn absorb_calculation(&mut self, summary: CommissionCalculationSummary) {
        self.calculated += summary.calculated;
        self.errors.extend(summary.errors.iter().cloned());
        self.calculation = Some(summary);
    }

    fn absorb_charging(&mut self, summary: CommissionChargeSummary) {
        self.charged += summary.charged;
        self.failed += summary.failed;
        self.total_commission += summary.total_charged;
        self.errors.extend(summary.errors.iter().cloned());
        self.charging = Some(summary);
    }
}

/// Run whichever commission passes `schedule` asks for, calculation first.
pub async fn run_commission_schedule(
    calculator: &CommissionCalculator,
    collector: &CommissionCollector,
    schedule: CommissionSchedule,
    now: DateTime<Utc>,
) -> Result<CommissionRunSummary, AppError> {
    let mut summary = CommissionRunSummary::default();

    if schedule.is_noop() {
        info!(day_of_month = now.day(), "No commission pass scheduled today");
        return Ok(summary);
    }

    if schedule.calculate {
        let period = CommissionPeriod::previous_month(now.date_naive());
        summary.absorb_calculation(calculator.run(period, now).await?);
    }

    if let Some(mode) = schedule.charge {
        summary.absorb_charging(collector.run(mode, now).await?);
    }

    Ok(summary)
}
