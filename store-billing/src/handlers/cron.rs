//! Scheduler-facing trigger endpoints.
//!
//! Both routes accept GET and POST and sit behind the cron bearer secret.
//! Per-store failures are reported inside a successful response; only a
//! failure of the job as a whole turns into an error status.

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;

use crate::jobs::{
    run_commission_schedule, CommissionCalculator, CommissionCollector, CommissionRunSummary,
    CommissionSchedule, RenewalRunSummary, RenewalScheduler,
};
use crate::startup::AppState;

#[derive(Debug, Serialize)]
pub struct CronResponse<T> {
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day_of_month: Option<u32>,
    pub results: T,
}

/// Query flags forcing a commission pass on an unscheduled day.
#[derive(Debug, Default, Deserialize)]
pub struct CommissionTrigger {
    #[serde(default)]
    pub calculate: Option<String>,
    #[serde(default)]
    pub charge: Option<String>,
}

fn is_set(flag: &Option<String>) -> bool {
    flag.as_deref() == Some("true")
}

#[tracing::instrument(skip(state))]
pub async fn run_billing(
    State(state): State<AppState>,
) -> Result<Json<CronResponse<RenewalRunSummary>>, AppError> {
    let now = state.clock.now();
    tracing::info!(today = %now.date_naive(), "Renewal run triggered");

    let scheduler = RenewalScheduler::new(state.store.clone(), state.gateway.clone());
    let results = scheduler.run(now).await?;

    Ok(Json(CronResponse {
        success: true,
        timestamp: now,
        day_of_month: None,
        results,
    }))
}

#[tracing::instrument(skip(state))]
pub async fn run_commissions(
    State(state): State<AppState>,
    Query(trigger): Query<CommissionTrigger>,
) -> Result<Json<CronResponse<CommissionRunSummary>>, AppError> {
    let now = state.clock.now();
    let day_of_month = now.day();
    let schedule =
        CommissionSchedule::for_day(day_of_month, is_set(&trigger.calculate), is_set(&trigger.charge));
    tracing::info!(
        day_of_month = day_of_month,
        calculate = schedule.calculate,
        charge = ?schedule.charge,
        "Commission run triggered"
    );

    let policy = state.config.commission;
    let calculator = CommissionCalculator::new(state.store.clone(), policy);
    let collector = CommissionCollector::new(state.store.clone(), state.gateway.clone(), policy);
    let results = run_commission_schedule(&calculator, &collector, schedule, now).await?;

    Ok(Json(CronResponse {
        success: true,
        timestamp: now,
        day_of_month: Some(day_of_month),
        results,
    }))
}
