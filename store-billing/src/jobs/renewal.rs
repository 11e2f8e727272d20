//! Daily subscription renewal run.
//!
//! Order of work: block expired trials, charge every due subscription, expire
//! plugin subscriptions past their end date, then expire cancelled
//! subscriptions whose paid period is over. A failure on one subscription
//! never stops the run. The subscription bulk queries are fatal; plugin
//! expiry is not, since it never touches store access.

use chrono::{DateTime, Months, NaiveDate, Utc};
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
    ChargeBreakdown, ChargeableToken, DueRenewal, NewBillingTransaction, RenewalPayment,
    TransactionType,
};
use crate::services::gateway::{ChargeMetadata, ChargeReceipt, ChargeRequest, LineItem};
use crate::services::metrics::{
    record_charged_amount, record_error, record_gateway_charge, record_job_run,
    record_stores_blocked,
};
use crate::services::{BillingStore, Ledger, PaymentGateway};

const JOB: &str = "renewal";

/// Consecutive failed renewals after which a subscription is blocked.
pub const MAX_CONSECUTIVE_FAILURES: i32 = 3;

/// What a failed renewal does to the subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Stay active and try again on the next run.
    Retry { failed_payment_count: i32 },
    /// Out of attempts: block the subscription and its store.
    Block,
}

/// Apply one more failure to a subscription that has already failed
/// `previous_failures` times in a row.
pub fn escalate(previous_failures: i32) -> Escalation {
    let failures = previous_failures.max(0) + 1;
    if failures >= MAX_CONSECUTIVE_FAILURES {
        Escalation::Block
    } else {
        Escalation::Retry {
            failed_payment_count: failures,
        }
    }
}

/// The same day one calendar month later, clamped to the month's last day.
pub fn one_month_after(day: NaiveDate) -> NaiveDate {
    day.checked_add_months(Months::new(1))
        .unwrap_or(NaiveDate::MAX)
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenewalOutcome {
    Renewed {
        total_amount: Decimal,
    },
    /// Declined, unreachable gateway or no token. The escalation was applied.
    Failed {
        reason: String,
        escalation: Escalation,
    },
    /// The gateway took the money but the follow-up writes did not all land.
    ChargedUnrecorded {
        total_amount: Decimal,
        reason: String,
    },
    /// The failure could not be recorded against the subscription.
    Error {
        reason: String,
    },
}

/// Aggregate result of one renewal run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RenewalRunSummary {
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    /// Stores that lost access this run, for any reason.
    pub blocked: usize,
    pub trials_blocked: usize,
    pub delinquent_blocked: usize,
    pub cancellations_expired: usize,
    pub plugins_expired: usize,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_charged: Decimal,
    pub errors: Vec<String>,
}

impl RenewalRunSummary {
    pub fn record(&mut self, store_id: Uuid, outcome: RenewalOutcome) {
        self.processed += 1;
        match outcome {
            RenewalOutcome::Renewed { total_amount } => {
                self.successful += 1;
                self.total_charged += total_amount;
            }
            RenewalOutcome::ChargedUnrecorded {
                total_amount,
                reason,
            } => {
                self.successful += 1;
                self.total_charged += total_amount;
                self.errors.push(store_error(store_id, &reason));
            }
            RenewalOutcome::Failed { reason, escalation } => {
                self.failed += 1;
                if escalation == Escalation::Block {
                    self.blocked += 1;
                    self.delinquent_blocked += 1;
                }
                self.errors.push(store_error(store_id, &reason));
            }
            RenewalOutcome::Error { reason } => {
                self.failed += 1;
                self.errors.push(store_error(store_id, &reason));
            }
        }
    }

    fn record_trials_blocked(&mut self, count: usize) {
        self.trials_blocked += count;
        self.blocked += count;
    }

    fn record_cancellations_expired(&mut self, count: usize) {
        self.cancellations_expired += count;
        self.blocked += count;
    }
}

/// Renews due store subscriptions against the payment gateway.
pub struct RenewalScheduler {
    store: Arc<dyn BillingStore>,
    gateway: Arc<dyn PaymentGateway>,
}

impl RenewalScheduler {
    pub fn new(store: Arc<dyn BillingStore>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { store, gateway }
    }

    /// Run the daily renewal pass as of `now`.
    #[instrument(skip(self), fields(today = %now.date_naive()))]
    pub async fn run(&self, now: DateTime<Utc>) -> Result<RenewalRunSummary, AppError> {
        let started = Instant::now();
        let result = self.execute(now).await;

        match &result {
            Ok(summary) => {
                record_job_run(JOB, "completed", started.elapsed().as_secs_f64());
                info!(
                    processed = summary.processed,
                    successful = summary.successful,
                    failed = summary.failed,
                    blocked = summary.blocked,
                    total_charged = %summary.total_charged,
                    "Renewal run completed"
                );
            }
            Err(e) => {
                record_job_run(JOB, "failed", started.elapsed().as_secs_f64());
                record_error("fatal", JOB);
                error!(error = %e, "Renewal run aborted");
            }
        }

        result
    }

    async fn execute(&self, now: DateTime<Utc>) -> Result<RenewalRunSummary, AppError> {
        let today = now.date_naive();
        let mut summary = RenewalRunSummary::default();

        let trials = self.store.expire_trials(now).await?;
        if !trials.is_empty() {
            info!(count = trials.len(), "Blocked expired trials");
            record_stores_blocked("trial_expired", trials.len());
        }
        summary.record_trials_blocked(trials.len());

        let due = self.store.find_due_renewals(today).await?;
        info!(count = due.len(), "Subscriptions due for renewal");

        let this = self;
        let mut summary = stream::iter(due)
            .fold(summary, move |mut summary, renewal| async move {
                let outcome = this.renew(&renewal, now).await;
                summary.record(renewal.store_id, outcome);
                summary
            })
            .await;

        match self.store.expire_plugin_subscriptions(now).await {
            Ok(plugins) => {
                if !plugins.is_empty() {
                    info!(count = plugins.len(), "Expired plugin subscriptions");
                }
                summary.plugins_expired = plugins.len();
            }
            Err(e) => {
                record_error("plugin_expiry", JOB);
                error!(error = %e, "Plugin subscription expiry failed");
                summary.errors.push(format!("Plugin expiry: {}", e));
            }
        }

        let expired = self.store.expire_cancelled(now).await?;
        if !expired.is_empty() {
            info!(count = expired.len(), "Expired cancelled subscriptions");
            record_stores_blocked("cancellation_expired", expired.len());
        }
        summary.record_cancellations_expired(expired.len());

        Ok(summary)
    }

    #[instrument(
        skip(self, renewal, now),
        fields(subscription_id = %renewal.subscription_id, store_id = %renewal.store_id)
    )]
    async fn renew(&self, renewal: &DueRenewal, now: DateTime<Utc>) -> RenewalOutcome {
        let breakdown =
            ChargeBreakdown::with_vat(renewal.plan_price, renewal.plan_vat_percentage);

        let Some(token) = &renewal.token else {
            record_gateway_charge("subscription", "no_token");
            warn!("No payment token on file");
            return self
                .fail(renewal, "No payment token".to_string(), None, now)
                .await;
        };

        let request = ChargeRequest {
            amount: breakdown.total_amount,
            token: token.gateway_token_uid.clone(),
            customer_reference: token.gateway_customer_uid.clone(),
            metadata: ChargeMetadata {
                store_reference: renewal.store_id.to_string(),
                purpose: format!("renewal_{}", renewal.plan_name),
            },
            line_items: vec![LineItem {
                name: format!("{} plan - monthly renewal", plan_label(&renewal.plan_name)),
                quantity: 1,
                price: breakdown.total_amount,
            }],
        };

        match self.gateway.charge(&request).await {
            Ok(receipt) => {
                record_gateway_charge("subscription", "approved");
                self.settle(renewal, token, breakdown, receipt, now).await
            }
            Err(e) => {
                record_gateway_charge("subscription", e.kind());
                warn!(error = %e, total_amount = %breakdown.total_amount, "Renewal charge failed");
                self.fail(renewal, e.to_string(), Some(breakdown), now).await
            }
        }
    }

    async fn settle(
        &self,
        renewal: &DueRenewal,
        token: &ChargeableToken,
        breakdown: ChargeBreakdown,
        receipt: ChargeReceipt,
        now: DateTime<Utc>,
    ) -> RenewalOutcome {
        record_charged_amount("subscription", breakdown.total_amount);

        let period_start = now.date_naive();
        let payment = RenewalPayment {
            subscription_id: renewal.subscription_id,
            period_start,
            period_end: one_month_after(period_start),
            paid_at: now,
            amount: breakdown.total_amount,
        };

        let mut unrecorded = Vec::new();

        if let Err(e) = self.store.record_renewal(&payment).await {
            unrecorded.push(format!("period not rolled forward: {}", e));
        }

        let entry = NewBillingTransaction::success(
            renewal.store_id,
            TransactionType::Subscription,
            breakdown,
            &receipt,
            format!("{} plan renewal", plan_label(&renewal.plan_name)),
            now,
        )
        .for_subscription(renewal.subscription_id);
        if let Err(e) = Ledger::new(&*self.store).append(entry).await {
            unrecorded.push(format!("ledger entry not written: {}", e));
        }

        if let Err(e) = self.store.touch_payment_token(token.token_id, now).await {
            warn!(error = %e, token_id = %token.token_id, "Failed to update token last use");
        }

        if unrecorded.is_empty() {
            info!(
                transaction_uid = %receipt.transaction_uid,
                total_amount = %breakdown.total_amount,
                next_payment_date = %payment.period_end,
                "Subscription renewed"
            );
            return RenewalOutcome::Renewed {
                total_amount: breakdown.total_amount,
            };
        }

        record_error("bookkeeping", JOB);
        let reason = format!(
            "charged {} (transaction {}) but {}",
            breakdown.total_amount,
            receipt.transaction_uid,
            unrecorded.join("; ")
        );
        error!(reason = %reason, "Renewal charged but not fully recorded");
        RenewalOutcome::ChargedUnrecorded {
            total_amount: breakdown.total_amount,
            reason,
        }
    }

    /// Records a failed attempt and applies the escalation rule. A ledger
    /// entry is written only when the gateway was actually called.
    async fn fail(
        &self,
        renewal: &DueRenewal,
        mut reason: String,
        attempted: Option<ChargeBreakdown>,
        now: DateTime<Utc>,
    ) -> RenewalOutcome {
        if let Some(breakdown) = attempted {
            let entry = NewBillingTransaction::failure(
                renewal.store_id,
                TransactionType::Subscription,
                breakdown,
                format!("{} plan renewal failed", plan_label(&renewal.plan_name)),
                reason.clone(),
                now,
            )
            .for_subscription(renewal.subscription_id);
            if let Err(e) = Ledger::new(&*self.store).append(entry).await {
                record_error("bookkeeping", JOB);
                error!(error = %e, "Failed to write failed renewal to ledger");
                reason = format!("{} (ledger entry not written: {})", reason, e);
            }
        }

        let escalation = escalate(renewal.failed_payment_count);
        let applied = match escalation {
            Escalation::Block => {
                self.store
                    .block_subscription(renewal.subscription_id, now)
                    .await
            }
            Escalation::Retry {
                failed_payment_count,
            } => {
                self.store
                    .record_failed_renewal(renewal.subscription_id, failed_payment_count, now)
                    .await
            }
        };

        if let Err(e) = applied {
            record_error("escalation", JOB);
            error!(error = %e, "Failed to record renewal failure");
            return RenewalOutcome::Error {
                reason: format!("{}; failure not recorded: {}", reason, e),
            };
        }

        if escalation == Escalation::Block {
            record_stores_blocked("delinquent", 1);
            warn!(
                failures = MAX_CONSECUTIVE_FAILURES,
                "Subscription blocked after consecutive failed renewals"
            );
        }

        RenewalOutcome::Failed { reason, escalation }
    }
}

/// `pro` -> `Pro`.
fn plan_label(plan_name: &str) -> String {
    let mut chars = plan_name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
