//! Commission collection against stored payment tokens.

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
    ChargeMode, CommissionPolicy, NewBillingTransaction, PendingCommission, TransactionType,
};
use crate::services::gateway::{ChargeMetadata, ChargeReceipt, ChargeRequest, LineItem};
use crate::services::metrics::{
    record_charged_amount, record_error, record_gateway_charge, record_job_run,
};
use crate::services::{BillingStore, Ledger, PaymentGateway};

const JOB: &str = "commission_charging";

#[derive(Debug, Clone, PartialEq)]
pub enum CollectionOutcome {
    Charged { total_amount: Decimal },
    /// Charged, but the commission row or ledger entry was not updated.
    ChargedUnrecorded { total_amount: Decimal, reason: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommissionChargeSummary {
    pub charged: usize,
    pub failed: usize,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_charged: Decimal,
    pub errors: Vec<String>,
}

impl CommissionChargeSummary {
    pub fn record(&mut self, store_id: Uuid, outcome: CollectionOutcome) {
        match outcome {
            CollectionOutcome::Charged { total_amount } => {
                self.charged += 1;
                self.total_charged += total_amount;
            }
            CollectionOutcome::ChargedUnrecorded {
                total_amount,
                reason,
            } => {
                self.charged += 1;
                self.total_charged += total_amount;
                self.errors.push(store_error(store_id, &reason));
            }
            CollectionOutcome::Failed { reason } => {
                self.failed += 1;
                self.errors.push(store_error(store_id, &reason));
            }
        }
    }
}

/// Collects calculated commissions, largest first.
pub struct CommissionCollector {
    store: Arc<dyn BillingStore>,
    gateway: Arc<dyn PaymentGateway>,
    policy: CommissionPolicy,
}

impl CommissionCollector {
    pub fn new(
        store: Arc<dyn BillingStore>,
        gateway: Arc<dyn PaymentGateway>,
        policy: CommissionPolicy,
    ) -> Self {
        Self {
            store,
            gateway,
            policy,
        }
    }

    #[instrument(skip(self, now))]
    pub async fn run(
        &self,
        mode: ChargeMode,
        now: DateTime<Utc>,
    ) -> Result<CommissionChargeSummary, AppError> {
        let started = Instant::now();

        let min_total = match mode {
            ChargeMode::Full => None,
            ChargeMode::Threshold => Some(self.policy.threshold),
        };

        let pending = match self.store.find_pending_commissions(min_total).await {
            Ok(pending) => pending,
            Err(e) => {
                record_job_run(JOB, "failed", started.elapsed().as_secs_f64());
                record_error("fatal", JOB);
                error!(error = %e, "Commission charging aborted");
                return Err(e);
            }
        };
        info!(count = pending.len(), "Commission charges to collect");

        let this = self;
        let summary = stream::iter(pending)
            .fold(
                CommissionChargeSummary::default(),
                move |mut summary, commission| async move {
                    let outcome = this.collect(&commission, now).await;
                    summary.record(commission.store_id, outcome);
                    summary
                },
            )
            .await;

        record_job_run(JOB, "completed", started.elapsed().as_secs_f64());
        info!(
            charged = summary.charged,
            failed = summary.failed,
            total_charged = %summary.total_charged,
            "Commission charging completed"
        );

        Ok(summary)
    }

    #[instrument(
        skip(self, commission, now),
        fields(
            commission_charge_id = %commission.commission_charge_id,
            store_id = %commission.store_id
        )
    )]
    async fn collect(&self, commission: &PendingCommission, now: DateTime<Utc>) -> CollectionOutcome {
        // Left calculated so the next full pass picks it up once a card is saved.
        let Some(token) = &commission.token else {
            record_gateway_charge("commission", "no_token");
            warn!("No payment token on file");
            return CollectionOutcome::Failed {
                reason: "No payment token".to_string(),
            };
        };

        let request = ChargeRequest {
            amount: commission.total_amount,
            token: token.gateway_token_uid.clone(),
            customer_reference: token.gateway_customer_uid.clone(),
            metadata: ChargeMetadata {
                store_reference: commission.store_id.to_string(),
                purpose: format!("commission_{}", commission.commission_charge_id),
            },
            line_items: vec![LineItem {
                name: description(commission),
                quantity: 1,
                price: commission.total_amount,
            }],
        };

        match self.gateway.charge(&request).await {
            Ok(receipt) => {
                record_gateway_charge("commission", "approved");
                self.settle(commission, receipt, now).await
            }
            Err(e) => {
                record_gateway_charge("commission", e.kind());
                warn!(error = %e, total_amount = %commission.total_amount, "Commission charge failed");
                self.fail(commission, e.to_string(), now).await
            }
        }
    }

    async fn settle(
        &self,
        commission: &PendingCommission,
        receipt: ChargeReceipt,
        now: DateTime<Utc>,
    ) -> CollectionOutcome {
        record_charged_amount("commission", commission.total_amount);

        let mut unrecorded = Vec::new();

        if let Err(e) = self
            .store
            .mark_commission_charged(commission.commission_charge_id, now)
            .await
        {
            unrecorded.push(format!("charge not marked: {}", e));
        }

        let entry = NewBillingTransaction::success(
            commission.store_id,
            TransactionType::Commission,
            commission.breakdown(),
            &receipt,
            description(commission),
            now,
        )
        .for_commission(commission.commission_charge_id)
        .with_metadata(serde_json::json!({
            "commission_charge_id": commission.commission_charge_id,
            "total_sales": commission.total_sales,
            "period_start": commission.period.start,
            "period_end": commission.period.end,
        }));
        if let Err(e) = Ledger::new(&*self.store).append(entry).await {
            unrecorded.push(format!("ledger entry not written: {}", e));
        }

        if unrecorded.is_empty() {
            info!(
                transaction_uid = %receipt.transaction_uid,
                total_amount = %commission.total_amount,
                "Commission charged"
            );
            return CollectionOutcome::Charged {
                total_amount: commission.total_amount,
            };
        }

        record_error("bookkeeping", JOB);
        let reason = format!(
            "charged {} (transaction {}) but {}",
            commission.total_amount,
            receipt.transaction_uid,
            unrecorded.join("; ")
        );
        error!(reason = %reason, "Commission charged but not fully recorded");
        CollectionOutcome::ChargedUnrecorded {
            total_amount: commission.total_amount,
            reason,
        }
    }

    /// Marks the charge failed (terminal) and records the attempt.
    async fn fail(
        &self,
        commission: &PendingCommission,
        mut reason: String,
        now: DateTime<Utc>,
    ) -> CollectionOutcome {
        if let Err(e) = self
            .store
            .mark_commission_failed(commission.commission_charge_id, now)
            .await
        {
            record_error("bookkeeping", JOB);
            error!(error = %e, "Failed to mark commission charge failed");
            reason = format!("{} (charge not marked failed: {})", reason, e);
        }

        let entry = NewBillingTransaction::failure(
            commission.store_id,
            TransactionType::Commission,
            commission.breakdown(),
            description(commission),
            reason.clone(),
            now,
        )
        .for_commission(commission.commission_charge_id);
        if let Err(e) = Ledger::new(&*self.store).append(entry).await {
            record_error("bookkeeping", JOB);
            error!(error = %e, "Failed to write failed commission to ledger");
            reason = format!("{} (ledger entry not written: {})", reason, e);
        }

        CollectionOutcome::Failed { reason }
    }
}

/// e.g. `Sales commission (1.0%) - 01.02.2024 - 29.02.2024`.
fn description(commission: &PendingCommission) -> String {
    format!(
        "Sales commission ({:.1}%) - {}",
        commission.effective_rate_percent(),
        commission.period.label()
    )
}
