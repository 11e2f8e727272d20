//! Shared writer for the billing transaction ledger.

use chrono::{DateTime, Utc};
use service_core::error::AppError;
use tracing::info;
use uuid::Uuid;

use super::gateway::ChargeReceipt;
use super::metrics::record_ledger_entry;
use super::repository::LedgerStore;
use crate::models::{
    BillingTransaction, ChargeBreakdown, NewBillingTransaction, TransactionStatus,
    TransactionType,
};

impl NewBillingTransaction {
    /// Entry for an approved charge.
    pub fn success(
        store_id: Uuid,
        transaction_type: TransactionType,
        breakdown: ChargeBreakdown,
        receipt: &ChargeReceipt,
        description: impl Into<String>,
        processed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            store_id,
            subscription_id: None,
            commission_charge_id: None,
            transaction_type,
            breakdown,
            status: TransactionStatus::Success,
            gateway_transaction_uid: Some(receipt.transaction_uid.clone()),
            gateway_approval_num: receipt.approval_num.clone(),
            gateway_voucher_num: receipt.voucher_num.clone(),
            description: description.into(),
            failure_reason: None,
            metadata: None,
            processed_at,
        }
    }

    /// Entry for a charge the gateway refused or never answered.
    pub fn failure(
        store_id: Uuid,
        transaction_type: TransactionType,
        breakdown: ChargeBreakdown,
        description: impl Into<String>,
        failure_reason: impl Into<String>,
        processed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            store_id,
            subscription_id: None,
            commission_charge_id: None,
            transaction_type,
            breakdown,
            status: TransactionStatus::Failed,
            gateway_transaction_uid: None,
            gateway_approval_num: None,
            gateway_voucher_num: None,
            description: description.into(),
            failure_reason: Some(failure_reason.into()),
            metadata: None,
            processed_at,
        }
    }

    pub fn for_subscription(mut self, subscription_id: Uuid) -> Self {
        self.subscription_id = Some(subscription_id);
        self
    }

    pub fn for_commission(mut self, commission_charge_id: Uuid) -> Self {
        self.commission_charge_id = Some(commission_charge_id);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Appends one immutable row per charge attempt.
pub struct Ledger<'a, L: ?Sized> {
    store: &'a L,
}

impl<'a, L> Ledger<'a, L>
where
    L: LedgerStore + ?Sized,
{
    pub fn new(store: &'a L) -> Self {
        Self { store }
    }

    pub async fn append(
        &self,
        entry: NewBillingTransaction,
    ) -> Result<BillingTransaction, AppError> {
        let transaction = self.store.append_transaction(&entry).await?;

        record_ledger_entry(entry.transaction_type.as_str(), entry.status.as_str());
        info!(
            transaction_id = %transaction.transaction_id,
            store_id = %transaction.store_id,
            kind = entry.transaction_type.as_str(),
            status = entry.status.as_str(),
            total_amount = %transaction.total_amount,
            "Ledger entry appended"
        );

        Ok(transaction)
    }
}
