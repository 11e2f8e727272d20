//! Payment gateway boundary.
//!
//! The jobs only ever charge a stored token. Any provider that can do that
//! and hand back its transaction identifiers plugs in here.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

/// One line on the gateway-issued invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineItem {
    pub name: String,
    pub quantity: u32,
    pub price: Decimal,
}

/// Free-form references echoed back by the gateway in reports.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ChargeMetadata {
    /// Store the charge belongs to.
    pub store_reference: String,
    /// What is being paid for, e.g. `renewal_pro` or `commission_<id>`.
    pub purpose: String,
}

/// Charge a saved token for `amount`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    pub amount: Decimal,
    pub token: String,
    pub customer_reference: Option<String>,
    pub metadata: ChargeMetadata,
    pub line_items: Vec<LineItem>,
}

/// Identifiers of an approved charge.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChargeReceipt {
    pub transaction_uid: String,
    pub approval_num: Option<String>,
    pub voucher_num: Option<String>,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Payment gateway credentials are not configured")]
    NotConfigured,

    #[error("Charge declined ({code}): {description}")]
    Declined { code: i64, description: String },

    #[error("Payment gateway unreachable: {0}")]
    Transport(String),

    #[error("Unexpected payment gateway response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::NotConfigured => "not_configured",
            GatewayError::Declined { .. } => "declined",
            GatewayError::Transport(_) => "transport",
            GatewayError::InvalidResponse(_) => "invalid_response",
        }
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeReceipt, GatewayError>;
}
