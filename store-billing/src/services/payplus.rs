//! PayPlus payment gateway client.
//!
//! Charges stored card tokens through the PayPlus REST API
//! (`POST /Transactions/Charge`).

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use super::gateway::{ChargeReceipt, ChargeRequest, GatewayError, PaymentGateway};
use crate::config::GatewayConfig;

/// PayPlus client for token charges.
#[derive(Clone)]
pub struct PayPlusGateway {
    client: Client,
    config: GatewayConfig,
}

#[derive(Debug, Serialize)]
struct Product<'a> {
    name: &'a str,
    quantity: u32,
    #[serde(with = "rust_decimal::serde::float")]
    price: Decimal,
}

#[derive(Debug, Serialize)]
struct TokenChargeBody<'a> {
    terminal_uid: &'a str,
    cashier_uid: &'a str,
    #[serde(with = "rust_decimal::serde::float")]
    amount: Decimal,
    currency_code: &'a str,
    /// 1 = regular single charge.
    credit_terms: u8,
    use_token: bool,
    token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    customer_uid: Option<&'a str>,
    create_token: bool,
    initial_invoice: bool,
    more_info: &'a str,
    more_info_2: &'a str,
    products: Vec<Product<'a>>,
}

#[derive(Debug, Serialize)]
struct Credentials<'a> {
    api_key: &'a str,
    secret_key: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseResults {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChargeData {
    transaction_uid: String,
    #[serde(default)]
    approval_num: Option<String>,
    #[serde(default)]
    voucher_num: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChargeResponse {
    #[serde(default)]
    results: ResponseResults,
    #[serde(default)]
    data: Option<ChargeData>,
}

impl ResponseResults {
    fn is_error(&self) -> bool {
        self.status.as_deref() == Some("error")
    }

    fn code(&self) -> Option<i64> {
        self.code
            .as_ref()
            .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
    }
}

impl PayPlusGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        if !Self::has_credentials(&config) {
            tracing::warn!("PayPlus credentials missing; every charge will fail");
        }

        Ok(Self { client, config })
    }

    fn has_credentials(config: &GatewayConfig) -> bool {
        !config.api_key.expose_secret().is_empty()
            && !config.secret_key.expose_secret().is_empty()
            && !config.terminal_uid.is_empty()
    }

    /// Check if PayPlus is configured (credentials are set).
    pub fn is_configured(&self) -> bool {
        Self::has_credentials(&self.config)
    }

    fn authorization(&self) -> Result<String, GatewayError> {
        serde_json::to_string(&Credentials {
            api_key: self.config.api_key.expose_secret(),
            secret_key: self.config.secret_key.expose_secret(),
        })
        .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl PaymentGateway for PayPlusGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeReceipt, GatewayError> {
        if !self.is_configured() {
            return Err(GatewayError::NotConfigured);
        }

        let body = TokenChargeBody {
            terminal_uid: &self.config.terminal_uid,
            cashier_uid: &self.config.cashier_uid,
            amount: request.amount,
            currency_code: &self.config.currency_code,
            credit_terms: 1,
            use_token: true,
            token: &request.token,
            customer_uid: request.customer_reference.as_deref(),
            create_token: false,
            initial_invoice: true,
            more_info: &request.metadata.store_reference,
            more_info_2: &request.metadata.purpose,
            products: request
                .line_items
                .iter()
                .map(|item| Product {
                    name: &item.name,
                    quantity: item.quantity,
                    price: item.price,
                })
                .collect(),
        };

        let url = format!(
            "{}/Transactions/Charge",
            self.config.api_url.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", self.authorization()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        tracing::debug!(status = %status, "PayPlus charge response");

        let parsed: Option<ChargeResponse> = serde_json::from_str(&text).ok();

        if !status.is_success() {
            let results = parsed.map(|p| p.results).unwrap_or_default();
            return Err(GatewayError::Declined {
                code: results.code().unwrap_or(i64::from(status.as_u16())),
                description: results
                    .description
                    .unwrap_or_else(|| "PayPlus API error".to_string()),
            });
        }

        let parsed = parsed.ok_or_else(|| {
            GatewayError::InvalidResponse("response body is not valid JSON".to_string())
        })?;

        if parsed.results.is_error() {
            return Err(GatewayError::Declined {
                code: parsed.results.code().unwrap_or_default(),
                description: parsed
                    .results
                    .description
                    .unwrap_or_else(|| "Charge failed".to_string()),
            });
        }

        let data = parsed.data.ok_or_else(|| {
            GatewayError::InvalidResponse("missing transaction data".to_string())
        })?;

        tracing::info!(
            transaction_uid = %data.transaction_uid,
            amount = %request.amount,
            "PayPlus charge approved"
        );

        Ok(ChargeReceipt {
            transaction_uid: data.transaction_uid,
            approval_num: data.approval_num,
            voucher_num: data.voucher_num,
        })
    }
}
