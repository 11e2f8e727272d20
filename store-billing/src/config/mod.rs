//! Configuration module for store-billing.

use rust_decimal::Decimal;
use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::models::CommissionPolicy;

#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub database: DatabaseConfig,
    pub cron: CronConfig,
    pub gateway: GatewayConfig,
    pub commission: CommissionPolicy,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct CronConfig {
    /// Bearer token the scheduler must present. Empty refuses every trigger.
    pub secret: Secret<String>,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub api_url: String,
    pub api_key: Secret<String>,
    pub secret_key: Secret<String>,
    pub terminal_uid: String,
    pub cashier_uid: String,
    pub currency_code: String,
    pub request_timeout: Duration,
}

impl BillingConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let mut common = core_config::Config::load()?;
        if let Ok(level) = env::var("LOG_LEVEL") {
            common.log_level = level;
        }
        if let Ok(endpoint) = env::var("OTLP_ENDPOINT") {
            common.otlp_endpoint = Some(endpoint);
        }

        let defaults = CommissionPolicy::default();

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "store-billing".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
                min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
            },
            cron: CronConfig {
                secret: Secret::new(env::var("CRON_SECRET").unwrap_or_default()),
            },
            gateway: GatewayConfig {
                api_url: env::var("GATEWAY_API_URL")
                    .unwrap_or_else(|_| "https://restapi.payplus.co.il/api/v1.0".to_string()),
                api_key: Secret::new(env::var("GATEWAY_API_KEY").unwrap_or_default()),
                secret_key: Secret::new(env::var("GATEWAY_SECRET_KEY").unwrap_or_default()),
                terminal_uid: env::var("GATEWAY_TERMINAL_UID").unwrap_or_default(),
                cashier_uid: env::var("GATEWAY_CASHIER_UID").unwrap_or_default(),
                currency_code: env::var("GATEWAY_CURRENCY").unwrap_or_else(|_| "ILS".to_string()),
                request_timeout: Duration::from_secs(
                    env::var("GATEWAY_TIMEOUT_SECS")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(30),
                ),
            },
            commission: CommissionPolicy {
                vat_percentage: parse_decimal("COMMISSION_VAT_PERCENTAGE")?
                    .unwrap_or(defaults.vat_percentage),
                threshold: parse_decimal("COMMISSION_THRESHOLD")?.unwrap_or(defaults.threshold),
            },
        })
    }
}

fn parse_decimal(key: &str) -> Result<Option<Decimal>, AppError> {
    match env::var(key) {
        Ok(raw) => Decimal::from_str(raw.trim()).map(Some).map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("{} is not a decimal: {}", key, e))
        }),
        Err(_) => Ok(None),
    }
}
