#![allow(dead_code)]

pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use secrecy::Secret;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use store_billing::config::{BillingConfig, CronConfig, DatabaseConfig, GatewayConfig};
use store_billing::models::{
    CommissionCharge, CommissionPeriod, CommissionPolicy, CommissionStatus, Order, PaymentToken,
    Plugin, PluginSubscription, PluginSubscriptionStatus, Store, Subscription, SubscriptionPlan,
    SubscriptionStatus, MONTHLY_CHARGE_TYPE,
};
use store_billing::services::{
    ChargeReceipt, ChargeRequest, FixedClock, GatewayError, InMemoryBillingStore, PaymentGateway,
};
use store_billing::startup::Application;
use uuid::Uuid;

pub const CRON_SECRET: &str = "test-cron-secret";

pub fn d(s: &str) -> Decimal {
    Decimal::from_str(s).expect("valid decimal")
}

pub fn date(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).expect("valid date")
}

/// Noon UTC on the given day.
pub fn noon(day: NaiveDate) -> DateTime<Utc> {
    FixedClock::on(day).0
}

pub fn at(day: NaiveDate, hour: u32, minute: u32) -> DateTime<Utc> {
    day.and_time(NaiveTime::from_hms_opt(hour, minute, 0).expect("valid time"))
        .and_utc()
}

/// Gateway double: approves every token unless told to decline it, and
/// remembers every request it saw.
#[derive(Default)]
pub struct ScriptedGateway {
    declined: Mutex<HashSet<String>>,
    calls: Mutex<Vec<ChargeRequest>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decline(&self, token: &str) {
        self.declined.lock().unwrap().insert(token.to_string());
    }

    pub fn approve(&self, token: &str) {
        self.declined.lock().unwrap().remove(token);
    }

    pub fn calls(&self) -> Vec<ChargeRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn charged_amounts(&self) -> Vec<Decimal> {
        self.calls().iter().map(|c| c.amount).collect()
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeReceipt, GatewayError> {
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(request.clone());
            calls.len()
        };

        if self.declined.lock().unwrap().contains(&request.token) {
            return Err(GatewayError::Declined {
                code: 4,
                description: "Card declined".to_string(),
            });
        }

        Ok(ChargeReceipt {
            transaction_uid: format!("txn-{}", attempt),
            approval_num: Some(format!("appr-{}", attempt)),
            voucher_num: Some(format!("vouch-{}", attempt)),
        })
    }
}

/// In-memory store and scripted gateway shared by a test.
pub struct World {
    pub store: Arc<InMemoryBillingStore>,
    pub gateway: Arc<ScriptedGateway>,
}

impl World {
    pub fn new() -> Self {
        Self {
            store: Arc::new(InMemoryBillingStore::new()),
            gateway: Arc::new(ScriptedGateway::new()),
        }
    }

    pub fn plan(&self, name: &str, price: &str, commission_rate: &str) -> SubscriptionPlan {
        let plan = SubscriptionPlan {
            plan_id: Uuid::new_v4(),
            name: name.to_string(),
            price: d(price),
            vat_percentage: d("18"),
            commission_percentage: d(commission_rate),
        };
        self.store.seed_plan(plan.clone());
        plan
    }

    pub fn store(&self) -> Uuid {
        let store_id = Uuid::new_v4();
        self.store.seed_store(Store {
            store_id,
            name: format!("store-{}", &store_id.to_string()[..8]),
            is_billing_current: true,
        });
        store_id
    }

    /// Seeds a store with a subscription shaped by `configure`.
    pub fn subscribed_store(
        &self,
        plan: &SubscriptionPlan,
        status: SubscriptionStatus,
        configure: impl FnOnce(&mut Subscription),
    ) -> Uuid {
        let store_id = self.store();
        let now = Utc::now();
        let mut subscription = Subscription {
            subscription_id: Uuid::new_v4(),
            store_id,
            plan_id: plan.plan_id,
            status: status.as_str().to_string(),
            trial_ends_at: None,
            current_period_start: None,
            current_period_end: None,
            next_payment_date: None,
            last_payment_date: None,
            last_payment_amount: None,
            last_payment_status: None,
            failed_payment_count: 0,
            cancel_at_period_end: false,
            created_utc: now,
            updated_utc: now,
        };
        configure(&mut subscription);
        self.store.seed_subscription(subscription);
        store_id
    }

    /// Active subscription due on `due`.
    pub fn due_store(&self, plan: &SubscriptionPlan, due: NaiveDate, failed_payment_count: i32) -> Uuid {
        self.subscribed_store(plan, SubscriptionStatus::Active, |s| {
            s.current_period_end = Some(due);
            s.next_payment_date = Some(due);
            s.failed_payment_count = failed_payment_count;
        })
    }

    /// Primary active token; its gateway uid is returned.
    pub fn token(&self, store_id: Uuid) -> PaymentToken {
        let token = PaymentToken {
            token_id: Uuid::new_v4(),
            store_id,
            gateway_token_uid: format!("tok-{}", store_id),
            gateway_customer_uid: Some(format!("cust-{}", store_id)),
            is_primary: true,
            is_active: true,
            last_used_at: None,
        };
        self.store.seed_token(token.clone());
        token
    }

    /// Installed plugin with one subscription; returns the subscription.
    pub fn plugin(
        &self,
        store_id: Uuid,
        status: PluginSubscriptionStatus,
        end_date: Option<NaiveDate>,
    ) -> PluginSubscription {
        let plugin = Plugin {
            plugin_id: Uuid::new_v4(),
            store_id,
            slug: "upsell".to_string(),
            is_active: true,
        };
        self.store.seed_plugin(plugin.clone());

        let subscription = PluginSubscription {
            plugin_subscription_id: Uuid::new_v4(),
            store_id,
            plugin_id: plugin.plugin_id,
            status: status.as_str().to_string(),
            monthly_price: d("29"),
            end_date,
            is_active: status == PluginSubscriptionStatus::Active,
            updated_utc: noon(date(2024, 1, 1)),
        };
        self.store.seed_plugin_subscription(subscription.clone());
        subscription
    }

    pub fn order(&self, store_id: Uuid, total: &str, financial_status: &str, created_at: DateTime<Utc>) {
        self.store.seed_order(Order {
            order_id: Uuid::new_v4(),
            store_id,
            total_price: d(total),
            financial_status: financial_status.to_string(),
            created_at,
        });
    }

    /// Calculated 1% commission for February 2024 with the given gross total.
    pub fn calculated_commission(&self, store_id: Uuid, total_amount: &str) -> CommissionCharge {
        self.calculated_commission_at(store_id, total_amount, "0.01")
    }

    pub fn calculated_commission_at(
        &self,
        store_id: Uuid,
        total_amount: &str,
        rate: &str,
    ) -> CommissionCharge {
        let total = d(total_amount);
        let vat = (total * d("18") / d("118")).round_dp(2);
        let amount = total - vat;
        let period = february();
        let charge = CommissionCharge {
            commission_charge_id: Uuid::new_v4(),
            store_id,
            period_start: period.start,
            period_end: period.end,
            charge_type: MONTHLY_CHARGE_TYPE.to_string(),
            total_orders: 10,
            total_sales: amount / d(rate),
            commission_rate: d(rate),
            commission_amount: amount,
            vat_amount: vat,
            total_amount: total,
            status: CommissionStatus::Calculated.as_str().to_string(),
            calculated_at: noon(date(2024, 3, 1)),
            charged_at: None,
            updated_utc: noon(date(2024, 3, 1)),
        };
        self.store.seed_commission(charge.clone());
        charge
    }

    pub fn commission(&self, commission_charge_id: Uuid) -> CommissionCharge {
        self.store
            .commissions()
            .into_iter()
            .find(|c| c.commission_charge_id == commission_charge_id)
            .expect("commission exists")
    }

    pub fn subscription(&self, store_id: Uuid) -> Subscription {
        self.store.subscription_of(store_id).expect("subscription exists")
    }

    pub fn is_billing_current(&self, store_id: Uuid) -> bool {
        self.store.store(store_id).expect("store exists").is_billing_current
    }
}

pub fn february() -> CommissionPeriod {
    CommissionPeriod::new(date(2024, 2, 1), date(2024, 2, 29))
}

pub fn policy() -> CommissionPolicy {
    CommissionPolicy::default()
}

pub fn test_config() -> BillingConfig {
    BillingConfig {
        common: service_core::config::Config {
            port: 0,
            ..Default::default()
        },
        service_name: "store-billing-test".to_string(),
        service_version: "test".to_string(),
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 1,
            min_connections: 1,
        },
        cron: CronConfig {
            secret: Secret::new(CRON_SECRET.to_string()),
        },
        gateway: GatewayConfig {
            api_url: "http://127.0.0.1:1".to_string(),
            api_key: Secret::new("key".to_string()),
            secret_key: Secret::new("secret".to_string()),
            terminal_uid: "terminal".to_string(),
            cashier_uid: "cashier".to_string(),
            currency_code: "ILS".to_string(),
            request_timeout: Duration::from_secs(5),
        },
        commission: CommissionPolicy::default(),
    }
}

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub world: World,
    pub client: reqwest::Client,
}

impl TestApp {
    /// Spawn the HTTP app with the clock pinned to noon UTC on `today`.
    pub async fn spawn_on(today: NaiveDate) -> Self {
        let world = World::new();

        let app = Application::build_with(
            test_config(),
            world.store.clone(),
            world.gateway.clone(),
            Arc::new(FixedClock::on(today)),
        )
        .await
        .expect("Failed to build test application");

        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for HTTP server to be ready by polling health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            world,
            client,
        }
    }

    pub async fn trigger(&self, path: &str) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.address, path))
            .bearer_auth(CRON_SECRET)
            .send()
            .await
            .expect("Failed to execute request")
    }
}
