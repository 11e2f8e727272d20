//! Database service for store-billing.

use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use super::metrics::DB_QUERY_DURATION;
use super::repository::{
    BillingStore, CommissionStore, LedgerStore, PluginStore, SubscriptionStore,
};
use crate::models::{
    BillingTransaction, ChargeableToken, CommissionCharge, CommissionPeriod, CommissionStatus,
    CommissionableStore, DueRenewal, ExpiredPlugin, FinancialStatus, NewBillingTransaction,
    NewCommissionCharge, PaymentStatus, PendingCommission, PluginSubscriptionStatus,
    RenewalPayment, SalesSummary, SubscriptionStatus, MONTHLY_CHARGE_TYPE,
};

const COMMISSION_COLUMNS: &str = "commission_charge_id, store_id, period_start, period_end, \
    charge_type, total_orders, total_sales, commission_rate, commission_amount, vat_amount, \
    total_amount, status, calculated_at, charged_at, updated_utc";

const TRANSACTION_COLUMNS: &str = "transaction_id, store_id, subscription_id, \
    commission_charge_id, transaction_type, amount, vat_amount, total_amount, status, \
    gateway_transaction_uid, gateway_approval_num, gateway_voucher_num, description, \
    failure_reason, metadata, processed_at";

/// Postgres-backed billing store.
#[derive(Clone)]
pub struct PgBillingStore {
    pool: PgPool,
}

#[derive(FromRow)]
struct DueRenewalRow {
    subscription_id: Uuid,
    store_id: Uuid,
    plan_name: String,
    plan_price: Decimal,
    plan_vat_percentage: Decimal,
    failed_payment_count: i32,
    next_payment_date: NaiveDate,
    token_id: Option<Uuid>,
    gateway_token_uid: Option<String>,
    gateway_customer_uid: Option<String>,
}

#[derive(FromRow)]
struct PendingCommissionRow {
    commission_charge_id: Uuid,
    store_id: Uuid,
    period_start: NaiveDate,
    period_end: NaiveDate,
    total_sales: Decimal,
    commission_amount: Decimal,
    vat_amount: Decimal,
    total_amount: Decimal,
    token_id: Option<Uuid>,
    gateway_token_uid: Option<String>,
    gateway_customer_uid: Option<String>,
}

#[derive(FromRow)]
struct TransitionedRow {
    subscription_id: Uuid,
    store_id: Uuid,
}

fn chargeable_token(
    token_id: Option<Uuid>,
    gateway_token_uid: Option<String>,
    gateway_customer_uid: Option<String>,
) -> Option<ChargeableToken> {
    match (token_id, gateway_token_uid) {
        (Some(token_id), Some(gateway_token_uid)) => Some(ChargeableToken {
            token_id,
            gateway_token_uid,
            gateway_customer_uid,
        }),
        _ => None,
    }
}

impl From<DueRenewalRow> for DueRenewal {
    fn from(row: DueRenewalRow) -> Self {
        Self {
            subscription_id: row.subscription_id,
            store_id: row.store_id,
            plan_name: row.plan_name,
            plan_price: row.plan_price,
            plan_vat_percentage: row.plan_vat_percentage,
            failed_payment_count: row.failed_payment_count,
            next_payment_date: row.next_payment_date,
            token: chargeable_token(row.token_id, row.gateway_token_uid, row.gateway_customer_uid),
        }
    }
}

impl From<PendingCommissionRow> for PendingCommission {
    fn from(row: PendingCommissionRow) -> Self {
        Self {
            commission_charge_id: row.commission_charge_id,
            store_id: row.store_id,
            period: CommissionPeriod::new(row.period_start, row.period_end),
            total_sales: row.total_sales,
            commission_amount: row.commission_amount,
            vat_amount: row.vat_amount,
            total_amount: row.total_amount,
            token: chargeable_token(row.token_id, row.gateway_token_uid, row.gateway_customer_uid),
        }
    }
}

/// Midnight UTC at the start of `day`.
fn start_of(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(NaiveTime::MIN).and_utc()
}

/// Sets `stores.is_billing_current` from the status the stores' subscriptions
/// just moved to. Every status transition goes through here.
async fn project_store_access(
    conn: &mut PgConnection,
    store_ids: &[Uuid],
    status: SubscriptionStatus,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    if store_ids.is_empty() {
        return Ok(());
    }

    sqlx::query(
        "UPDATE stores SET is_billing_current = $1, updated_utc = $3 WHERE store_id = ANY($2)",
    )
    .bind(status.grants_store_access())
    .bind(store_ids)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to project store access: {}", e))
    })?;

    Ok(())
}

impl PgBillingStore {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "store-billing"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Bulk status transition that also re-projects the affected stores.
    async fn transition_where(
        &self,
        operation: &str,
        sql: &str,
        now: DateTime<Utc>,
        to: SubscriptionStatus,
    ) -> Result<Vec<Uuid>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&[operation])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let rows = sqlx::query_as::<_, TransitionedRow>(sql)
            .bind(to.as_str())
            .bind(now.date_naive())
            .bind(now)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to {}: {}", operation, e))
            })?;

        let store_ids: Vec<Uuid> = rows.iter().map(|r| r.store_id).collect();
        project_store_access(&mut *tx, &store_ids, to, now).await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        for row in &rows {
            info!(
                subscription_id = %row.subscription_id,
                store_id = %row.store_id,
                status = to.as_str(),
                "Subscription transitioned"
            );
        }

        Ok(store_ids)
    }
}

#[async_trait]
impl SubscriptionStore for PgBillingStore {
    #[instrument(skip(self))]
    async fn expire_trials(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, AppError> {
        self.transition_where(
            "expire_trials",
            r#"
            UPDATE store_subscriptions
            SET status = $1, updated_utc = $3
            WHERE status = 'trial' AND trial_ends_at < $2
            RETURNING subscription_id, store_id
            "#,
            now,
            SubscriptionStatus::Blocked,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn find_due_renewals(&self, today: NaiveDate) -> Result<Vec<DueRenewal>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_due_renewals"])
            .start_timer();

        let rows = sqlx::query_as::<_, DueRenewalRow>(
            r#"
            SELECT s.subscription_id, s.store_id, p.name AS plan_name, p.price AS plan_price,
                   p.vat_percentage AS plan_vat_percentage, s.failed_payment_count,
                   s.next_payment_date, t.token_id, t.gateway_token_uid, t.gateway_customer_uid
            FROM store_subscriptions s
            JOIN subscription_plans p ON p.plan_id = s.plan_id
            LEFT JOIN LATERAL (
                SELECT token_id, gateway_token_uid, gateway_customer_uid
                FROM payment_tokens
                WHERE store_id = s.store_id AND is_primary = TRUE AND is_active = TRUE
                ORDER BY created_utc DESC
                LIMIT 1
            ) t ON TRUE
            WHERE s.status = 'active'
              AND s.cancel_at_period_end = FALSE
              AND s.next_payment_date <= $1
            ORDER BY s.next_payment_date ASC, s.subscription_id
            "#,
        )
        .bind(today)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to find due renewals: {}", e))
        })?;

        timer.observe_duration();

        Ok(rows.into_iter().map(DueRenewal::from).collect())
    }

    #[instrument(skip(self, payment), fields(subscription_id = %payment.subscription_id))]
    async fn record_renewal(&self, payment: &RenewalPayment) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_renewal"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE store_subscriptions
            SET current_period_start = $2, current_period_end = $3, next_payment_date = $3,
                last_payment_date = $4, last_payment_amount = $5, last_payment_status = $6,
                failed_payment_count = 0, updated_utc = $4
            WHERE subscription_id = $1
            "#,
        )
        .bind(payment.subscription_id)
        .bind(payment.period_start)
        .bind(payment.period_end)
        .bind(payment.paid_at)
        .bind(payment.amount)
        .bind(PaymentStatus::Success.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to record renewal: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn record_failed_renewal(
        &self,
        subscription_id: Uuid,
        failed_payment_count: i32,
        failed_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_failed_renewal"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE store_subscriptions
            SET failed_payment_count = $2, last_payment_status = $3, updated_utc = $4
            WHERE subscription_id = $1
            "#,
        )
        .bind(subscription_id)
        .bind(failed_payment_count)
        .bind(PaymentStatus::Failed.as_str())
        .bind(failed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to record failed renewal: {}", e))
        })?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn block_subscription(
        &self,
        subscription_id: Uuid,
        blocked_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["block_subscription"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let store_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE store_subscriptions
            SET status = $2, last_payment_status = $3, updated_utc = $4
            WHERE subscription_id = $1
            RETURNING store_id
            "#,
        )
        .bind(subscription_id)
        .bind(SubscriptionStatus::Blocked.as_str())
        .bind(PaymentStatus::Failed.as_str())
        .bind(blocked_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to block subscription: {}", e))
        })?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Subscription {} not found", subscription_id))
        })?;

        project_store_access(&mut *tx, &[store_id], SubscriptionStatus::Blocked, blocked_at)
            .await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        info!(store_id = %store_id, "Subscription blocked");

        Ok(())
    }

    #[instrument(skip(self))]
    async fn expire_cancelled(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, AppError> {
        self.transition_where(
            "expire_cancelled",
            r#"
            UPDATE store_subscriptions
            SET status = $1, updated_utc = $3
            WHERE status = 'cancelled'
              AND cancel_at_period_end = TRUE
              AND current_period_end < $2
            RETURNING subscription_id, store_id
            "#,
            now,
            SubscriptionStatus::Expired,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn touch_payment_token(
        &self,
        token_id: Uuid,
        used_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["touch_payment_token"])
            .start_timer();

        sqlx::query("UPDATE payment_tokens SET last_used_at = $2 WHERE token_id = $1")
            .bind(token_id)
            .bind(used_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to touch payment token: {}", e))
            })?;

        timer.observe_duration();
        Ok(())
    }
}

#[async_trait]
impl PluginStore for PgBillingStore {
    #[instrument(skip(self))]
    async fn expire_plugin_subscriptions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExpiredPlugin>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["expire_plugin_subscriptions"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let expired = sqlx::query_as::<_, ExpiredPlugin>(
            r#"
            UPDATE plugin_subscriptions
            SET status = $1, is_active = FALSE, updated_utc = $3
            WHERE status IN ('active', 'cancelled') AND end_date < $2
            RETURNING plugin_subscription_id, store_id, plugin_id
            "#,
        )
        .bind(PluginSubscriptionStatus::Expired.as_str())
        .bind(now.date_naive())
        .bind(now)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!(
                "Failed to expire plugin subscriptions: {}",
                e
            ))
        })?;

        if !expired.is_empty() {
            let plugin_ids: Vec<Uuid> = expired.iter().map(|p| p.plugin_id).collect();
            sqlx::query(
                "UPDATE plugins SET is_active = FALSE, updated_utc = $2 WHERE plugin_id = ANY($1)",
            )
            .bind(&plugin_ids)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to deactivate plugins: {}", e))
            })?;
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        for plugin in &expired {
            info!(
                plugin_subscription_id = %plugin.plugin_subscription_id,
                store_id = %plugin.store_id,
                "Plugin subscription expired"
            );
        }

        Ok(expired)
    }
}

#[async_trait]
impl CommissionStore for PgBillingStore {
    #[instrument(skip(self))]
    async fn find_commissionable_stores(&self) -> Result<Vec<CommissionableStore>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_commissionable_stores"])
            .start_timer();

        let stores = sqlx::query_as::<_, CommissionableStore>(
            r#"
            SELECT s.store_id, p.commission_percentage AS commission_rate
            FROM store_subscriptions s
            JOIN subscription_plans p ON p.plan_id = s.plan_id
            WHERE s.status = 'active' AND p.commission_percentage > 0
            ORDER BY s.store_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!(
                "Failed to find commissionable stores: {}",
                e
            ))
        })?;

        timer.observe_duration();
        Ok(stores)
    }

    #[instrument(skip(self, period))]
    async fn commission_exists(
        &self,
        store_id: Uuid,
        period: &CommissionPeriod,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["commission_exists"])
            .start_timer();

        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM commission_charges
                WHERE store_id = $1 AND period_start = $2 AND period_end = $3 AND charge_type = $4
            )
            "#,
        )
        .bind(store_id)
        .bind(period.start)
        .bind(period.end)
        .bind(MONTHLY_CHARGE_TYPE)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to check commission: {}", e))
        })?;

        timer.observe_duration();
        Ok(exists)
    }

    #[instrument(skip(self, period))]
    async fn summarize_sales(
        &self,
        store_id: Uuid,
        period: &CommissionPeriod,
    ) -> Result<SalesSummary, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["summarize_sales"])
            .start_timer();

        // Upper bound is exclusive midnight after the last day so it counts in full.
        let until = period
            .end
            .checked_add_days(Days::new(1))
            .map(start_of)
            .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Period end out of range")))?;

        let summary = sqlx::query_as::<_, SalesSummary>(
            r#"
            SELECT COUNT(*) AS total_orders, COALESCE(SUM(total_price), 0) AS total_sales
            FROM orders
            WHERE store_id = $1
              AND financial_status = ANY($4)
              AND created_at >= $2
              AND created_at < $3
            "#,
        )
        .bind(store_id)
        .bind(start_of(period.start))
        .bind(until)
        .bind(
            [FinancialStatus::Paid, FinancialStatus::PartiallyPaid]
                .map(|status| status.as_str())
                .to_vec(),
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to summarize sales: {}", e)))?;

        timer.observe_duration();
        Ok(summary)
    }

    #[instrument(skip(self, input), fields(store_id = %input.store_id))]
    async fn insert_commission(
        &self,
        input: &NewCommissionCharge,
    ) -> Result<CommissionCharge, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_commission"])
            .start_timer();

        let sql = format!(
            r#"
            INSERT INTO commission_charges (commission_charge_id, store_id, period_start, period_end,
                charge_type, total_orders, total_sales, commission_rate, commission_amount,
                vat_amount, total_amount, status, calculated_at, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13)
            RETURNING {}
            "#,
            COMMISSION_COLUMNS
        );

        let charge = sqlx::query_as::<_, CommissionCharge>(&sql)
            .bind(Uuid::new_v4())
            .bind(input.store_id)
            .bind(input.period.start)
            .bind(input.period.end)
            .bind(MONTHLY_CHARGE_TYPE)
            .bind(input.total_orders)
            .bind(input.total_sales)
            .bind(input.commission_rate)
            .bind(input.breakdown.amount)
            .bind(input.breakdown.vat_amount)
            .bind(input.breakdown.total_amount)
            .bind(CommissionStatus::Calculated.as_str())
            .bind(input.calculated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                    AppError::Conflict(anyhow::anyhow!(
                        "Commission already recorded for store {} in {}",
                        input.store_id,
                        input.period.label()
                    ))
                }
                _ => AppError::DatabaseError(anyhow::anyhow!(
                    "Failed to insert commission: {}",
                    e
                )),
            })?;

        timer.observe_duration();
        Ok(charge)
    }

    #[instrument(skip(self))]
    async fn find_pending_commissions(
        &self,
        min_total: Option<Decimal>,
    ) -> Result<Vec<PendingCommission>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_pending_commissions"])
            .start_timer();

        let rows = sqlx::query_as::<_, PendingCommissionRow>(
            r#"
            SELECT c.commission_charge_id, c.store_id, c.period_start, c.period_end,
                   c.total_sales, c.commission_amount, c.vat_amount, c.total_amount,
                   t.token_id, t.gateway_token_uid, t.gateway_customer_uid
            FROM commission_charges c
            LEFT JOIN LATERAL (
                SELECT token_id, gateway_token_uid, gateway_customer_uid
                FROM payment_tokens
                WHERE store_id = c.store_id AND is_primary = TRUE AND is_active = TRUE
                ORDER BY created_utc DESC
                LIMIT 1
            ) t ON TRUE
            WHERE c.status = 'calculated'
              AND ($1::NUMERIC IS NULL OR c.total_amount >= $1)
            ORDER BY c.total_amount DESC, c.commission_charge_id
            "#,
        )
        .bind(min_total)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!(
                "Failed to find pending commissions: {}",
                e
            ))
        })?;

        timer.observe_duration();
        Ok(rows.into_iter().map(PendingCommission::from).collect())
    }

    #[instrument(skip(self))]
    async fn mark_commission_charged(
        &self,
        commission_charge_id: Uuid,
        charged_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_commission_charged"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE commission_charges
            SET status = $2, charged_at = $3, updated_utc = $3
            WHERE commission_charge_id = $1 AND status = 'calculated'
            "#,
        )
        .bind(commission_charge_id)
        .bind(CommissionStatus::Charged.as_str())
        .bind(charged_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to mark commission charged: {}", e))
        })?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn mark_commission_failed(
        &self,
        commission_charge_id: Uuid,
        failed_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_commission_failed"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE commission_charges
            SET status = $2, updated_utc = $3
            WHERE commission_charge_id = $1 AND status = 'calculated'
            "#,
        )
        .bind(commission_charge_id)
        .bind(CommissionStatus::Failed.as_str())
        .bind(failed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to mark commission failed: {}", e))
        })?;

        timer.observe_duration();
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgBillingStore {
    #[instrument(skip(self, entry), fields(store_id = %entry.store_id))]
    async fn append_transaction(
        &self,
        entry: &NewBillingTransaction,
    ) -> Result<BillingTransaction, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["append_transaction"])
            .start_timer();

        let sql = format!(
            r#"
            INSERT INTO billing_transactions (transaction_id, store_id, subscription_id,
                commission_charge_id, transaction_type, amount, vat_amount, total_amount, status,
                gateway_transaction_uid, gateway_approval_num, gateway_voucher_num, description,
                failure_reason, metadata, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        );

        let transaction = sqlx::query_as::<_, BillingTransaction>(&sql)
            .bind(Uuid::new_v4())
            .bind(entry.store_id)
            .bind(entry.subscription_id)
            .bind(entry.commission_charge_id)
            .bind(entry.transaction_type.as_str())
            .bind(entry.breakdown.amount)
            .bind(entry.breakdown.vat_amount)
            .bind(entry.breakdown.total_amount)
            .bind(entry.status.as_str())
            .bind(&entry.gateway_transaction_uid)
            .bind(&entry.gateway_approval_num)
            .bind(&entry.gateway_voucher_num)
            .bind(&entry.description)
            .bind(&entry.failure_reason)
            .bind(&entry.metadata)
            .bind(entry.processed_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to append transaction: {}", e))
            })?;

        timer.observe_duration();
        Ok(transaction)
    }
}

#[async_trait]
impl BillingStore for PgBillingStore {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }
}
