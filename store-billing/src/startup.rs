//! Application startup and lifecycle management.

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::get,
    Router,
};
use service_core::error::AppError;
use service_core::middleware::shared_secret::{shared_secret_middleware, SharedSecretConfig};
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::BillingConfig;
use crate::handlers::{self, cron};
use crate::middleware::metrics::metrics_middleware;
use crate::services::{
    init_metrics, BillingStore, Clock, PaymentGateway, PayPlusGateway, PgBillingStore,
    SystemClock,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: BillingConfig,
    pub store: Arc<dyn BillingStore>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub clock: Arc<dyn Clock>,
    pub cron_auth: SharedSecretConfig,
}

impl AsRef<SharedSecretConfig> for AppState {
    fn as_ref(&self) -> &SharedSecretConfig {
        &self.cron_auth
    }
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application against Postgres and PayPlus.
    pub async fn build(config: BillingConfig) -> Result<Self, AppError> {
        let store = PgBillingStore::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        store.run_migrations().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            e
        })?;

        let gateway = PayPlusGateway::new(config.gateway.clone()).map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("Failed to build PayPlus client: {}", e))
        })?;

        Self::build_with(config, Arc::new(store), Arc::new(gateway), Arc::new(SystemClock)).await
    }

    /// Build the application around caller-supplied collaborators.
    pub async fn build_with(
        config: BillingConfig,
        store: Arc<dyn BillingStore>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AppError> {
        init_metrics();

        let state = AppState {
            cron_auth: SharedSecretConfig {
                secret: config.cron.secret.clone(),
            },
            config: config.clone(),
            store,
            gateway,
            clock,
        };

        // Port 0 binds a random port for tests
        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Store billing listener bound");

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = router(self.state);

        tracing::info!(
            service = "store-billing",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        axum::serve(self.listener, router).await
    }
}

fn router(state: AppState) -> Router {
    let cron_routes = Router::new()
        .route(
            "/cron/billing",
            get(cron::run_billing).post(cron::run_billing),
        )
        .route(
            "/cron/commissions",
            get(cron::run_commissions).post(cron::run_commissions),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            shared_secret_middleware::<AppState>,
        ));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_handler))
        .merge(cron_routes)
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(metrics_middleware))
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}
