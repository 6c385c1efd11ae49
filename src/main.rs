// Loyalty server: rule engine facade + points query facade

use anyhow::Context;
use axum::Router;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use loyalty_backend::config::{Config, RulesRefresh};
use loyalty_backend::db;
use loyalty_backend::engine::handlers::EngineState;
use loyalty_backend::engine::metrics::EngineMetrics;
use loyalty_backend::engine::repository::{PgRuleRepository, RuleStore};
use loyalty_backend::engine::service::RuleEngineService;
use loyalty_backend::points::cache::connect_optional;
use loyalty_backend::points::handlers::PointsState;
use loyalty_backend::points::repository::PgPointsRepository;
use loyalty_backend::points::service::PointsService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;

    let pool = db::create_pool(&config.database_url)
        .await
        .context("failed to connect to database")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    // rule engine facade
    let store: Arc<dyn RuleStore> = Arc::new(PgRuleRepository::new(pool.clone()));
    let metrics = Arc::new(EngineMetrics::new());
    let snapshot = match config.rules_refresh {
        RulesRefresh::Startup => Some(Arc::new(
            RuleEngineService::from_store(store.as_ref())
                .await
                .context("failed to load rule snapshot")?
                .with_metrics(metrics.clone()),
        )),
        RulesRefresh::Request => None,
    };
    let engine_state = EngineState {
        store,
        snapshot,
        metrics,
    };

    // points facade
    let cache = connect_optional(config.cache.as_ref()).await;
    let repository = Arc::new(PgPointsRepository::new(pool, config.workers.balance));
    let service = Arc::new(PointsService::new(
        repository,
        cache,
        config.days_until_accrual,
    ));
    let points_state = PointsState { service };

    let app = Router::new()
        .merge(loyalty_backend::engine::handlers::router(engine_state))
        .merge(loyalty_backend::points::handlers::router(points_state));

    let listener = tokio::net::TcpListener::bind(&config.server_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server_addr))?;
    tracing::info!(addr = %config.server_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
