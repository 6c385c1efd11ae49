// Job: consume new orders from Kafka and record pending accruals.

use anyhow::Context;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use loyalty_backend::config::{Config, KafkaConfig};
use loyalty_backend::consumers::orders::{StreamKind, TopicConsumer};
use loyalty_backend::db;
use loyalty_backend::points::cache::connect_optional;
use loyalty_backend::points::engine_client::HttpEngineClient;
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
    let kafka = KafkaConfig::from_env()?;
    let engine = HttpEngineClient::new(config.require_engine_url()?)?;

    let pool = db::create_pool(&config.database_url)
        .await
        .context("failed to connect to database")?;
    let repository = Arc::new(PgPointsRepository::new(pool, config.workers.balance));
    let cache = connect_optional(config.cache.as_ref()).await;
    let service = Arc::new(
        PointsService::new(repository, cache, config.days_until_accrual)
            .with_engine(Arc::new(engine)),
    );

    let consumer = TopicConsumer::new(&kafka, service, StreamKind::Orders, config.workers.orders)?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    consumer.run(cancel).await;
    Ok(())
}
