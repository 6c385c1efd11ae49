// Job: commit deferred accruals whose activation date has arrived.
// One-shot, meant to be scheduled externally; safe to run alongside live
// traffic because the store takes row locks per account.

use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use loyalty_backend::config::Config;
use loyalty_backend::db;
use loyalty_backend::points::cache::connect_optional;
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

    let repository = Arc::new(PgPointsRepository::new(pool, config.workers.balance));
    let cache = connect_optional(config.cache.as_ref()).await;
    let service = PointsService::new(repository, cache, config.days_until_accrual);

    service.commit_on_date().await?;
    tracing::info!("commit on date job finished");
    Ok(())
}
