//! Infrastructure layer: Postgres repository, configuration, service wiring.

pub mod config;
pub mod repository;


use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use stockforge_storage::{OrganizationInventoryStatistics, RepositoryError, StorageRepository};

pub use config::{InfraConfig, load_from, load_from_env};
pub use repository::PostgresStorageRepository;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("DATABASE_URL is not set")]
    MissingDatabaseUrl,

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Statistics service over any repository, configured from `config`.
pub fn statistics_service<R>(repo: Arc<R>, config: &InfraConfig) -> OrganizationInventoryStatistics<R>
where
    R: StorageRepository + ?Sized,
{
    OrganizationInventoryStatistics::new(repo, config.aggregation.clone()).with_alert_config(config.alerts.clone())
}

/// Connect to Postgres and build the statistics service on top of it.
pub async fn connect_postgres(
    config: &InfraConfig,
) -> Result<OrganizationInventoryStatistics<PostgresStorageRepository>, InfraError> {
    let url = config.database_url.as_deref().ok_or(InfraError::MissingDatabaseUrl)?;
    let repo = PostgresStorageRepository::connect(url, config.db_max_connections).await?;
    info!(
        max_connections = config.db_max_connections,
        max_concurrent_fetches = config.aggregation.max_concurrent_fetches,
        "connected storage repository to postgres"
    );
    Ok(statistics_service(Arc::new(repo), config))
}
