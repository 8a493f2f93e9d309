//! Bounded, retrying access to the repository.
//!
//! Every repository call made during an aggregation goes through
//! [`Fetcher::call`]: it waits for a permit, applies the optional timeout and
//! retries transient failures. The permit is released as soon as the call
//! returns, so a parent waiting on its children never holds one.

use std::fmt::Display;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use stockforge_core::StorageUnitId;

use crate::config::AggregationConfig;
use crate::error::AggregationError;
use crate::repository::{RepositoryError, StorageRepository};
use crate::unit::StorageUnit;

#[derive(Debug)]
pub(crate) struct Fetcher<R: ?Sized> {
    repo: Arc<R>,
    permits: Semaphore,
    config: AggregationConfig,
}

impl<R> Fetcher<R>
where
    R: StorageRepository + ?Sized,
{
    pub(crate) fn new(repo: Arc<R>, config: AggregationConfig) -> Self {
        Self {
            repo,
            permits: Semaphore::new(config.max_concurrent_fetches.max(1)),
            config,
        }
    }

    pub(crate) fn config(&self) -> &AggregationConfig {
        &self.config
    }

    pub(crate) async fn storage_unit(&self, id: StorageUnitId) -> Result<StorageUnit, AggregationError> {
        let unit = self
            .call("get_storage_unit", &id, |repo| repo.get_storage_unit(id))
            .await?;
        debug!(
            storage_id = %id,
            children = unit.children.len(),
            associations = unit.product_associations.len(),
            "fetched storage unit"
        );
        Ok(unit)
    }

    /// Run one repository call under the concurrency limit, retrying
    /// transient failures per the configured policy.
    pub(crate) async fn call<'a, T>(
        &'a self,
        op: &'static str,
        subject: &(dyn Display + Sync),
        mut f: impl FnMut(&'a R) -> BoxFuture<'a, Result<T, RepositoryError>> + Send,
    ) -> Result<T, AggregationError>
    where
        T: Send,
    {
        let retry = &self.config.retry;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let result = {
                let _permit = self.permits.acquire().await.map_err(|_| AggregationError::Unavailable {
                    attempts: attempt,
                    message: "fetch limiter closed".to_string(),
                })?;

                match self.config.fetch_timeout {
                    Some(limit) => match tokio::time::timeout(limit, f(&*self.repo)).await {
                        Ok(result) => result,
                        Err(_) => Err(RepositoryError::Unavailable(format!(
                            "{op} timed out after {limit:?}"
                        ))),
                    },
                    None => f(&*self.repo).await,
                }
            };

            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && retry.should_retry(attempt) => {
                    let delay = retry.delay_for_attempt(attempt);
                    warn!(
                        op,
                        subject = %subject,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient repository failure; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(AggregationError::from_repository(err, attempt)),
            }
        }
    }
}
