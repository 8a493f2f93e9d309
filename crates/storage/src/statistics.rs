//! Organization-wide inventory statistics and low-stock alerts.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use stockforge_core::{AreaId, FacilityId, OrganizationId, ProductId, StorageUnitId};

use crate::aggregator::SubtreeAggregator;
use crate::alerts::{LowStockAlert, LowStockAlertEvaluator};
use crate::config::{AggregationConfig, AlertConfig};
use crate::error::AggregationError;
use crate::repository::StorageRepository;
use crate::summary::{ProductCount, ProductSummary, SubtreeSummary};

/// Result of one statistics run. Built per request, never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationInventorySnapshot {
    pub organization_id: OrganizationId,
    /// Sum of root capacities.
    pub capacity: u64,
    /// One summary per root storage unit, in resolution order.
    pub storages: Vec<SubtreeSummary>,
    /// Organization-wide totals, deduplicated by product id.
    pub products: Vec<ProductCount>,
    /// Products linked to the organization's catalog.
    pub catalog: Vec<ProductId>,
    pub computed_at: DateTime<Utc>,
}

impl OrganizationInventorySnapshot {
    /// Aggregated count of one product (0 when it is stored nowhere).
    pub fn product_count(&self, product_id: &ProductId) -> u64 {
        self.products
            .iter()
            .find(|p| p.product_id == *product_id)
            .map(|p| p.count)
            .unwrap_or(0)
    }

    /// Association rows across every traversed subtree.
    pub fn total_product_associations(&self) -> u64 {
        self.storages
            .iter()
            .fold(0u64, |acc, s| acc.saturating_add(s.product_count))
    }
}

/// Resolves organization → warehouses → facilities → areas → root units and
/// aggregates every root.
#[derive(Debug)]
pub struct OrganizationInventoryStatistics<R: ?Sized> {
    aggregator: SubtreeAggregator<R>,
    evaluator: LowStockAlertEvaluator,
}

impl<R> OrganizationInventoryStatistics<R>
where
    R: StorageRepository + ?Sized,
{
    pub fn new(repo: Arc<R>, config: AggregationConfig) -> Self {
        Self {
            aggregator: SubtreeAggregator::new(repo, config),
            evaluator: LowStockAlertEvaluator::default(),
        }
    }

    pub fn with_alert_config(mut self, config: AlertConfig) -> Self {
        self.evaluator = LowStockAlertEvaluator::new(config);
        self
    }

    pub fn aggregator(&self) -> &SubtreeAggregator<R> {
        &self.aggregator
    }

    /// Capacity and per-product totals for the whole organization.
    #[instrument(skip(self), err)]
    pub async fn compute_organization_statistics(
        &self,
        organization_id: &str,
    ) -> Result<OrganizationInventorySnapshot, AggregationError> {
        let organization_id = OrganizationId::parse(organization_id)?;

        let (catalog, roots) = futures::try_join!(
            self.catalog(organization_id),
            self.resolve_roots(organization_id)
        )?;

        let storages = self.aggregator.summarize_many(&roots).await?;

        let mut products = ProductSummary::new();
        let mut capacity = 0u64;
        for storage in &storages {
            capacity = capacity.saturating_add(storage.capacity);
            products.merge(&storage.products);
        }

        info!(
            organization_id = %organization_id,
            roots = storages.len(),
            capacity,
            products = products.len(),
            "computed organization inventory statistics"
        );

        Ok(OrganizationInventorySnapshot {
            organization_id,
            capacity,
            storages,
            products: products.into_vec(),
            catalog,
            computed_at: Utc::now(),
        })
    }

    /// Products whose organization-wide count is below their minimum stock.
    #[instrument(skip(self), err)]
    pub async fn compute_low_stock_alerts(
        &self,
        organization_id: &str,
    ) -> Result<Vec<LowStockAlert>, AggregationError> {
        let snapshot = self.compute_organization_statistics(organization_id).await?;
        let candidates = self.evaluator.candidates(&snapshot);

        let fetcher = self.aggregator.fetcher();
        let lookups: Vec<Option<(ProductId, u64)>> = stream::iter(candidates.iter().map(|c| c.product_id))
            .map(|product_id| async move {
                let result = fetcher
                    .call("get_product_minimum_stock", &product_id, move |repo| {
                        repo.get_product_minimum_stock(product_id)
                    })
                    .await;
                match result {
                    Ok(minimum) => Ok(Some((product_id, minimum))),
                    Err(AggregationError::NotFound { .. }) => {
                        debug!(product_id = %product_id, "no minimum stock configured");
                        Ok(None)
                    }
                    Err(err) => Err(err),
                }
            })
            .buffered(self.fanout())
            .try_collect()
            .await?;
        let thresholds: HashMap<ProductId, u64> = lookups.into_iter().flatten().collect();

        let alerts = self.evaluator.evaluate(&candidates, &thresholds);
        info!(
            organization_id = %snapshot.organization_id,
            evaluated = candidates.len(),
            alerts = alerts.len(),
            "evaluated low-stock alerts"
        );
        Ok(alerts)
    }

    fn fanout(&self) -> usize {
        self.aggregator.config().max_fanout.max(1)
    }

    async fn catalog(&self, organization_id: OrganizationId) -> Result<Vec<ProductId>, AggregationError> {
        self.aggregator
            .fetcher()
            .call("list_organization_products", &organization_id, move |repo| {
                repo.list_organization_products(organization_id)
            })
            .await
    }

    /// Parentless storage units reachable from the organization, in lookup
    /// order. Non-root units are only ever reached by descent.
    async fn resolve_roots(&self, organization_id: OrganizationId) -> Result<Vec<StorageUnitId>, AggregationError> {
        let fetcher = self.aggregator.fetcher();
        let fanout = self.fanout();

        let warehouses = fetcher
            .call("get_organization_warehouses", &organization_id, move |repo| {
                repo.get_organization_warehouses(organization_id)
            })
            .await?;

        let facilities: Vec<FacilityId> = stream::iter(warehouses)
            .map(|warehouse_id| async move {
                fetcher
                    .call("get_warehouse_facilities", &warehouse_id, move |repo| {
                        repo.get_warehouse_facilities(warehouse_id)
                    })
                    .await
            })
            .buffered(fanout)
            .try_concat()
            .await?;

        let areas: Vec<AreaId> = stream::iter(facilities)
            .map(|facility_id| async move {
                fetcher
                    .call("get_facility_areas", &facility_id, move |repo| {
                        repo.get_facility_areas(facility_id)
                    })
                    .await
            })
            .buffered(fanout)
            .try_concat()
            .await?;

        let roots: Vec<StorageUnitId> = stream::iter(areas)
            .map(|area_id| async move {
                fetcher
                    .call("list_root_storage_units_for_area", &area_id, move |repo| {
                        repo.list_root_storage_units_for_area(area_id)
                    })
                    .await
            })
            .buffered(fanout)
            .try_concat()
            .await?;

        Ok(roots)
    }
}
