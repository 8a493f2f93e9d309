//! Repository port consumed by the aggregation engine.
//!
//! Implementations fetch exactly one level of the hierarchy per call; the
//! aggregator is responsible for descending.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use stockforge_core::{AreaId, FacilityId, OrganizationId, ProductId, StorageUnitId, WarehouseId};

use crate::unit::StorageUnit;

/// Repository operation error.
///
/// `Unavailable` covers transient conditions (timeouts, dropped connections,
/// exhausted pools) and is the only retryable variant.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("repository unavailable: {0}")]
    Unavailable(String),

    #[error("repository failure: {0}")]
    Backend(String),
}

impl RepositoryError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, RepositoryError::Unavailable(_))
    }
}

#[async_trait]
pub trait StorageRepository: Send + Sync {
    /// Fetch one unit with its direct children, associations and labels.
    async fn get_storage_unit(&self, id: StorageUnitId) -> Result<StorageUnit, RepositoryError>;

    /// Units with no parent in the given area.
    async fn list_root_storage_units_for_area(
        &self,
        area_id: AreaId,
    ) -> Result<Vec<StorageUnitId>, RepositoryError>;

    async fn get_organization_warehouses(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Vec<WarehouseId>, RepositoryError>;

    async fn get_warehouse_facilities(
        &self,
        warehouse_id: WarehouseId,
    ) -> Result<Vec<FacilityId>, RepositoryError>;

    async fn get_facility_areas(&self, facility_id: FacilityId) -> Result<Vec<AreaId>, RepositoryError>;

    /// Products in the organization's catalog.
    async fn list_organization_products(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Vec<ProductId>, RepositoryError>;

    async fn get_product_minimum_stock(&self, product_id: ProductId) -> Result<u64, RepositoryError>;
}

#[async_trait]
impl<R> StorageRepository for Arc<R>
where
    R: StorageRepository + ?Sized,
{
    async fn get_storage_unit(&self, id: StorageUnitId) -> Result<StorageUnit, RepositoryError> {
        (**self).get_storage_unit(id).await
    }

    async fn list_root_storage_units_for_area(
        &self,
        area_id: AreaId,
    ) -> Result<Vec<StorageUnitId>, RepositoryError> {
        (**self).list_root_storage_units_for_area(area_id).await
    }

    async fn get_organization_warehouses(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Vec<WarehouseId>, RepositoryError> {
        (**self).get_organization_warehouses(organization_id).await
    }

    async fn get_warehouse_facilities(
        &self,
        warehouse_id: WarehouseId,
    ) -> Result<Vec<FacilityId>, RepositoryError> {
        (**self).get_warehouse_facilities(warehouse_id).await
    }

    async fn get_facility_areas(&self, facility_id: FacilityId) -> Result<Vec<AreaId>, RepositoryError> {
        (**self).get_facility_areas(facility_id).await
    }

    async fn list_organization_products(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Vec<ProductId>, RepositoryError> {
        (**self).list_organization_products(organization_id).await
    }

    async fn get_product_minimum_stock(&self, product_id: ProductId) -> Result<u64, RepositoryError> {
        (**self).get_product_minimum_stock(product_id).await
    }
}
