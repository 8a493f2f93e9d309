//! In-memory storage repository for tests/dev.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use stockforge_core::{AreaId, FacilityId, OrganizationId, ProductId, StorageUnitId, WarehouseId};

use crate::repository::{RepositoryError, StorageRepository};
use crate::unit::StorageUnit;

#[derive(Debug, Default)]
struct Tables {
    units: HashMap<StorageUnitId, StorageUnit>,
    area_roots: HashMap<AreaId, Vec<StorageUnitId>>,
    warehouses: HashMap<OrganizationId, Vec<WarehouseId>>,
    facilities: HashMap<WarehouseId, Vec<FacilityId>>,
    areas: HashMap<FacilityId, Vec<AreaId>>,
    catalog: HashMap<OrganizationId, Vec<ProductId>>,
    minimum_stock: HashMap<ProductId, u64>,
}

/// `RwLock<HashMap>`-backed repository.
///
/// Besides the data, it records how it is used (fetch counts, peak number of
/// concurrent unit fetches) and can inject transient failures, which is what
/// the aggregation tests assert against.
#[derive(Debug, Default)]
pub struct InMemoryStorageRepository {
    tables: RwLock<Tables>,
    latency: Option<Duration>,
    fetches: AtomicU64,
    fetches_by_unit: RwLock<HashMap<StorageUnitId, u64>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    failures_left: AtomicU32,
    threshold_failures_left: AtomicU32,
}

impl InMemoryStorageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every unit fetch, so concurrent fetches overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn add_warehouse(&self, organization_id: OrganizationId) -> WarehouseId {
        let id = WarehouseId::new();
        if let Ok(mut t) = self.tables.write() {
            t.warehouses.entry(organization_id).or_default().push(id);
        }
        id
    }

    pub fn add_facility(&self, warehouse_id: WarehouseId) -> FacilityId {
        let id = FacilityId::new();
        if let Ok(mut t) = self.tables.write() {
            t.facilities.entry(warehouse_id).or_default().push(id);
        }
        id
    }

    pub fn add_area(&self, facility_id: FacilityId) -> AreaId {
        let id = AreaId::new();
        if let Ok(mut t) = self.tables.write() {
            t.areas.entry(facility_id).or_default().push(id);
        }
        id
    }

    /// Register a catalog product for the organization.
    pub fn add_product(&self, organization_id: OrganizationId, minimum_stock: u64) -> ProductId {
        let id = ProductId::new();
        if let Ok(mut t) = self.tables.write() {
            t.catalog.entry(organization_id).or_default().push(id);
            t.minimum_stock.insert(id, minimum_stock);
        }
        id
    }

    /// List an existing product in the organization's catalog without a threshold.
    pub fn add_catalog_product(&self, organization_id: OrganizationId, product_id: ProductId) {
        if let Ok(mut t) = self.tables.write() {
            t.catalog.entry(organization_id).or_default().push(product_id);
        }
    }

    pub fn set_minimum_stock(&self, product_id: ProductId, minimum_stock: u64) {
        if let Ok(mut t) = self.tables.write() {
            t.minimum_stock.insert(product_id, minimum_stock);
        }
    }

    /// Create a unit in `area_id`, linked under `parent` when given.
    pub fn add_unit(
        &self,
        area_id: AreaId,
        parent: Option<StorageUnitId>,
        capacity: u64,
        products: &[(ProductId, u64)],
    ) -> StorageUnitId {
        let mut unit = StorageUnit::new(StorageUnitId::new(), capacity).with_area(area_id);
        if let Some(parent_id) = parent {
            unit = unit.with_parent(parent_id);
        }
        for &(product_id, quantity) in products {
            unit = unit.with_product(product_id, quantity);
        }
        let id = unit.id;

        if let Ok(mut t) = self.tables.write() {
            if let Some(parent_id) = parent {
                if let Some(p) = t.units.get_mut(&parent_id) {
                    p.children.push(id);
                }
            }
        }
        self.insert_unit(unit);
        id
    }

    /// Store `unit` exactly as given (children are not linked up).
    ///
    /// A parentless unit with an area is listed as a root of that area.
    pub fn insert_unit(&self, unit: StorageUnit) {
        if let Ok(mut t) = self.tables.write() {
            if let (None, Some(area_id)) = (unit.parent_id, unit.area_id) {
                let roots = t.area_roots.entry(area_id).or_default();
                if !roots.contains(&unit.id) {
                    roots.push(unit.id);
                }
            }
            t.units.insert(unit.id, unit);
        }
    }

    /// Make the next `n` unit fetches fail with a transient error.
    pub fn fail_next_fetches(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` threshold lookups fail with a transient error.
    pub fn fail_next_threshold_lookups(&self, n: u32) {
        self.threshold_failures_left.store(n, Ordering::SeqCst);
    }

    /// Total `get_storage_unit` calls, failed ones included.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn fetch_count_for(&self, id: &StorageUnitId) -> u64 {
        self.fetches_by_unit
            .read()
            .ok()
            .and_then(|m| m.get(id).copied())
            .unwrap_or(0)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn read_tables(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, RepositoryError> {
        self.tables
            .read()
            .map_err(|_| RepositoryError::Backend("in-memory tables poisoned".to_string()))
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl StorageRepository for InMemoryStorageRepository {
    async fn get_storage_unit(&self, id: StorageUnitId) -> Result<StorageUnit, RepositoryError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut m) = self.fetches_by_unit.write() {
            *m.entry(id).or_default() += 1;
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let result = if Self::take_failure(&self.failures_left) {
            Err(RepositoryError::Unavailable("injected transient failure".to_string()))
        } else {
            self.read_tables().and_then(|t| {
                t.units
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| RepositoryError::not_found("storage unit", id))
            })
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn list_root_storage_units_for_area(
        &self,
        area_id: AreaId,
    ) -> Result<Vec<StorageUnitId>, RepositoryError> {
        Ok(self.read_tables()?.area_roots.get(&area_id).cloned().unwrap_or_default())
    }

    async fn get_organization_warehouses(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Vec<WarehouseId>, RepositoryError> {
        Ok(self.read_tables()?.warehouses.get(&organization_id).cloned().unwrap_or_default())
    }

    async fn get_warehouse_facilities(
        &self,
        warehouse_id: WarehouseId,
    ) -> Result<Vec<FacilityId>, RepositoryError> {
        Ok(self.read_tables()?.facilities.get(&warehouse_id).cloned().unwrap_or_default())
    }

    async fn get_facility_areas(&self, facility_id: FacilityId) -> Result<Vec<AreaId>, RepositoryError> {
        Ok(self.read_tables()?.areas.get(&facility_id).cloned().unwrap_or_default())
    }

    async fn list_organization_products(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Vec<ProductId>, RepositoryError> {
        Ok(self.read_tables()?.catalog.get(&organization_id).cloned().unwrap_or_default())
    }

    async fn get_product_minimum_stock(&self, product_id: ProductId) -> Result<u64, RepositoryError> {
        if Self::take_failure(&self.threshold_failures_left) {
            return Err(RepositoryError::Unavailable("injected transient failure".to_string()));
        }
        self.read_tables()?
            .minimum_stock
            .get(&product_id)
            .copied()
            .ok_or_else(|| RepositoryError::not_found("product", product_id))
    }
}
