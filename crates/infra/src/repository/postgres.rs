//! Postgres-backed storage repository.
//!
//! Maps the one-level repository port onto plain tables keyed by UUID:
//!
//! | table | columns used |
//! |-------|--------------|
//! | `storage_units` | `id`, `parent_id`, `area_id`, `capacity` |
//! | `storage_unit_products` | `storage_unit_id`, `product_id`, `quantity` |
//! | `storage_unit_labels` | `storage_unit_id`, `label` |
//! | `warehouses` | `id`, `organization_id` |
//! | `facilities` | `id`, `warehouse_id` |
//! | `areas` | `id`, `facility_id` |
//! | `organization_products` | `organization_id`, `product_id` |
//! | `products` | `id`, `minimum_stock` |
//!
//! ## Error Mapping
//!
//! | SQLx Error | RepositoryError |
//! |------------|-----------------|
//! | PoolTimedOut / PoolClosed / Io / Tls / Protocol | `Unavailable` (retryable) |
//! | Database, SQLSTATE class `08`, `57P01`, `40001`, `40P01` | `Unavailable` (retryable) |
//! | Database (other) | `Backend` |
//! | Decode / ColumnNotFound / other | `Backend` |

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgExecutor, PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use stockforge_core::{AreaId, FacilityId, OrganizationId, ProductId, StorageUnitId, WarehouseId};
use stockforge_storage::{ProductAssociation, RepositoryError, StorageRepository, StorageUnit};

/// Pool connections one repository call holds at a time.
pub const CONNECTIONS_PER_FETCH: u32 = 1;

/// Postgres implementation of [`StorageRepository`].
///
/// Uses a SQLx connection pool; every call is a read and holds at most one
/// connection, so a pool of `max_concurrent_fetches` connections never makes
/// a permitted fetch wait.
#[derive(Debug, Clone)]
pub struct PostgresStorageRepository {
    pool: Arc<PgPool>,
}

impl PostgresStorageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Open a pool against `database_url` with at most `max_connections`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    async fn fetch_ids(&self, operation: &'static str, sql: &'static str, key: Uuid) -> Result<Vec<Uuid>, RepositoryError> {
        fetch_ids(&*self.pool, operation, sql, key).await
    }
}

async fn fetch_ids<'e, E>(
    executor: E,
    operation: &'static str,
    sql: &'static str,
    key: Uuid,
) -> Result<Vec<Uuid>, RepositoryError>
where
    E: PgExecutor<'e>,
{
    let rows = sqlx::query(sql)
        .bind(key)
        .fetch_all(executor)
        .await
        .map_err(|e| map_sqlx_error(operation, e))?;

    rows.iter()
        .map(|row| row.try_get::<Uuid, _>("id").map_err(|e| map_sqlx_error(operation, e)))
        .collect()
}

#[async_trait]
impl StorageRepository for PostgresStorageRepository {
    #[instrument(skip(self), fields(storage_id = %id), err)]
    async fn get_storage_unit(&self, id: StorageUnitId) -> Result<StorageUnit, RepositoryError> {
        let key = *id.as_uuid();

        // One connection per unit fetch, so the fetch limit maps 1:1 onto the pool.
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("get_storage_unit.acquire", e))?;

        let row = sqlx::query(
            r#"
            SELECT id, parent_id, area_id, capacity
            FROM storage_units
            WHERE id = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("get_storage_unit", e))?
        .ok_or_else(|| RepositoryError::not_found("storage unit", id))?;

        let children = fetch_ids(
            &mut *conn,
            "get_storage_unit.children",
            "SELECT id FROM storage_units WHERE parent_id = $1 ORDER BY id",
            key,
        )
        .await?;

        let associations = sqlx::query(
            r#"
            SELECT product_id, quantity
            FROM storage_unit_products
            WHERE storage_unit_id = $1
            ORDER BY product_id
            "#,
        )
        .bind(key)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("get_storage_unit.products", e))?;

        let labels = sqlx::query("SELECT label FROM storage_unit_labels WHERE storage_unit_id = $1 ORDER BY label")
            .bind(key)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("get_storage_unit.labels", e))?;

        unit_from_rows(&row, children, &associations, &labels)
    }

    async fn list_root_storage_units_for_area(
        &self,
        area_id: AreaId,
    ) -> Result<Vec<StorageUnitId>, RepositoryError> {
        let ids = self
            .fetch_ids(
                "list_root_storage_units_for_area",
                "SELECT id FROM storage_units WHERE area_id = $1 AND parent_id IS NULL ORDER BY id",
                *area_id.as_uuid(),
            )
            .await?;
        Ok(ids.into_iter().map(StorageUnitId::from_uuid).collect())
    }

    async fn get_organization_warehouses(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Vec<WarehouseId>, RepositoryError> {
        let ids = self
            .fetch_ids(
                "get_organization_warehouses",
                "SELECT id FROM warehouses WHERE organization_id = $1 ORDER BY id",
                *organization_id.as_uuid(),
            )
            .await?;
        Ok(ids.into_iter().map(WarehouseId::from_uuid).collect())
    }

    async fn get_warehouse_facilities(
        &self,
        warehouse_id: WarehouseId,
    ) -> Result<Vec<FacilityId>, RepositoryError> {
        let ids = self
            .fetch_ids(
                "get_warehouse_facilities",
                "SELECT id FROM facilities WHERE warehouse_id = $1 ORDER BY id",
                *warehouse_id.as_uuid(),
            )
            .await?;
        Ok(ids.into_iter().map(FacilityId::from_uuid).collect())
    }

    async fn get_facility_areas(&self, facility_id: FacilityId) -> Result<Vec<AreaId>, RepositoryError> {
        let ids = self
            .fetch_ids(
                "get_facility_areas",
                "SELECT id FROM areas WHERE facility_id = $1 ORDER BY id",
                *facility_id.as_uuid(),
            )
            .await?;
        Ok(ids.into_iter().map(AreaId::from_uuid).collect())
    }

    async fn list_organization_products(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Vec<ProductId>, RepositoryError> {
        let ids = self
            .fetch_ids(
                "list_organization_products",
                "SELECT product_id AS id FROM organization_products WHERE organization_id = $1 ORDER BY product_id",
                *organization_id.as_uuid(),
            )
            .await?;
        Ok(ids.into_iter().map(ProductId::from_uuid).collect())
    }

    async fn get_product_minimum_stock(&self, product_id: ProductId) -> Result<u64, RepositoryError> {
        let row = sqlx::query("SELECT minimum_stock FROM products WHERE id = $1")
            .bind(*product_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_product_minimum_stock", e))?
            .ok_or_else(|| RepositoryError::not_found("product", product_id))?;

        let minimum: i64 = row
            .try_get("minimum_stock")
            .map_err(|e| map_sqlx_error("get_product_minimum_stock", e))?;
        non_negative("products.minimum_stock", minimum)
    }
}

fn unit_from_rows(
    row: &PgRow,
    children: Vec<Uuid>,
    associations: &[PgRow],
    labels: &[PgRow],
) -> Result<StorageUnit, RepositoryError> {
    let decode = |e: sqlx::Error| map_sqlx_error("get_storage_unit.decode", e);

    let id: Uuid = row.try_get("id").map_err(decode)?;
    let parent_id: Option<Uuid> = row.try_get("parent_id").map_err(decode)?;
    let area_id: Option<Uuid> = row.try_get("area_id").map_err(decode)?;
    let capacity: i64 = row.try_get("capacity").map_err(decode)?;

    let product_associations = associations
        .iter()
        .map(|r| {
            let product_id: Uuid = r.try_get("product_id").map_err(decode)?;
            let quantity: i64 = r.try_get("quantity").map_err(decode)?;
            Ok(ProductAssociation::new(
                ProductId::from_uuid(product_id),
                non_negative("storage_unit_products.quantity", quantity)?,
            ))
        })
        .collect::<Result<Vec<_>, RepositoryError>>()?;

    let labels = labels
        .iter()
        .map(|r| r.try_get::<String, _>("label").map_err(decode))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(StorageUnit {
        id: StorageUnitId::from_uuid(id),
        parent_id: parent_id.map(StorageUnitId::from_uuid),
        area_id: area_id.map(AreaId::from_uuid),
        capacity: non_negative("storage_units.capacity", capacity)?,
        children: children.into_iter().map(StorageUnitId::from_uuid).collect(),
        product_associations,
        labels,
    })
}

fn non_negative(column: &str, value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value).map_err(|_| RepositoryError::Backend(format!("{column} is negative ({value})")))
}

/// Map SQLx errors to repository errors, separating transient failures.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code() {
                Some(code) if is_transient_sqlstate(code.as_ref()) => RepositoryError::Unavailable(msg),
                _ => RepositoryError::Backend(msg),
            }
        }
        sqlx::Error::PoolTimedOut => {
            RepositoryError::Unavailable(format!("connection pool timed out in {}", operation))
        }
        sqlx::Error::PoolClosed => {
            RepositoryError::Unavailable(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::Io(e) => RepositoryError::Unavailable(format!("io error in {}: {}", operation, e)),
        sqlx::Error::Tls(e) => RepositoryError::Unavailable(format!("tls error in {}: {}", operation, e)),
        sqlx::Error::Protocol(msg) => {
            RepositoryError::Unavailable(format!("protocol error in {}: {}", operation, msg))
        }
        _ => RepositoryError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

/// Connection exceptions, admin shutdown, serialization failure, deadlock.
fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "57P01" | "40001" | "40P01")
}
