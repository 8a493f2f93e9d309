//! Storage-hierarchy aggregation engine.
//!
//! Computes capacity, product stock and low-stock alerts over a recursively
//! nested tree of storage units (pallet → shelf → bin). The repository is a
//! port ([`StorageRepository`]) fetching one level at a time; the aggregator
//! descends, fanning out over children under a bounded concurrency budget.

pub mod aggregator;
pub mod alerts;
pub mod config;
pub mod error;
mod fetcher;
pub mod in_memory;
pub mod repository;
pub mod statistics;
pub mod summary;
pub mod unit;

pub use aggregator::SubtreeAggregator;
pub use alerts::{LowStockAlert, LowStockAlertEvaluator};
pub use config::{AggregationConfig, AlertConfig, BackoffStrategy, RetryPolicy};
pub use error::AggregationError;
pub use in_memory::InMemoryStorageRepository;
pub use repository::{RepositoryError, StorageRepository};
pub use statistics::{OrganizationInventorySnapshot, OrganizationInventoryStatistics};
pub use summary::{ProductCount, ProductSummary, SubtreeSummary};
pub use unit::{ProductAssociation, StorageUnit};
