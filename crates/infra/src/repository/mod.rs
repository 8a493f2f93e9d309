//! Storage repository adapters.

pub mod postgres;

pub use postgres::PostgresStorageRepository;
pub use stockforge_storage::InMemoryStorageRepository;
