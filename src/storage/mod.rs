//! Pluggable storage for baskets and their collected requests.
//!
//! Three interchangeable backends satisfy the same two contracts:
//!
//! - `memory`: process-local state, gone at exit
//! - `rocks`: embedded key-value store on disk
//! - `sqlite`: embedded relational store on disk
//!
//! A [`Basket`] handle exposes the per-basket operations; for the persistent
//! backends it is a small value holding a reference to the backend plus the
//! basket name, with all state living in the backend.

mod memory;
mod rocks;
mod sqlite;

#[cfg(test)]
pub(crate) mod testsuite;

pub use memory::MemoryDatabase;
pub use rocks::RocksDatabase;
pub use sqlite::SqliteDatabase;

use std::path::Path;
use std::sync::Arc;
use tracing::error;

use crate::basket::{
    BasketAuth, BasketConfig, BasketNamesPage, BasketNamesQueryPage, RequestData, RequestsPage,
    RequestsQueryPage, ResponseConfig,
};

/// Name of the in-memory backend.
pub const DB_TYPE_MEMORY: &str = "mem";
/// Name of the embedded key-value backend.
pub const DB_TYPE_KV: &str = "kv";
/// Name of the SQL backend.
pub const DB_TYPE_SQL: &str = "sql";

/// A named, capacity-bounded sink for inbound HTTP requests.
///
/// All operations are safe to call from concurrent listener tasks. Readers may
/// proceed in parallel; writers serialize per basket.
pub trait Basket: Send + Sync {
    /// Current configuration snapshot.
    fn config(&self) -> BasketConfig;

    /// Replaces the configuration. If the new capacity is below the current
    /// ring size the oldest requests are dropped until the ring fits.
    fn update(&self, config: BasketConfig);

    /// Checks a basket token. The master token is the caller's concern.
    fn authorize(&self, token: &str) -> bool;

    /// Configured response for an uppercase HTTP method, if any.
    fn get_response(&self, method: &str) -> Option<ResponseConfig>;

    /// Creates or replaces the response for an uppercase HTTP method.
    fn set_response(&self, method: &str, response: ResponseConfig);

    /// Stores a captured request, evicting the oldest one when the ring is at
    /// capacity, and returns the stored record.
    fn add(&self, data: RequestData) -> RequestData;

    /// Drops all collected requests. The total counter is kept.
    fn clear(&self);

    /// Number of requests currently held.
    fn size(&self) -> usize;

    /// Newest-first page of collected requests.
    fn get_requests(&self, max: usize, skip: usize) -> RequestsPage;

    /// Newest-first page of requests matching a search filter.
    fn find_requests(&self, query: &str, scope: &str, max: usize, skip: usize)
        -> RequestsQueryPage;
}

/// Error raised by basket store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("basket with name '{0}' already exists")]
    NameConflict(String),
    #[error("failed to generate token: {0}")]
    Token(#[source] anyhow::Error),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Collection of baskets keyed by unique name.
pub trait BasketsDatabase: Send + Sync {
    /// Creates a basket with a freshly generated token and returns the token.
    /// Fails if the name is taken.
    fn create(&self, name: &str, config: BasketConfig) -> Result<BasketAuth, StoreError>;

    /// Basket handle by name; `None` if unknown.
    fn get(&self, name: &str) -> Option<Arc<dyn Basket>>;

    /// Deletes a basket with everything it holds. Silent if unknown.
    fn delete(&self, name: &str);

    /// Number of baskets.
    fn size(&self) -> usize;

    /// Page of basket names. Listing order is deterministic per backend:
    /// creation order for memory, lexicographic for the persistent backends.
    fn get_names(&self, max: usize, skip: usize) -> BasketNamesPage;

    /// Page of basket names containing `query` as a substring.
    fn find_names(&self, query: &str, max: usize, skip: usize) -> BasketNamesQueryPage;

    /// Releases backend resources (open files, connections).
    fn release(&self);
}

/// Creates a baskets database of the requested kind.
///
/// For the SQL backend a non-empty connection string takes precedence over
/// the file path.
pub fn create_baskets_database(
    kind: &str,
    file: &Path,
    connection: &str,
) -> Option<Arc<dyn BasketsDatabase>> {
    match kind {
        DB_TYPE_MEMORY => Some(Arc::new(MemoryDatabase::new())),
        DB_TYPE_KV => match RocksDatabase::open(file) {
            Ok(db) => Some(Arc::new(db)),
            Err(e) => {
                error!("failed to open key-value database: {e}");
                None
            }
        },
        DB_TYPE_SQL => {
            let result = if connection.is_empty() {
                SqliteDatabase::open(file)
            } else {
                SqliteDatabase::open_connection(connection)
            };
            match result {
                Ok(db) => Some(Arc::new(db)),
                Err(e) => {
                    error!("failed to open SQL database: {e}");
                    None
                }
            }
        }
        other => {
            error!("unknown database type: {other}");
            None
        }
    }
}
