use crate::buffer_pool::BufferPool;
use crate::catalog::Catalog;
use crate::config::DbConfig;

/// Bundles the Catalog and BufferPool a process needs. Callers hold a
/// `Database` (or a reference to one) explicitly rather than reaching for a
/// global singleton, so multiple independent instances (e.g. one per test)
/// never share state.
pub struct Database {
    buffer_pool: BufferPool,
    catalog: Catalog,
}

impl Database {
    pub fn new() -> Self {
        Self::with_config(DbConfig::default())
    }

    pub fn with_config(config: DbConfig) -> Self {
        Database {
            buffer_pool: BufferPool::with_config(config.num_pages, config.lock_backoff_ms),
            catalog: Catalog::new(),
        }
    }

    pub fn get_buffer_pool(&self) -> &BufferPool {
        &self.buffer_pool
    }

    pub fn get_catalog(&self) -> &Catalog {
        &self.catalog
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}
