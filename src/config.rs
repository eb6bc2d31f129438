use config::{Config, File};

use crate::error::Result;

/// Tunables for a `Database` instance. Defaults match what the storage engine
/// has always assumed; an optional config file can override them without any
/// code change at the call site.
#[derive(Debug, Clone, Copy)]
pub struct DbConfig {
    pub num_pages: usize,
    pub lock_backoff_ms: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        DbConfig {
            num_pages: crate::buffer_pool::DEFAULT_PAGES,
            lock_backoff_ms: 10,
        }
    }
}

impl DbConfig {
    /// Loads overrides from `path` (TOML/JSON/YAML, inferred from extension),
    /// falling back to `Default::default()` for any field the file omits and
    /// for the whole config if `path` doesn't exist.
    pub fn load(path: &str) -> Result<Self> {
        let defaults = DbConfig::default();
        if !std::path::Path::new(path).exists() {
            return Ok(defaults);
        }
        let settings = Config::builder()
            .set_default("num_pages", defaults.num_pages as i64)?
            .set_default("lock_backoff_ms", defaults.lock_backoff_ms as i64)?
            .add_source(File::with_name(path))
            .build()?;

        Ok(DbConfig {
            num_pages: settings.get_int("num_pages")? as usize,
            lock_backoff_ms: settings.get_int("lock_backoff_ms")? as u64,
        })
    }
}
