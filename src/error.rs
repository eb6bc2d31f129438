use thiserror::Error;

use crate::heap_page::HeapPageId;
use crate::transaction::TransactionId;

/// Crate-wide error type. Every fallible public API returns `Result<T>`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("schema mismatch")]
    SchemaMismatch,

    #[error("no table named {0:?}")]
    NoSuchTable(String),

    #[error("no field named {0:?}")]
    NoSuchField(String),

    #[error("page {0:?} does not belong to this table")]
    BadTable(HeapPageId),

    #[error("no empty slot available on page {0:?}")]
    NoSpace(HeapPageId),

    #[error("tuple is not present on page {0:?}")]
    NotOnPage(HeapPageId),

    #[error("transaction {0:?} detected a deadlock and must abort")]
    Deadlock(TransactionId),

    #[error("transaction {0:?} was aborted")]
    TransactionAborted(TransactionId),

    #[error("buffer pool is full of dirty pages, no clean page to evict")]
    NoEvictionCandidate,

    #[error("iterator exhausted")]
    NoMoreTuples,

    #[error("aggregation operator does not support this combination of type and operation")]
    UnsupportedAggregation,

    #[error("malformed catalog entry: {0}")]
    CatalogParse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;
