use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::name_table::NameTable;

/// Error type for registry operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RegistryError {
    /// Error when encountering an IO issue
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The name document could not be parsed
    #[error("invalid name document: {0}")]
    Parse(#[from] serde_json::Error),

    /// The change subscription could not be established
    #[error("watch error: {0}")]
    Watch(String),
}

/// Source of `application -> {service -> resolved name}` updates.
///
/// Implementations publish into the shared [`NameTable`] for as long as they
/// are alive; consumers only ever read the table.
#[async_trait]
pub trait NameRegistry: Send + Sync + 'static {
    /// Seed the table and start publishing updates into it.
    async fn initialize(&self, table: Arc<NameTable>) -> Result<(), RegistryError>;

    /// Stop publishing. The table keeps its last contents.
    async fn destroy(&self);
}
