use async_trait::async_trait;
use bytes::Bytes;

use crate::core::metadata::{MetadataIdentifier, MetadataRoot};

/// Where and under which root a collector finds the metadata tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataConnection {
    pub address: String,
    pub root: MetadataRoot,
}

impl MetadataConnection {
    pub fn new(address: impl Into<String>, group: Option<&str>) -> Self {
        Self {
            address: address.into(),
            root: MetadataRoot::new(group),
        }
    }
}

/// Read access to provider metadata documents.
///
/// A missing document and an unreachable store look the same to callers:
/// both yield `None`.
#[async_trait]
pub trait MetadataCollector: Send + Sync + 'static {
    /// Bind the collector to a store. Called once before any lookup.
    fn initialize(&mut self, connection: &MetadataConnection) -> eyre::Result<()>;

    async fn provider_metadata(&self, id: &MetadataIdentifier) -> Option<Bytes>;
}
