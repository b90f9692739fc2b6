use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use eyre::{Result, eyre};

use crate::{
    core::metadata::{MetadataIdentifier, MetadataRoot},
    ports::metadata_collector::{MetadataCollector, MetadataConnection},
};

/// Reads metadata documents from a directory tree laid out like the
/// registry's node paths: `<address><root>/metadata/.../service.data`.
#[derive(Debug, Default)]
pub struct FileMetadataCollector {
    base: Option<PathBuf>,
    root: MetadataRoot,
}

impl FileMetadataCollector {
    fn document_path(&self, id: &MetadataIdentifier) -> Option<PathBuf> {
        let base = self.base.as_ref()?;
        let node = self.root.node_path(id);
        Some(base.join(node.trim_start_matches('/')))
    }
}

#[async_trait]
impl MetadataCollector for FileMetadataCollector {
    fn initialize(&mut self, connection: &MetadataConnection) -> Result<()> {
        let base = PathBuf::from(&connection.address);
        if !base.is_dir() {
            return Err(eyre!(
                "metadata directory {} does not exist",
                base.display()
            ));
        }
        tracing::info!(
            "Reading provider metadata from {} under {}",
            base.display(),
            connection.root.as_str()
        );
        self.base = Some(base);
        self.root = connection.root.clone();
        Ok(())
    }

    async fn provider_metadata(&self, id: &MetadataIdentifier) -> Option<Bytes> {
        let path = self.document_path(id)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Some(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No metadata at {}", path.display());
                None
            }
            Err(e) => {
                tracing::warn!("Failed to read metadata {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// Metadata held in memory, keyed by the identifier's unique key
/// independent of the connection root.
#[derive(Default)]
pub struct InMemoryMetadataCollector {
    documents: scc::HashMap<String, Bytes>,
}

impl InMemoryMetadataCollector {
    /// Store `document` for `id`, replacing any previous one.
    pub fn insert(&self, id: &MetadataIdentifier, document: Bytes) {
        let _ = self.documents.upsert_sync(id.unique_key(), document);
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait]
impl MetadataCollector for InMemoryMetadataCollector {
    fn initialize(&mut self, connection: &MetadataConnection) -> Result<()> {
        tracing::debug!(
            "In-memory metadata for {} ({} documents)",
            connection.root.as_str(),
            self.documents.len()
        );
        Ok(())
    }

    async fn provider_metadata(&self, id: &MetadataIdentifier) -> Option<Bytes> {
        self.documents
            .read_async(&id.unique_key(), |_, v| v.clone())
            .await
    }
}
