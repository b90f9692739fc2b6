//! Key computation for provider metadata lookups.
//!
//! The gateway never reads the metadata store itself; it only derives the node
//! path a [`MetadataCollector`](crate::ports::metadata_collector::MetadataCollector)
//! should fetch.
use std::fmt;

const METADATA_PREFIX: &str = "metadata";
const NODE_NAME: &str = "service.data";
pub const DEFAULT_ROOT: &str = "dubbo";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Provider,
    Consumer,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Provider => "provider",
            Side::Consumer => "consumer",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one metadata document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetadataIdentifier {
    pub service_interface: String,
    pub version: Option<String>,
    pub group: Option<String>,
    pub side: Side,
    pub application: String,
}

impl MetadataIdentifier {
    pub fn provider(
        service_interface: impl Into<String>,
        version: Option<String>,
        group: Option<String>,
        application: impl Into<String>,
    ) -> Self {
        Self {
            service_interface: service_interface.into(),
            version,
            group,
            side: Side::Provider,
            application: application.into(),
        }
    }

    /// `metadata/<service>/<version>/<group>/<side>/<application>`, with absent
    /// or blank version and group left out and the service url-encoded.
    pub fn unique_key(&self) -> String {
        let mut parts: Vec<String> = vec![
            METADATA_PREFIX.to_string(),
            urlencoding::encode(&self.service_interface).into_owned(),
        ];
        for optional in [&self.version, &self.group].into_iter().flatten() {
            if !optional.is_empty() {
                parts.push(optional.clone());
            }
        }
        parts.push(self.side.as_str().to_string());
        parts.push(self.application.clone());
        parts.join("/")
    }
}

/// Root directory of the metadata tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRoot {
    root: String,
}

impl Default for MetadataRoot {
    fn default() -> Self {
        Self::new(None)
    }
}

impl MetadataRoot {
    /// Normalise `group` to a leading `/`. Absent or blank groups fall back to
    /// `/dubbo`.
    pub fn new(group: Option<&str>) -> Self {
        let group = group
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .unwrap_or(DEFAULT_ROOT);
        let root = if group.starts_with('/') {
            group.to_string()
        } else {
            format!("/{group}")
        };
        Self { root }
    }

    pub fn as_str(&self) -> &str {
        &self.root
    }

    /// Full node path of the document for `id`.
    pub fn node_path(&self, id: &MetadataIdentifier) -> String {
        let dir = if self.root == "/" {
            String::from("/")
        } else {
            format!("{}/", self.root)
        };
        format!("{dir}{}/{NODE_NAME}", id.unique_key())
    }
}
