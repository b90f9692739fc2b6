//! Name registries that feed the shared [`NameTable`].
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use notify::{RecursiveMode, Watcher};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    core::name_table::{NameTable, ServiceNames},
    ports::name_registry::{NameRegistry, RegistryError},
};

/// Coalesce bursts of file events into a single reload.
const RELOAD_DEBOUNCE: Duration = Duration::from_millis(50);

/// Fixed set of names, published once at startup.
#[derive(Debug, Default, Clone)]
pub struct StaticNameRegistry {
    applications: HashMap<String, ServiceNames>,
}

impl StaticNameRegistry {
    pub fn with_service(
        mut self,
        application: impl Into<String>,
        service: impl Into<String>,
        resolved: impl Into<String>,
    ) -> Self {
        self.applications
            .entry(application.into())
            .or_default()
            .insert(service.into(), resolved.into());
        self
    }

    pub fn with_application(mut self, application: impl Into<String>, services: ServiceNames) -> Self {
        self.applications.insert(application.into(), services);
        self
    }
}

#[async_trait]
impl NameRegistry for StaticNameRegistry {
    async fn initialize(&self, table: Arc<NameTable>) -> Result<(), RegistryError> {
        for (application, services) in &self.applications {
            table.update_application(application, services.clone());
        }
        tracing::info!(
            "Published {} applications from static names",
            self.applications.len()
        );
        Ok(())
    }

    async fn destroy(&self) {}
}

/// Names read from a JSON document of the form
/// `{"<application>": {"<service>": "<resolved name>"}}`.
///
/// The file is watched after startup; every change replaces the whole table.
/// A change that fails to parse leaves the previous table in place.
pub struct FileNameRegistry {
    path: PathBuf,
    watch: Mutex<Option<WatchState>>,
}

struct WatchState {
    _watcher: notify::RecommendedWatcher,
    reload: JoinHandle<()>,
}

impl FileNameRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            watch: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(path: &Path) -> Result<HashMap<String, ServiceNames>, RegistryError> {
        let raw = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    fn start_watcher(&self, tx: mpsc::Sender<()>) -> Result<notify::RecommendedWatcher, RegistryError> {
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| RegistryError::Watch(format!("invalid path {}", self.path.display())))?
            .to_owned();

        let mut watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if (event.kind.is_modify() || event.kind.is_create())
                        && event
                            .paths
                            .iter()
                            .any(|p| p.file_name() == Some(&file_name))
                    {
                        tracing::debug!("Name file changed: {:?}", event.kind);
                        let _ = tx.try_send(());
                    }
                }
                Err(e) => tracing::error!("Name file watch error: {:?}", e),
            })
            .map_err(|e| RegistryError::Watch(e.to_string()))?;

        let watch_dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        watcher
            .watch(watch_dir, RecursiveMode::NonRecursive)
            .map_err(|e| RegistryError::Watch(e.to_string()))?;
        Ok(watcher)
    }
}

#[async_trait]
impl NameRegistry for FileNameRegistry {
    async fn initialize(&self, table: Arc<NameTable>) -> Result<(), RegistryError> {
        let names = Self::load(&self.path).await?;
        tracing::info!(
            "Loaded {} applications from {}",
            names.len(),
            self.path.display()
        );
        table.replace(names);

        let (tx, mut rx) = mpsc::channel(1);
        let watcher = self.start_watcher(tx)?;

        let path = self.path.clone();
        let reload = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                tokio::time::sleep(RELOAD_DEBOUNCE).await;
                while rx.try_recv().is_ok() {}

                match Self::load(&path).await {
                    Ok(names) => {
                        tracing::info!("Reloaded {} applications from {}", names.len(), path.display());
                        table.replace(names);
                    }
                    Err(e) => {
                        tracing::warn!("Keeping previous names, reload of {} failed: {}", path.display(), e);
                    }
                }
            }
        });

        let previous = self
            .watch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(WatchState {
                _watcher: watcher,
                reload,
            });
        if let Some(previous) = previous {
            previous.reload.abort();
        }
        Ok(())
    }

    async fn destroy(&self) {
        let state = self
            .watch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(state) = state {
            state.reload.abort();
            tracing::info!("Stopped watching {}", self.path.display());
        }
    }
}
