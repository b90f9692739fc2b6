//! Process-wide `application -> service -> resolved name` cache.
//!
//! Readers take a lock-free snapshot through `ArcSwap`; writers publish a new
//! table wholesale, so a lookup never observes a half-applied update.
use std::{collections::HashMap, sync::Arc};

use arc_swap::ArcSwap;

use crate::metrics::set_name_table_applications;

pub type ServiceNames = HashMap<String, String>;
pub type NameSnapshot = HashMap<String, Arc<ServiceNames>>;

#[derive(Debug, Default)]
pub struct NameTable {
    inner: ArcSwap<NameSnapshot>,
}

impl NameTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: HashMap<String, ServiceNames>) -> Self {
        let table = Self::new();
        table.replace(map);
        table
    }

    /// Resolved name for `service` under `application`. Blank entries count
    /// as missing.
    pub fn resolve(&self, application: &str, service: &str) -> Option<String> {
        self.inner
            .load()
            .get(application)
            .and_then(|services| services.get(service))
            .filter(|name| !name.trim().is_empty())
            .cloned()
    }

    /// Swap in a complete new table.
    pub fn replace(&self, map: HashMap<String, ServiceNames>) {
        let snapshot: NameSnapshot = map
            .into_iter()
            .map(|(app, services)| (app, Arc::new(services)))
            .collect();
        let count = snapshot.len();
        self.inner.store(Arc::new(snapshot));
        set_name_table_applications(count);
        tracing::debug!("Name table replaced with {} applications", count);
    }

    /// Publish a new service map for one application, leaving the others untouched.
    pub fn update_application(&self, application: &str, services: ServiceNames) {
        let services = Arc::new(services);
        let previous = self.inner.rcu(|current| {
            let mut next = NameSnapshot::clone(current);
            next.insert(application.to_string(), services.clone());
            next
        });
        let added = usize::from(!previous.contains_key(application));
        set_name_table_applications(previous.len() + added);
    }

    pub fn remove_application(&self, application: &str) {
        let previous = self.inner.rcu(|current| {
            let mut next = NameSnapshot::clone(current);
            next.remove(application);
            next
        });
        let removed = usize::from(previous.contains_key(application));
        set_name_table_applications(previous.len() - removed);
    }

    pub fn clear(&self) {
        self.replace(HashMap::new());
    }

    pub fn snapshot(&self) -> Arc<NameSnapshot> {
        self.inner.load_full()
    }

    pub fn len(&self) -> usize {
        self.inner.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
