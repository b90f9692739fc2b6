//! Filter contract and the static registry that assembles a chain.
//!
//! Filters are looked up by name in a [`FilterRegistry`] and ordered by the
//! priority given in configuration. Lower priorities run their pre-phase first
//! and their post-phase last.
use std::{collections::BTreeMap, collections::HashMap, fmt, sync::Arc};

use thiserror::Error;

use crate::{
    config::models::{FilterEntry, GatewayConfig},
    core::{
        context::{ContextError, RequestContext},
        filters::{AccessLogFilter, AuthorizeFilter, InvokeFilter, ResponseHeadersFilter},
        name_table::NameTable,
    },
    ports::rpc_invoker::{Completion, RpcInvoker},
};

/// What the chain should do after a pre-phase returns.
#[derive(Debug)]
pub enum FilterFlow {
    /// Run the next stage.
    Continue,
    /// Stop here. The filter has recorded a rejection on the context.
    Halt,
    /// A remote call was issued; resume once the completion resolves.
    Suspend(Completion),
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FilterError {
    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("{0}")]
    Failed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BuildError {
    /// No factory registered under this name
    #[error("unknown filter '{0}'")]
    UnknownFilter(String),

    /// Two configured filters share one priority
    #[error("filters '{first}' and '{second}' share priority {priority}")]
    DuplicatePriority {
        priority: i32,
        first: String,
        second: String,
    },

    /// A filter refused its configuration
    #[error("filter '{name}' failed to initialize: {reason}")]
    Initialization { name: String, reason: String },
}

/// One pipeline stage.
///
/// Filters are shared by every request, so per-request state lives on the
/// [`RequestContext`], never on the filter.
pub trait Filter: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Called once before the first request.
    fn initialize(&mut self, _config: &GatewayConfig) -> Result<(), FilterError> {
        Ok(())
    }

    fn pre_filter(&self, ctx: &mut RequestContext) -> Result<FilterFlow, FilterError>;

    /// Runs after every inner stage finished, in reverse pre-phase order.
    fn post_filter(&self, _ctx: &mut RequestContext) -> Result<(), FilterError> {
        Ok(())
    }

    /// Called once at shutdown.
    fn destroy(&self) {}
}

/// Shared collaborators a filter factory may need.
#[derive(Clone)]
pub struct FilterDeps {
    pub names: Arc<NameTable>,
    pub invoker: Arc<dyn RpcInvoker>,
}

impl fmt::Debug for FilterDeps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterDeps")
            .field("names", &self.names.len())
            .finish_non_exhaustive()
    }
}

pub type FilterFactory = Arc<dyn Fn(&FilterDeps) -> Box<dyn Filter> + Send + Sync>;

/// A filter paired with its chain position.
pub struct Stage {
    pub priority: i32,
    pub filter: Box<dyn Filter>,
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("priority", &self.priority)
            .field("filter", &self.filter.name())
            .finish()
    }
}

/// Name to factory map populated at process start.
#[derive(Clone)]
pub struct FilterRegistry {
    factories: HashMap<String, FilterFactory>,
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("FilterRegistry").field("filters", &names).finish()
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl FilterRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with `access_log`, `response_headers`, `authorize` and `invoke`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(AccessLogFilter::NAME, |_| Box::new(AccessLogFilter::new()));
        registry.register(ResponseHeadersFilter::NAME, |_| {
            Box::new(ResponseHeadersFilter::new())
        });
        registry.register(AuthorizeFilter::NAME, |deps| {
            Box::new(AuthorizeFilter::new(deps.names.clone()))
        });
        registry.register(InvokeFilter::NAME, |deps| {
            Box::new(InvokeFilter::new(deps.invoker.clone()))
        });
        registry
    }

    /// Register (or replace) a factory under `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&FilterDeps) -> Box<dyn Filter> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Instantiate and initialize `entries`, returning stages sorted by priority.
    pub fn build(
        &self,
        entries: &[FilterEntry],
        config: &GatewayConfig,
        deps: &FilterDeps,
    ) -> Result<Vec<Stage>, BuildError> {
        let mut ordered: BTreeMap<i32, (String, Box<dyn Filter>)> = BTreeMap::new();

        for entry in entries {
            let factory = self
                .factories
                .get(&entry.name)
                .ok_or_else(|| BuildError::UnknownFilter(entry.name.clone()))?;

            if let Some((existing, _)) = ordered.get(&entry.priority) {
                return Err(BuildError::DuplicatePriority {
                    priority: entry.priority,
                    first: existing.clone(),
                    second: entry.name.clone(),
                });
            }

            let mut filter = factory(deps);
            filter
                .initialize(config)
                .map_err(|e| BuildError::Initialization {
                    name: entry.name.clone(),
                    reason: e.to_string(),
                })?;
            ordered.insert(entry.priority, (entry.name.clone(), filter));
        }

        let stages: Vec<Stage> = ordered
            .into_iter()
            .map(|(priority, (_, filter))| Stage { priority, filter })
            .collect();

        tracing::info!(
            "Filter chain assembled: [{}]",
            stages
                .iter()
                .map(|s| format!("{}@{}", s.filter.name(), s.priority))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(stages)
    }
}
