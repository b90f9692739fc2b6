//! Core gateway orchestration service.
//!
//! `GatewayService` ties the assembled filter chain to the isolation policy
//! and owns the lifecycle of the shared collaborators (name table, name
//! registry, worker pool). It performs no socket I/O; the HTTP adapter hands it
//! ready-built request contexts.
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use thiserror::Error;

use crate::{
    config::models::GatewayConfig,
    core::{
        chain::FilterChain,
        context::RequestContext,
        filter::{BuildError, FilterDeps, FilterRegistry},
        isolation::{Isolation, PoolError},
        name_table::NameTable,
        status::GatewayStatus,
    },
    metrics::increment_worker_pool_rejections,
    ports::{
        name_registry::{NameRegistry, RegistryError},
        rpc_invoker::RpcInvoker,
    },
};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    /// The filter chain could not be assembled
    #[error("filter chain: {0}")]
    Filters(#[from] BuildError),

    /// The worker pool could not be started
    #[error("worker pool: {0}")]
    Pool(#[from] PoolError),

    /// The name registry failed to start
    #[error("name registry: {0}")]
    Registry(#[from] RegistryError),

    /// `rpc.timeout` is not a valid duration
    #[error("invalid rpc timeout: {0}")]
    InvalidTimeout(#[from] humantime::DurationError),

    /// No RPC invoker was supplied
    #[error("an RPC invoker is required")]
    MissingInvoker,
}

/// Central request dispatcher. Share it behind an `Arc`.
pub struct GatewayService {
    config: Arc<GatewayConfig>,
    prefix: String,
    chain: Arc<FilterChain>,
    names: Arc<NameTable>,
    isolation: Isolation,
    registry: Option<Arc<dyn NameRegistry>>,
    stopped: AtomicBool,
}

impl fmt::Debug for GatewayService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayService")
            .field("prefix", &self.prefix)
            .field("filters", &self.chain.filter_names())
            .field("pooled", &self.isolation.is_pooled())
            .finish_non_exhaustive()
    }
}

impl GatewayService {
    pub fn builder(config: Arc<GatewayConfig>) -> GatewayServiceBuilder {
        GatewayServiceBuilder {
            config,
            invoker: None,
            filters: None,
            names: None,
            registry: None,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn names(&self) -> &Arc<NameTable> {
        &self.names
    }

    pub fn chain(&self) -> &Arc<FilterChain> {
        &self.chain
    }

    /// `true` when `path` lies below the gateway application segment.
    pub fn matches_application(&self, path: &str) -> bool {
        path.starts_with(&self.prefix)
    }

    /// Run the chain for `ctx` under the configured isolation policy. A
    /// saturated or stopped pool answers `ServerBusy` right away.
    pub fn dispatch(&self, mut ctx: RequestContext) {
        match self.isolation.admit() {
            Ok(admission) => {
                let chain = self.chain.clone();
                admission.run(move || chain.process(ctx));
            }
            Err(e) => {
                tracing::warn!(path = %ctx.path(), error = %e, "Rejecting request");
                increment_worker_pool_rejections();
                ctx.reject(GatewayStatus::ServerBusy);
                if let Err(e) = ctx.write_and_flush() {
                    tracing::error!(path = %ctx.path(), error = %e, "Failed to write rejection");
                }
            }
        }
    }

    /// Start publishing registry updates into the name table.
    pub async fn start(&self) -> Result<(), GatewayError> {
        if let Some(registry) = &self.registry {
            registry.initialize(self.names.clone()).await?;
        }
        tracing::info!(
            "Gateway ready under /{} with filters [{}]",
            self.config.application,
            self.chain.filter_names().join(", ")
        );
        Ok(())
    }

    /// Tear down filters, the registry, the name table and the worker pool.
    /// Idempotent.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.chain.destroy();
        if let Some(registry) = &self.registry {
            registry.destroy().await;
        }
        self.names.clear();
        self.isolation.shutdown();
        tracing::info!("Gateway stopped");
    }
}

pub struct GatewayServiceBuilder {
    config: Arc<GatewayConfig>,
    invoker: Option<Arc<dyn RpcInvoker>>,
    filters: Option<FilterRegistry>,
    names: Option<Arc<NameTable>>,
    registry: Option<Arc<dyn NameRegistry>>,
}

impl GatewayServiceBuilder {
    pub fn invoker(mut self, invoker: Arc<dyn RpcInvoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    /// Filter factories to draw from. Defaults to the built-ins.
    pub fn filters(mut self, registry: FilterRegistry) -> Self {
        self.filters = Some(registry);
        self
    }

    /// Share an existing name table instead of creating an empty one.
    pub fn names(mut self, names: Arc<NameTable>) -> Self {
        self.names = Some(names);
        self
    }

    pub fn name_registry(mut self, registry: Arc<dyn NameRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Assemble the chain and start the worker pool (if configured).
    pub fn build(self) -> Result<GatewayService, GatewayError> {
        let invoker = self.invoker.ok_or(GatewayError::MissingInvoker)?;
        let names = self.names.unwrap_or_default();
        let filters = self.filters.unwrap_or_default();

        let deps = FilterDeps {
            names: names.clone(),
            invoker,
        };
        let stages = filters.build(&self.config.filters, &self.config, &deps)?;
        let chain = Arc::new(FilterChain::new(stages, self.config.invoke_timeout()?));
        let isolation = Isolation::from_config(self.config.worker_pool.as_ref())?;

        Ok(GatewayService {
            prefix: format!("/{}/", self.config.application),
            config: self.config,
            chain,
            names,
            isolation,
            registry: self.registry,
            stopped: AtomicBool::new(false),
        })
    }
}
