//! Configuration data structures for the gateway.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files. They carry
//! serde defaults so that a minimal config only needs the RPC endpoint.
use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_application() -> String {
    "gw".to_string()
}

fn default_max_body_bytes() -> usize {
    4 * 1024 * 1024
}

fn default_keep_alive() -> String {
    "60s".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Filters installed when the config does not list any.
pub fn default_filters() -> Vec<FilterEntry> {
    vec![
        FilterEntry::new("access_log", 10),
        FilterEntry::new("response_headers", 20),
        FilterEntry::new("authorize", 30),
        FilterEntry::new("invoke", 100),
    ]
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// First path segment every routable request starts with.
    #[serde(default = "default_application")]
    pub application: String,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default)]
    pub routing: RoutingConfig,
    /// Absent (or `core_threads = 0`) runs the chain inline.
    #[serde(default)]
    pub worker_pool: Option<WorkerPoolConfig>,
    #[serde(default = "default_filters")]
    pub filters: Vec<FilterEntry>,
    pub rpc: RpcConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub metadata: Option<MetadataConfig>,
    /// Static headers added to every response by the `response_headers` filter.
    #[serde(default)]
    pub response_headers: HashMap<String, String>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl GatewayConfig {
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }

    /// Invocation timeout, `None` when unbounded.
    pub fn invoke_timeout(&self) -> Result<Option<Duration>, humantime::DurationError> {
        self.rpc
            .timeout
            .as_deref()
            .map(humantime::parse_duration)
            .transpose()
    }

    /// `true` when requests should be handed to a worker pool.
    pub fn isolation_enabled(&self) -> bool {
        self.worker_pool
            .as_ref()
            .is_some_and(|pool| pool.core_threads > 0)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            application: default_application(),
            max_body_bytes: default_max_body_bytes(),
            routing: RoutingConfig::default(),
            worker_pool: None,
            filters: default_filters(),
            rpc: RpcConfig::default(),
            registry: RegistryConfig::default(),
            metadata: None,
            response_headers: HashMap::new(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Defaults applied when the query string does not carry `group` / `version`.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RoutingConfig {
    pub default_group: Option<String>,
    pub default_version: Option<String>,
}

/// Bounded worker pool sizing.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WorkerPoolConfig {
    pub core_threads: usize,
    pub max_threads: usize,
    /// Idle expiry for threads above the core size, e.g. `"60s"`.
    #[serde(default = "default_keep_alive")]
    pub keep_alive: String,
    #[serde(default)]
    pub queue_capacity: usize,
}

impl WorkerPoolConfig {
    pub fn keep_alive_duration(&self) -> Result<Duration, humantime::DurationError> {
        humantime::parse_duration(&self.keep_alive)
    }
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            core_threads: 4,
            max_threads: 16,
            keep_alive: default_keep_alive(),
            queue_capacity: 256,
        }
    }
}

/// One chain position: a registered filter name and its priority.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FilterEntry {
    pub name: String,
    pub priority: i32,
}

impl FilterEntry {
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            priority,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RpcConfig {
    /// Base URL of the JSON-over-HTTP RPC endpoint.
    pub endpoint: String,
    /// Upper bound on waiting for a completion, e.g. `"3s"`.
    #[serde(default)]
    pub timeout: Option<String>,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:9090".to_string(),
            timeout: Some("3s".to_string()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RegistryConfig {
    /// JSON document `{app: {service: resolved}}`, reloaded on change.
    pub names_file: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MetadataConfig {
    /// Root directory the metadata node tree is mirrored under.
    pub address: String,
    #[serde(default)]
    pub group: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Builder for GatewayConfig, mostly used by tests and embedders.
#[derive(Default)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    pub fn application(mut self, application: impl Into<String>) -> Self {
        self.config.application = application.into();
        self
    }

    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.config.max_body_bytes = limit;
        self
    }

    pub fn default_group(mut self, group: impl Into<String>) -> Self {
        self.config.routing.default_group = Some(group.into());
        self
    }

    pub fn default_version(mut self, version: impl Into<String>) -> Self {
        self.config.routing.default_version = Some(version.into());
        self
    }

    pub fn worker_pool(mut self, pool: WorkerPoolConfig) -> Self {
        self.config.worker_pool = Some(pool);
        self
    }

    /// Replace the filter list.
    pub fn filters(mut self, filters: Vec<FilterEntry>) -> Self {
        self.config.filters = filters;
        self
    }

    /// Append one filter entry to the current list.
    pub fn filter(mut self, name: impl Into<String>, priority: i32) -> Self {
        self.config.filters.push(FilterEntry::new(name, priority));
        self
    }

    pub fn rpc_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.rpc.endpoint = endpoint.into();
        self
    }

    pub fn rpc_timeout(mut self, timeout: Option<&str>) -> Self {
        self.config.rpc.timeout = timeout.map(str::to_string);
        self
    }

    pub fn names_file(mut self, path: impl Into<String>) -> Self {
        self.config.registry.names_file = Some(path.into());
        self
    }

    pub fn metadata(mut self, address: impl Into<String>, group: Option<String>) -> Self {
        self.config.metadata = Some(MetadataConfig {
            address: address.into(),
            group,
        });
        self
    }

    pub fn response_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config
            .response_headers
            .insert(name.into(), value.into());
        self
    }

    pub fn build(self) -> GatewayConfig {
        self.config
    }
}
