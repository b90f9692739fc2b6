//! rpcgate - an HTTP-to-RPC gateway built around an asynchronous filter chain.
//!
//! Requests under `/{application}/{app}/{service}/{method}` are turned into a
//! [`RequestContext`](core::RequestContext), run through an ordered chain of
//! filters (pre-phase ascending, post-phase in reverse), and forwarded to a
//! remote service through an [`RpcInvoker`](ports::rpc_invoker::RpcInvoker).
//! The chain suspends while the call is in flight and resumes on whatever task
//! delivers the result, so no thread is parked waiting for a provider.
//!
//! # Features
//! - Pluggable filters registered by name and ordered by configured priority
//! - Service mapping with group/version defaults and a hot-reloadable name table
//! - Inline execution or a bounded worker pool with fast `503` rejection
//! - Bounded RPC wait with a distinct `504` timeout status
//! - Exactly one response per request, on every success and failure path
//! - Structured tracing with per-request spans carried across the async hop
//! - Metrics through the `metrics` facade
//! - Graceful shutdown
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use rpcgate::{GatewayService, HttpHandler, adapters::HttpRpcInvoker, config::GatewayConfig};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let cfg: GatewayConfig = rpcgate::config::loader::load_config("config.toml").await?;
//! let invoker = Arc::new(HttpRpcInvoker::new(&cfg.rpc.endpoint)?);
//! let gateway = Arc::new(GatewayService::builder(Arc::new(cfg)).invoker(invoker).build()?);
//! gateway.start().await?;
//! let app = Arc::new(HttpHandler::new(gateway)).router();
//! # let _ = app;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations) while keeping
//! the pipeline itself inside `core`, which performs no socket I/O.
//!
//! # Error Handling
//! Library errors are `thiserror` enums; bootstrap code returns `eyre::Result<T>`.
//! Every request-path failure is mapped onto a [`GatewayStatus`](core::GatewayStatus).
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::HttpHandler,
    core::{GatewayService, GatewayStatus},
    utils::GracefulShutdown,
};
