pub mod http_handler;
pub mod metadata_store;
pub mod middleware;
pub mod name_registry;
pub mod rpc_client;

/// Re-export commonly used types from adapters
pub use http_handler::HttpHandler;
pub use metadata_store::{FileMetadataCollector, InMemoryMetadataCollector};
pub use middleware::*;
pub use name_registry::{FileNameRegistry, StaticNameRegistry};
pub use rpc_client::HttpRpcInvoker;
