pub mod chain;
pub mod context;
pub mod filter;
pub mod filters;
pub mod gateway;
pub mod isolation;
pub mod mapping;
pub mod metadata;
pub mod name_table;
pub mod status;

pub use chain::FilterChain;
pub use context::RequestContext;
pub use filter::{Filter, FilterFlow, FilterRegistry};
pub use gateway::GatewayService;
pub use status::GatewayStatus;
