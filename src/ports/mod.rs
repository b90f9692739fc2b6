//! Traits for the collaborators the gateway core depends on.
pub mod metadata_collector;
pub mod name_registry;
pub mod rpc_invoker;
