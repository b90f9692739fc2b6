use std::sync::Arc;

use crate::{
    config::models::GatewayConfig,
    core::{
        context::RequestContext,
        filter::{Filter, FilterError, FilterFlow},
        mapping::ServiceMappingResolver,
        name_table::NameTable,
        status::GatewayStatus,
    },
};

/// Resolves the request path into a service mapping and rejects requests
/// that do not have the `/{application}/{service}/{method}` shape.
#[derive(Debug)]
pub struct AuthorizeFilter {
    resolver: ServiceMappingResolver,
}

impl AuthorizeFilter {
    pub const NAME: &'static str = "authorize";

    pub fn new(names: Arc<NameTable>) -> Self {
        Self {
            resolver: ServiceMappingResolver::new(names),
        }
    }
}

impl Filter for AuthorizeFilter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn initialize(&mut self, config: &GatewayConfig) -> Result<(), FilterError> {
        self.resolver = self.resolver.clone().with_defaults(
            config.routing.default_group.clone(),
            config.routing.default_version.clone(),
        );
        Ok(())
    }

    fn pre_filter(&self, ctx: &mut RequestContext) -> Result<FilterFlow, FilterError> {
        match self.resolver.resolve(ctx.paths(), ctx.parameters()) {
            Ok(mapping) => {
                tracing::debug!("Resolved {} to {}", ctx.path(), mapping);
                ctx.set_service_mapping(mapping);
                Ok(FilterFlow::Continue)
            }
            Err(e) => {
                tracing::warn!(path = %ctx.path(), error = %e, "Rejecting illegal request");
                ctx.reject(GatewayStatus::IllegalRequest);
                Ok(FilterFlow::Halt)
            }
        }
    }
}
