use http::{HeaderMap, HeaderName, HeaderValue};

use crate::{
    config::models::GatewayConfig,
    core::{
        context::RequestContext,
        filter::{Filter, FilterError, FilterFlow},
    },
};

pub const RPC_SERVICE_HEADER: &str = "x-rpc-service";

/// Adds the configured static headers plus the resolved service name to
/// every response.
#[derive(Debug, Default)]
pub struct ResponseHeadersFilter {
    headers: HeaderMap,
}

impl ResponseHeadersFilter {
    pub const NAME: &'static str = "response_headers";

    pub fn new() -> Self {
        Self::default()
    }
}

impl Filter for ResponseHeadersFilter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn initialize(&mut self, config: &GatewayConfig) -> Result<(), FilterError> {
        for (name, value) in &config.response_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| FilterError::Failed(format!("header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| FilterError::Failed(format!("header '{name}' value: {e}")))?;
            self.headers.insert(name, value);
        }
        Ok(())
    }

    fn pre_filter(&self, _ctx: &mut RequestContext) -> Result<FilterFlow, FilterError> {
        Ok(FilterFlow::Continue)
    }

    fn post_filter(&self, ctx: &mut RequestContext) -> Result<(), FilterError> {
        let service = ctx
            .service_mapping()
            .and_then(|m| HeaderValue::from_str(&m.service_name).ok());

        let headers = ctx.response_headers_mut();
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
        if let Some(service) = service {
            headers.insert(HeaderName::from_static(RPC_SERVICE_HEADER), service);
        }
        Ok(())
    }
}
