use std::{fmt, sync::Arc};

use crate::{
    core::{
        context::{REQUEST_ID_HEADER, RequestContext},
        filter::{Filter, FilterError, FilterFlow},
        status::GatewayStatus,
    },
    metrics::increment_rpc_invocation,
    ports::rpc_invoker::{RpcInvoker, RpcRequest},
    tracing_setup::create_invoke_span,
};

/// Issues the remote call for the resolved mapping and suspends the chain
/// until it completes.
pub struct InvokeFilter {
    invoker: Arc<dyn RpcInvoker>,
}

impl fmt::Debug for InvokeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvokeFilter").finish_non_exhaustive()
    }
}

impl InvokeFilter {
    pub const NAME: &'static str = "invoke";

    pub fn new(invoker: Arc<dyn RpcInvoker>) -> Self {
        Self { invoker }
    }
}

impl Filter for InvokeFilter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn pre_filter(&self, ctx: &mut RequestContext) -> Result<FilterFlow, FilterError> {
        let mapping = ctx.service_mapping().cloned().ok_or_else(|| {
            FilterError::Failed("no service mapping resolved before invocation".to_string())
        })?;

        let span = create_invoke_span(&mapping.service_name, &mapping.method);
        let _entered = span.enter();

        let request = RpcRequest::new(mapping, ctx.body().clone())
            .with_attachment(REQUEST_ID_HEADER, ctx.request_id());

        match self.invoker.invoke_async(request) {
            Some(completion) => Ok(FilterFlow::Suspend(completion)),
            None => {
                span.record("rpc.outcome", "unavailable");
                tracing::error!(
                    path = %ctx.path(),
                    "RPC invoker returned no completion handle"
                );
                increment_rpc_invocation("unavailable");
                ctx.reject(GatewayStatus::InvokeUnavailable);
                Ok(FilterFlow::Halt)
            }
        }
    }

    fn destroy(&self) {
        self.invoker.destroy();
    }
}
