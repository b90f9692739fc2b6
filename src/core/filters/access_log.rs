use crate::{
    core::{
        context::RequestContext,
        filter::{Filter, FilterError, FilterFlow},
    },
    metrics::{increment_request_total, record_request_duration},
};

/// Logs one line per request and records request metrics. Usually the
/// outermost stage so its post-phase sees the final status.
#[derive(Debug, Default)]
pub struct AccessLogFilter;

impl AccessLogFilter {
    pub const NAME: &'static str = "access_log";

    pub fn new() -> Self {
        Self
    }
}

impl Filter for AccessLogFilter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn pre_filter(&self, ctx: &mut RequestContext) -> Result<FilterFlow, FilterError> {
        tracing::debug!(
            "Received {} {} ({} bytes)",
            ctx.method(),
            ctx.uri(),
            ctx.body().len()
        );
        Ok(FilterFlow::Continue)
    }

    fn post_filter(&self, ctx: &mut RequestContext) -> Result<(), FilterError> {
        let status = ctx.status();
        let elapsed = ctx.elapsed();
        let target = ctx
            .service_mapping()
            .map(ToString::to_string)
            .unwrap_or_else(|| "-".to_string());

        tracing::info!(
            method = %ctx.method(),
            path = %ctx.path(),
            target = %target,
            status = status.code(),
            elapsed_ms = elapsed.as_millis() as u64,
            "{} {} -> {}",
            ctx.method(),
            ctx.path(),
            status
        );

        increment_request_total(status.label());
        record_request_duration(elapsed);
        Ok(())
    }
}
