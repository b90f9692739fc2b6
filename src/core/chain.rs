//! Ordered execution of filter stages around one remote invocation.
//!
//! Pre-phases run in ascending priority. A stage may suspend the chain by
//! returning a [`Completion`]; the [`Continuation`] (context plus remaining
//! stages plus the stack of stages whose pre-phase ran) is then moved into a
//! completion task and resumed there. Post-phases pop that stack, so they always
//! run in the reverse order of the pre-phases that actually ran, whichever
//! thread the completion arrives on.
use std::{sync::Arc, time::Duration};

use tokio::runtime::Handle;
use tracing::Instrument;

use crate::{
    core::{
        context::RequestContext,
        filter::{FilterFlow, Stage},
        status::GatewayStatus,
    },
    metrics::increment_rpc_invocation,
    ports::rpc_invoker::{Completion, RpcResult},
};

#[derive(Debug)]
pub struct FilterChain {
    stages: Vec<Stage>,
    invoke_timeout: Option<Duration>,
}

impl FilterChain {
    /// `stages` must already be sorted by priority.
    pub fn new(stages: Vec<Stage>, invoke_timeout: Option<Duration>) -> Self {
        Self {
            stages,
            invoke_timeout,
        }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn filter_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.filter.name()).collect()
    }

    /// Run the chain for one request. Returns once the chain either finished
    /// or suspended on a remote call; the response is always written exactly
    /// once, possibly later from a completion task.
    pub fn process(self: &Arc<Self>, ctx: RequestContext) {
        Continuation::new(self.clone(), ctx).drive();
    }

    /// Destroy every filter, innermost first.
    pub fn destroy(&self) {
        for stage in self.stages.iter().rev() {
            tracing::debug!("Destroying filter {}", stage.filter.name());
            stage.filter.destroy();
        }
    }
}

/// Suspended or running state of one request's trip through the chain.
#[derive(Debug)]
pub struct Continuation {
    chain: Arc<FilterChain>,
    ctx: RequestContext,
    next: usize,
    entered: Vec<usize>,
}

impl Continuation {
    fn new(chain: Arc<FilterChain>, ctx: RequestContext) -> Self {
        let capacity = chain.len();
        Self {
            chain,
            ctx,
            next: 0,
            entered: Vec::with_capacity(capacity),
        }
    }

    /// Run pre-phases until the chain completes, halts or suspends.
    fn drive(mut self) {
        let span = self.ctx.span().clone();
        let _entered = span.enter();
        let chain = self.chain.clone();

        while let Some(stage) = chain.stages.get(self.next) {
            let index = self.next;
            self.next += 1;

            match stage.filter.pre_filter(&mut self.ctx) {
                Ok(FilterFlow::Continue) => self.entered.push(index),
                Ok(FilterFlow::Halt) => {
                    self.entered.push(index);
                    tracing::debug!(
                        filter = stage.filter.name(),
                        status = %self.ctx.status(),
                        "Chain halted"
                    );
                    break;
                }
                Ok(FilterFlow::Suspend(completion)) => {
                    self.entered.push(index);
                    self.suspend(completion);
                    return;
                }
                Err(e) => {
                    tracing::error!(
                        path = %self.ctx.path(),
                        stage = "pre",
                        filter = stage.filter.name(),
                        error = %e,
                        "Filter failed, abandoning chain"
                    );
                    self.ctx.reject(GatewayStatus::InternalError);
                    self.finish();
                    return;
                }
            }
        }

        self.unwind();
    }

    /// Hand the continuation to a completion task.
    fn suspend(mut self, completion: Completion) {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(
                    path = %self.ctx.path(),
                    error = %e,
                    "No runtime available to await the invocation"
                );
                self.ctx.reject(GatewayStatus::InternalError);
                self.unwind();
                return;
            }
        };

        let timeout = self.chain.invoke_timeout;
        let span = self.ctx.span().clone();
        handle.spawn(
            async move {
                let outcome = completion.wait(timeout).await;
                self.resume(outcome);
            }
            .instrument(span),
        );
    }

    /// Attach the invocation outcome and continue where the chain paused.
    fn resume(mut self, outcome: RpcResult) {
        match &outcome {
            Ok(_) => increment_rpc_invocation("success"),
            Err(e) => {
                tracing::warn!(
                    path = %self.ctx.path(),
                    error = %e,
                    "Remote invocation failed"
                );
                increment_rpc_invocation(e.label());
            }
        }
        self.ctx.set_result(outcome);
        self.drive();
    }

    /// Run post-phases innermost first, then write.
    fn unwind(mut self) {
        let chain = self.chain.clone();
        while let Some(index) = self.entered.pop() {
            let filter = &chain.stages[index].filter;
            if let Err(e) = filter.post_filter(&mut self.ctx) {
                tracing::error!(
                    path = %self.ctx.path(),
                    stage = "post",
                    filter = filter.name(),
                    error = %e,
                    "Filter failed, skipping remaining post-phases"
                );
                self.ctx.reject(GatewayStatus::InternalError);
                break;
            }
        }
        self.finish();
    }

    fn finish(mut self) {
        let status = self.ctx.status();
        let span = self.ctx.span();
        span.record("http.status_code", status.code());
        span.record("duration_ms", self.ctx.elapsed().as_millis() as u64);

        if let Err(e) = self.ctx.write_and_flush() {
            tracing::error!(path = %self.ctx.path(), error = %e, "Duplicate response write");
        }
    }
}
