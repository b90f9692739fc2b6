//! Shared fixtures for the pipeline integration tests.
#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex, mpsc},
    time::Duration,
};

use axum::{Router, body::Body, http::Request, response::Response};
use rpcgate::{
    GatewayService, HttpHandler,
    config::GatewayConfig,
    core::{
        Filter, FilterFlow, FilterRegistry, GatewayStatus, RequestContext, filter::FilterError,
    },
    ports::rpc_invoker::{Completion, Promise, RpcError, RpcInvoker, RpcRequest, completion_channel},
};
use serde_json::{Value, json};
use tower::ServiceExt;

pub type Log = Arc<Mutex<Vec<String>>>;

/// Answers according to the called method name:
/// `fail` is a remote failure, `unavailable` yields no handle, `hang` never
/// completes and `thread` completes from a plain OS thread. Anything else
/// echoes the call envelope.
#[derive(Default)]
pub struct ScriptedInvoker {
    pub calls: Mutex<Vec<RpcRequest>>,
    pending: Mutex<Vec<Promise>>,
}

impl ScriptedInvoker {
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last_call(&self) -> Option<RpcRequest> {
        self.calls.lock().unwrap().last().cloned()
    }
}

impl RpcInvoker for ScriptedInvoker {
    fn invoke_async(&self, request: RpcRequest) -> Option<Completion> {
        self.calls.lock().unwrap().push(request.clone());
        match request.mapping.method.as_str() {
            "unavailable" => None,
            "fail" => Some(Completion::ready(Err(RpcError::Remote {
                status: 500,
                message: "provider exploded".into(),
            }))),
            "hang" => {
                let (promise, completion) = completion_channel();
                self.pending.lock().unwrap().push(promise);
                Some(completion)
            }
            "thread" => {
                let (promise, completion) = completion_channel();
                let envelope = request.to_envelope(None);
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_millis(20));
                    promise.complete(Ok(envelope));
                });
                Some(completion)
            }
            _ => Some(Completion::ready(Ok(request.to_envelope(None)))),
        }
    }
}

/// Logs its pre and post phases into a shared log.
pub struct Recorder {
    pub name: String,
    pub log: Log,
}

impl Filter for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn pre_filter(&self, _ctx: &mut RequestContext) -> Result<FilterFlow, FilterError> {
        self.log.lock().unwrap().push(format!("pre:{}", self.name));
        Ok(FilterFlow::Continue)
    }

    fn post_filter(&self, _ctx: &mut RequestContext) -> Result<(), FilterError> {
        self.log.lock().unwrap().push(format!("post:{}", self.name));
        Ok(())
    }
}

/// Blocks its worker until released, then answers directly.
pub struct Gate {
    pub entered: Mutex<mpsc::Sender<()>>,
    pub release: Mutex<mpsc::Receiver<()>>,
}

impl Filter for Gate {
    fn name(&self) -> &str {
        "gate"
    }

    fn pre_filter(&self, ctx: &mut RequestContext) -> Result<FilterFlow, FilterError> {
        let _ = self.entered.lock().unwrap().send(());
        let _ = self
            .release
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(5));
        ctx.set_result(Ok(json!({"gate": "open"})));
        Ok(FilterFlow::Continue)
    }
}

/// Rejects every request with the given status.
pub struct Reject(pub GatewayStatus);

impl Filter for Reject {
    fn name(&self) -> &str {
        "reject"
    }

    fn pre_filter(&self, ctx: &mut RequestContext) -> Result<FilterFlow, FilterError> {
        ctx.reject(self.0);
        Ok(FilterFlow::Halt)
    }
}

/// Panics in its pre-phase.
pub struct Explode;

impl Filter for Explode {
    fn name(&self) -> &str {
        "explode"
    }

    fn pre_filter(&self, _ctx: &mut RequestContext) -> Result<FilterFlow, FilterError> {
        panic!("filter exploded");
    }
}

pub fn gateway(
    config: GatewayConfig,
    registry: FilterRegistry,
    invoker: Arc<ScriptedInvoker>,
) -> Arc<GatewayService> {
    Arc::new(
        GatewayService::builder(Arc::new(config))
            .filters(registry)
            .invoker(invoker)
            .build()
            .unwrap(),
    )
}

pub fn router(gateway: Arc<GatewayService>) -> Router {
    Arc::new(HttpHandler::new(gateway)).router()
}

pub fn post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn send(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
