//! Port for the remote procedure invocation layer.
//!
//! The gateway never talks to providers directly. It hands an [`RpcRequest`]
//! to an [`RpcInvoker`] and receives a [`Completion`], a one-shot handle the
//! invoker resolves through the paired [`Promise`] from whichever thread its
//! transport completes on. Dropping the `Completion` cancels interest in the
//! result; invokers can observe that through [`Promise::closed`].
use std::time::Duration;

use bytes::Bytes;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::core::{mapping::ServiceMapping, status::GatewayStatus};

/// Failure carried by an RPC completion.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RpcError {
    /// No completion arrived within the configured bound
    #[error("invocation timed out after {0:?}")]
    Timeout(Duration),

    /// The invoker dropped the promise without completing it
    #[error("invocation was cancelled before completion")]
    Cancelled,

    /// The transport failed before a provider answered
    #[error("transport error: {0}")]
    Transport(String),

    /// The provider answered with a failure
    #[error("remote error (status {status}): {message}")]
    Remote { status: u16, message: String },

    /// The provider answer could not be decoded
    #[error("decode error: {0}")]
    Decode(String),
}

impl RpcError {
    /// Client-facing status for this failure.
    pub fn status(&self) -> GatewayStatus {
        match self {
            RpcError::Timeout(_) => GatewayStatus::InvokeTimeout,
            _ => GatewayStatus::CallServiceError,
        }
    }

    /// Short label used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            RpcError::Timeout(_) => "timeout",
            RpcError::Cancelled => "cancelled",
            RpcError::Transport(_) => "transport",
            RpcError::Remote { .. } => "remote",
            RpcError::Decode(_) => "decode",
        }
    }
}

/// Result delivered through a [`Completion`].
pub type RpcResult = Result<Value, RpcError>;

/// Everything an invoker needs to perform one remote call.
#[derive(Debug, Clone)]
pub struct RpcRequest {
    pub mapping: ServiceMapping,
    pub arguments: Bytes,
    pub attachments: Vec<(String, String)>,
}

impl RpcRequest {
    pub fn new(mapping: ServiceMapping, arguments: Bytes) -> Self {
        Self {
            mapping,
            arguments,
            attachments: Vec::new(),
        }
    }

    pub fn with_attachment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attachments.push((key.into(), value.into()));
        self
    }

    /// JSON envelope describing the call. Arguments are embedded as JSON when
    /// they parse, as a string otherwise, and omitted (null) when empty.
    pub fn to_envelope(&self, metadata: Option<Value>) -> Value {
        let arguments = if self.arguments.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice::<Value>(&self.arguments).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&self.arguments).into_owned())
            })
        };

        let attachments: serde_json::Map<String, Value> = self
            .attachments
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();

        json!({
            "application": self.mapping.application,
            "service": self.mapping.service_name,
            "method": self.mapping.method,
            "group": self.mapping.group,
            "version": self.mapping.version,
            "arguments": arguments,
            "attachments": attachments,
            "metadata": metadata,
        })
    }
}

/// Create a connected promise/completion pair.
pub fn completion_channel() -> (Promise, Completion) {
    let (tx, rx) = oneshot::channel();
    (Promise { tx }, Completion { rx })
}

/// Producer half, owned by the invoker.
#[derive(Debug)]
pub struct Promise {
    tx: oneshot::Sender<RpcResult>,
}

impl Promise {
    /// Resolve the call. Returns `false` when nobody is waiting anymore.
    pub fn complete(self, result: RpcResult) -> bool {
        self.tx.send(result).is_ok()
    }

    /// True once the waiting side dropped its [`Completion`].
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Wait until the waiting side gives up (timeout or shutdown).
    pub async fn closed(&mut self) {
        self.tx.closed().await
    }
}

/// Consumer half, handed to the gateway's invocation bridge.
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<RpcResult>,
}

impl Completion {
    /// A completion that is already resolved.
    pub fn ready(result: RpcResult) -> Self {
        let (promise, completion) = completion_channel();
        promise.complete(result);
        completion
    }

    /// Wait for the result, bounded by `limit` when given.
    pub async fn wait(self, limit: Option<Duration>) -> RpcResult {
        match limit {
            Some(limit) => match tokio::time::timeout(limit, self.rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(RpcError::Cancelled),
                Err(_) => Err(RpcError::Timeout(limit)),
            },
            None => self.rx.await.unwrap_or(Err(RpcError::Cancelled)),
        }
    }
}

/// Remote invocation collaborator.
pub trait RpcInvoker: Send + Sync + 'static {
    /// Issue the call without blocking. `None` means the invoker could not
    /// produce a completion handle at all.
    fn invoke_async(&self, request: RpcRequest) -> Option<Completion>;

    /// Release transport resources. Called once at shutdown.
    fn destroy(&self) {}
}
