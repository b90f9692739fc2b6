//! RPC invoker that forwards calls as JSON envelopes over HTTP.
//!
//! Each call is POSTed to `{endpoint}/{service}/{method}` on a task of the
//! current runtime. The result travels back through the call's
//! [`Promise`](crate::ports::rpc_invoker::Promise); when the gateway stops
//! waiting (timeout) the in-flight request is dropped.
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use bytes::Bytes;
use eyre::Result;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, header};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::Instrument;

use crate::{
    core::metadata::MetadataIdentifier,
    ports::{
        metadata_collector::MetadataCollector,
        rpc_invoker::{
            Completion, Promise, RpcError, RpcInvoker, RpcRequest, RpcResult,
            completion_channel,
        },
    },
};

type RpcHttpClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

pub struct HttpRpcInvoker {
    client: RpcHttpClient,
    endpoint: String,
    metadata: Option<Arc<dyn MetadataCollector>>,
    destroyed: AtomicBool,
}

impl HttpRpcInvoker {
    /// Create an invoker targeting `endpoint` (e.g. `http://127.0.0.1:9090`).
    pub fn new(endpoint: &str) -> Result<Self> {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();
        for cert in native_certs.certs {
            if root_cert_store.add(cert).is_err() {
                tracing::warn!("Failed to add native certificate to rustls RootCertStore");
            }
        }
        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, Full<Bytes>>(https_connector);

        tracing::info!("RPC invoker targeting {}", endpoint);
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            metadata: None,
            destroyed: AtomicBool::new(false),
        })
    }

    /// Attach provider metadata from `collector` to every call.
    pub fn with_metadata(mut self, collector: Arc<dyn MetadataCollector>) -> Self {
        self.metadata = Some(collector);
        self
    }

    fn call_url(&self, request: &RpcRequest) -> String {
        format!(
            "{}/{}/{}",
            self.endpoint,
            urlencoding::encode(&request.mapping.service_name),
            urlencoding::encode(&request.mapping.method)
        )
    }
}

impl RpcInvoker for HttpRpcInvoker {
    fn invoke_async(&self, request: RpcRequest) -> Option<Completion> {
        if self.destroyed.load(Ordering::Acquire) {
            tracing::warn!("Invoker already destroyed, refusing {}", request.mapping);
            return None;
        }
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!("No runtime to issue {} on: {}", request.mapping, e);
                return None;
            }
        };

        let (promise, completion) = completion_channel();
        let call = Call {
            client: self.client.clone(),
            url: self.call_url(&request),
            metadata: self.metadata.clone(),
            request,
        };
        handle.spawn(call.run(promise).in_current_span());
        Some(completion)
    }

    fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::AcqRel) {
            tracing::info!("RPC invoker for {} destroyed", self.endpoint);
        }
    }
}

/// One outgoing call, owned by its task.
struct Call {
    client: RpcHttpClient,
    url: String,
    metadata: Option<Arc<dyn MetadataCollector>>,
    request: RpcRequest,
}

impl Call {
    async fn run(self, mut promise: Promise) {
        let mapping = self.request.mapping.to_string();
        let result = tokio::select! {
            result = self.send() => result,
            _ = promise.closed() => {
                tracing::debug!("Caller stopped waiting for {}", mapping);
                return;
            }
        };

        if let Err(e) = &result {
            tracing::debug!("Call to {} failed: {}", mapping, e);
        }
        promise.complete(result);
    }

    async fn send(&self) -> RpcResult {
        let metadata = self.provider_metadata().await;
        let envelope = self.request.to_envelope(metadata);
        let body = serde_json::to_vec(&envelope).map_err(|e| RpcError::Decode(e.to_string()))?;

        let request = Request::builder()
            .method(Method::POST)
            .uri(&self.url)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "application/json")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?
            .to_bytes();

        if !status.is_success() {
            return Err(RpcError::Remote {
                status: status.as_u16(),
                message: String::from_utf8_lossy(&bytes).trim().to_string(),
            });
        }
        Ok(decode_body(&bytes))
    }

    async fn provider_metadata(&self) -> Option<Value> {
        let collector = self.metadata.as_ref()?;
        let mapping = &self.request.mapping;
        let id = MetadataIdentifier::provider(
            mapping.service_name.clone(),
            mapping.version.clone(),
            mapping.group.clone(),
            mapping.application.clone(),
        );
        let raw = collector.provider_metadata(&id).await?;
        Some(decode_body(&raw))
    }
}

/// Empty bodies are `null`, non-JSON bodies are passed through as text.
fn decode_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}
