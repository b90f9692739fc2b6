//! Per-request state threaded through the filter chain.
//!
//! A [`RequestContext`] is built once from the raw HTTP input, owned by exactly
//! one execution of the chain, and consumed when the response is written. It
//! owns the [`ResponseWriter`] for its connection; the writer is single-use and
//! reports a second write as [`ContextError::AlreadyWritten`].
use std::time::{Duration, Instant};

use axum::body::Body as AxumBody;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Response, StatusCode, Version, header};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::{
    core::{mapping::ServiceMapping, status::GatewayStatus},
    ports::rpc_invoker::{RpcError, RpcResult},
    tracing_setup,
};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Errors raised by context operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ContextError {
    /// The response for this request was already written
    #[error("response already written for {path}")]
    AlreadyWritten { path: String },

    /// The request URI could not be decoded
    #[error("malformed request uri '{uri}': {reason}")]
    MalformedUri { uri: String, reason: String },

    /// The builder was not given a response writer
    #[error("request context requires a response writer")]
    MissingWriter,
}

/// Insertion-ordered multimap of string pairs.
///
/// Lookups are case-insensitive for header maps and exact for parameter maps.
/// Entries can only be appended.
#[derive(Debug, Clone, Default)]
pub struct MultiMap {
    entries: Vec<(String, String)>,
    case_insensitive: bool,
}

impl MultiMap {
    pub fn case_insensitive() -> Self {
        Self {
            entries: Vec::new(),
            case_insensitive: true,
        }
    }

    pub fn case_sensitive() -> Self {
        Self::default()
    }

    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    /// First value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| self.key_eq(k, key))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| self.key_eq(k, key))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| self.key_eq(k, key))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn key_eq(&self, stored: &str, key: &str) -> bool {
        if self.case_insensitive {
            stored.eq_ignore_ascii_case(key)
        } else {
            stored == key
        }
    }
}

impl<K, V> Extend<(K, V)> for MultiMap
where
    K: Into<String>,
    V: Into<String>,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.append(k, v);
        }
    }
}

/// Fully rendered response handed back to the HTTP boundary.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl GatewayResponse {
    pub fn from_status(status: GatewayStatus) -> Self {
        Self::json(status.http_status(), &status.to_body())
    }

    pub fn json(status: StatusCode, value: &serde_json::Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Self {
            status,
            headers,
            body: Bytes::from(value.to_string()),
        }
    }

    pub fn into_response(self) -> Response<AxumBody> {
        let mut response = Response::new(AxumBody::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Single-use handle to the connection that is waiting for this response.
#[derive(Debug)]
pub struct ResponseWriter {
    tx: Option<oneshot::Sender<GatewayResponse>>,
}

impl ResponseWriter {
    /// Create a writer plus the receiver the HTTP boundary awaits.
    pub fn channel() -> (Self, oneshot::Receiver<GatewayResponse>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn is_written(&self) -> bool {
        self.tx.is_none()
    }

    /// Drop the writer without answering. Only for contexts that never started.
    fn discard(mut self) {
        self.tx.take();
    }

    fn send(&mut self, response: GatewayResponse, path: &str) -> Result<(), ContextError> {
        let tx = self.tx.take().ok_or_else(|| ContextError::AlreadyWritten {
            path: path.to_string(),
        })?;
        if tx.send(response).is_err() {
            tracing::warn!(path = %path, "Client went away before the response was written");
        }
        Ok(())
    }
}

impl Drop for ResponseWriter {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            tracing::error!("Response writer dropped without a response, answering with 500");
            let _ = tx.send(GatewayResponse::from_status(GatewayStatus::InternalError));
        }
    }
}

/// Mutable per-request value object.
#[derive(Debug)]
pub struct RequestContext {
    started_at: DateTime<Utc>,
    start: Instant,
    request_id: String,
    uri: String,
    path: String,
    paths: Vec<String>,
    method: Method,
    keep_alive: bool,
    body: Bytes,
    content: String,
    headers: MultiMap,
    parameters: MultiMap,
    service_mapping: Option<ServiceMapping>,
    result: Option<RpcResult>,
    rejection: Option<GatewayStatus>,
    response_headers: HeaderMap,
    span: tracing::Span,
    writer: ResponseWriter,
}

impl RequestContext {
    pub fn builder() -> RequestContextBuilder {
        RequestContextBuilder::default()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Decoded path, including the gateway application segment.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Segments below the gateway application, e.g. `["", "app", "Service", "method"]`.
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body decoded as UTF-8 (lossy).
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn headers(&self) -> &MultiMap {
        &self.headers
    }

    pub fn parameters(&self) -> &MultiMap {
        &self.parameters
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn add_headers<I, K, V>(&mut self, headers: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers.extend(headers);
    }

    pub fn add_parameters<I, K, V>(&mut self, parameters: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.parameters.extend(parameters);
    }

    /// Append the `/`-separated segments of `path`. Existing segments are kept.
    pub fn add_paths(&mut self, path: &str) {
        self.paths.extend(path.split('/').map(str::to_string));
    }

    pub fn service_mapping(&self) -> Option<&ServiceMapping> {
        self.service_mapping.as_ref()
    }

    /// Record the resolved mapping. The first mapping wins; later calls are
    /// ignored with a warning.
    pub fn set_service_mapping(&mut self, mapping: ServiceMapping) {
        if let Some(existing) = &self.service_mapping {
            tracing::warn!(
                path = %self.path,
                existing = %existing.service_name,
                "Service mapping already resolved, keeping the first one"
            );
            return;
        }
        self.service_mapping = Some(mapping);
    }

    pub fn result(&self) -> Option<&RpcResult> {
        self.result.as_ref()
    }

    pub fn set_result(&mut self, result: RpcResult) {
        self.result = Some(result);
    }

    pub fn rejection(&self) -> Option<GatewayStatus> {
        self.rejection
    }

    /// Terminate the request with `status`. A rejection overrides any result.
    pub fn reject(&mut self, status: GatewayStatus) {
        self.rejection = Some(status);
    }

    /// Headers merged into the final response.
    pub fn response_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.response_headers
    }

    pub fn is_written(&self) -> bool {
        self.writer.is_written()
    }

    /// Status the response will carry if written now.
    pub fn status(&self) -> GatewayStatus {
        if let Some(status) = self.rejection {
            return status;
        }
        match &self.result {
            Some(Ok(_)) => GatewayStatus::Success,
            Some(Err(e)) => e.status(),
            None => GatewayStatus::InternalError,
        }
    }

    /// Render and send the response. Must be called exactly once.
    pub fn write_and_flush(&mut self) -> Result<(), ContextError> {
        if self.writer.is_written() {
            return Err(ContextError::AlreadyWritten {
                path: self.path.clone(),
            });
        }

        let mut response = self.render();
        for (name, value) in self.response_headers.iter() {
            response.headers.insert(name.clone(), value.clone());
        }
        if !self.keep_alive {
            response
                .headers
                .insert(header::CONNECTION, HeaderValue::from_static("close"));
        }
        if let Ok(value) = HeaderValue::from_str(&self.request_id) {
            response
                .headers
                .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
        }

        self.writer.send(response, &self.path)
    }

    fn render(&self) -> GatewayResponse {
        if let Some(status) = self.rejection {
            return GatewayResponse::from_status(status);
        }
        match &self.result {
            Some(Ok(value)) => GatewayResponse::json(StatusCode::OK, value),
            Some(Err(e)) => render_rpc_error(e),
            None => {
                tracing::warn!(path = %self.path, "No result produced for request");
                GatewayResponse::from_status(GatewayStatus::InternalError)
            }
        }
    }
}

fn render_rpc_error(error: &RpcError) -> GatewayResponse {
    GatewayResponse::from_status(error.status())
}

/// Deterministic construction of a [`RequestContext`] from raw HTTP input.
#[derive(Debug, Default)]
pub struct RequestContextBuilder {
    application: String,
    method: Method,
    uri: String,
    version: Version,
    headers: Vec<(String, String)>,
    body: Bytes,
    writer: Option<ResponseWriter>,
}

impl RequestContextBuilder {
    /// Gateway application segment stripped from the path before splitting.
    pub fn application(mut self, application: impl Into<String>) -> Self {
        self.application = application.into();
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Origin-form request target, e.g. `/gw/app/Service/method?version=1.0`.
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = uri.into();
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Copy all headers from an `http::HeaderMap`; non-UTF-8 values are skipped.
    pub fn headers(mut self, headers: &HeaderMap) -> Self {
        for (name, value) in headers {
            match value.to_str() {
                Ok(v) => self.headers.push((name.as_str().to_string(), v.to_string())),
                Err(_) => tracing::debug!(header = %name, "Skipping non UTF-8 header value"),
            }
        }
        self
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    pub fn writer(mut self, writer: ResponseWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn build(self) -> Result<RequestContext, ContextError> {
        let writer = self.writer.ok_or(ContextError::MissingWriter)?;

        let (raw_path, query) = match self.uri.split_once('?') {
            Some((path, query)) => (path, query),
            None => (self.uri.as_str(), ""),
        };
        let path = match urlencoding::decode(raw_path) {
            Ok(path) => path.into_owned(),
            Err(e) => {
                // Nothing was dispatched yet; the caller answers directly.
                writer.discard();
                return Err(ContextError::MalformedUri {
                    uri: self.uri.clone(),
                    reason: e.to_string(),
                });
            }
        };

        let mut headers = MultiMap::case_insensitive();
        headers.extend(self.headers);

        let mut parameters = MultiMap::case_sensitive();
        parameters.extend(url::form_urlencoded::parse(query.as_bytes()).into_owned());

        let keep_alive = is_keep_alive(self.version, &headers);
        let request_id = headers
            .get(REQUEST_ID_HEADER)
            .filter(|id| !id.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let span = tracing_setup::create_request_span(self.method.as_str(), &path, &request_id);
        let content = String::from_utf8_lossy(&self.body).into_owned();

        let mut context = RequestContext {
            started_at: Utc::now(),
            start: Instant::now(),
            request_id,
            uri: self.uri,
            path: String::new(),
            paths: Vec::new(),
            method: self.method,
            keep_alive,
            body: self.body,
            content,
            headers,
            parameters,
            service_mapping: None,
            result: None,
            rejection: None,
            response_headers: HeaderMap::new(),
            span,
            writer,
        };

        let relative = strip_application(&path, &self.application).to_string();
        context.add_paths(&relative);
        context.path = path;
        Ok(context)
    }
}

/// Remove a leading `/{application}` segment from `path` when present.
fn strip_application<'a>(path: &'a str, application: &str) -> &'a str {
    if application.is_empty() {
        return path;
    }
    path.strip_prefix('/')
        .and_then(|rest| rest.strip_prefix(application))
        .filter(|rest| rest.is_empty() || rest.starts_with('/'))
        .unwrap_or(path)
}

fn is_keep_alive(version: Version, headers: &MultiMap) -> bool {
    let mut tokens = headers
        .get_all(header::CONNECTION.as_str())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase());

    if version == Version::HTTP_10 || version == Version::HTTP_09 {
        tokens.any(|t| t == "keep-alive")
    } else {
        !tokens.any(|t| t == "close")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn build(uri: &str) -> (RequestContext, oneshot::Receiver<GatewayResponse>) {
        let (writer, rx) = ResponseWriter::channel();
        let context = RequestContext::builder()
            .application("gw")
            .method(Method::POST)
            .uri(uri)
            .header("Content-Type", "application/json")
            .header("X-Trace", "a")
            .header("x-trace", "b")
            .body(Bytes::from_static(br#"{"id":1}"#))
            .writer(writer)
            .build()
            .unwrap();
        (context, rx)
    }

    #[test]
    fn test_paths_are_relative_to_gateway_application() {
        let (context, _rx) = build("/gw/app1/OrderService/getOrder?version=1.0");
        assert_eq!(context.path(), "/gw/app1/OrderService/getOrder");
        assert_eq!(context.paths(), ["", "app1", "OrderService", "getOrder"]);
        assert_eq!(context.parameters().get("version"), Some("1.0"));
        assert_eq!(context.content(), r#"{"id":1}"#);
    }

    #[test]
    fn test_path_and_query_are_decoded() {
        let (context, _rx) = build("/gw/app%201/Svc/m?group=a%20b&tag=x&tag=y");
        assert_eq!(context.paths()[1], "app 1");
        assert_eq!(context.parameters().get("group"), Some("a b"));
        let tags: Vec<_> = context.parameters().get_all("tag").collect();
        assert_eq!(tags, ["x", "y"]);
    }

    #[test]
    fn test_application_prefix_requires_segment_boundary() {
        assert_eq!(strip_application("/gw/a/b/c", "gw"), "/a/b/c");
        assert_eq!(strip_application("/gwx/a/b/c", "gw"), "/gwx/a/b/c");
        assert_eq!(strip_application("/gw", "gw"), "");
    }

    #[test]
    fn test_headers_are_case_insensitive_and_ordered() {
        let (context, _rx) = build("/gw/a/b/c");
        let values: Vec<_> = context.headers().get_all("X-TRACE").collect();
        assert_eq!(values, ["a", "b"]);
        assert_eq!(context.headers().get("content-type"), Some("application/json"));
    }

    #[test]
    fn test_value_outlives_lookup_key() {
        let mut headers = MultiMap::case_insensitive();
        headers.append("X-Tenant", "acme");
        let value = {
            let key = String::from("x-tenant");
            headers.get(&key)
        };
        assert_eq!(value, Some("acme"));
    }

    #[test]
    fn test_parameters_are_case_sensitive() {
        let (context, _rx) = build("/gw/a/b/c?Version=2");
        assert!(context.parameters().get("version").is_none());
        assert_eq!(context.parameters().get("Version"), Some("2"));
    }

    #[test]
    fn test_accumulation_is_additive() {
        let (mut context, _rx) = build("/gw/a/b/c?k=1");
        context.add_parameters([("k", "2")]);
        context.add_headers([("x-trace", "c")]);

        let ks: Vec<_> = context.parameters().get_all("k").collect();
        assert_eq!(ks, ["1", "2"]);
        assert_eq!(context.headers().get_all("x-trace").count(), 3);
        assert_eq!(context.paths().len(), 4);
    }

    #[tokio::test]
    async fn test_write_and_flush_renders_result() {
        let (mut context, rx) = build("/gw/a/b/c");
        context.set_result(Ok(json!({"ok": true})));
        context.write_and_flush().unwrap();

        let response = rx.await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, Bytes::from(r#"{"ok":true}"#));
        assert!(response.headers.contains_key(REQUEST_ID_HEADER));
    }

    #[tokio::test]
    async fn test_second_write_is_detected() {
        let (mut context, rx) = build("/gw/a/b/c");
        context.reject(GatewayStatus::IllegalRequest);
        context.write_and_flush().unwrap();

        let err = context.write_and_flush().unwrap_err();
        assert!(matches!(err, ContextError::AlreadyWritten { .. }));
        assert_eq!(rx.await.unwrap().status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_rejection_overrides_result() {
        let (mut context, rx) = build("/gw/a/b/c");
        context.set_result(Ok(json!(1)));
        context.reject(GatewayStatus::InternalError);
        context.write_and_flush().unwrap();
        assert_eq!(rx.await.unwrap().status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_dropped_context_still_answers() {
        let (context, rx) = build("/gw/a/b/c");
        drop(context);
        assert_eq!(rx.await.unwrap().status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_http10_without_keep_alive_closes_connection() {
        let (writer, rx) = ResponseWriter::channel();
        let mut context = RequestContext::builder()
            .application("gw")
            .uri("/gw/a/b/c")
            .version(Version::HTTP_10)
            .writer(writer)
            .build()
            .unwrap();
        assert!(!context.keep_alive());

        context.set_result(Ok(json!(null)));
        context.write_and_flush().unwrap();
        let response = rx.await.unwrap();
        assert_eq!(response.headers.get(header::CONNECTION).unwrap(), "close");
    }

    #[test]
    fn test_keep_alive_rules() {
        let mut headers = MultiMap::case_insensitive();
        assert!(is_keep_alive(Version::HTTP_11, &headers));
        headers.append("Connection", "Close");
        assert!(!is_keep_alive(Version::HTTP_11, &headers));

        let mut headers = MultiMap::case_insensitive();
        headers.append("connection", "keep-alive");
        assert!(is_keep_alive(Version::HTTP_10, &headers));
    }

    #[test]
    fn test_malformed_path_is_rejected() {
        let (writer, _rx) = ResponseWriter::channel();
        let err = RequestContext::builder()
            .uri("/gw/%FF/Svc/m")
            .writer(writer)
            .build()
            .unwrap_err();
        assert!(matches!(err, ContextError::MalformedUri { .. }));
    }

    #[test]
    fn test_builder_requires_writer() {
        let err = RequestContext::builder().uri("/gw/a").build().unwrap_err();
        assert_eq!(err, ContextError::MissingWriter);
    }
}
