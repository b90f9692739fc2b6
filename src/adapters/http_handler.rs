use std::sync::Arc;

use axum::{
    Router,
    body::Body as AxumBody,
    extract::{Request, State},
    middleware,
    response::Response,
    routing::any,
};
use hyper::Response as HyperResponse;
use tower_http::trace::TraceLayer;

use crate::{
    adapters::middleware::request_id_middleware,
    core::{
        GatewayService, GatewayStatus,
        context::{GatewayResponse, RequestContext, ResponseWriter},
    },
    metrics::increment_request_total,
};

/// HTTP boundary of the gateway.
///
/// Rejects paths outside the gateway application before any filter runs,
/// reads the body, builds the request context and waits for the chain to
/// write the response.
pub struct HttpHandler {
    gateway: Arc<GatewayService>,
}

impl HttpHandler {
    pub fn new(gateway: Arc<GatewayService>) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &Arc<GatewayService> {
        &self.gateway
    }

    /// Axum router serving every path through this handler.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/", any(dispatch))
            .route("/{*path}", any(dispatch))
            .with_state(self)
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(request_id_middleware))
    }

    pub async fn handle_request(&self, req: Request) -> HyperResponse<AxumBody> {
        let (parts, body) = req.into_parts();

        if !self.gateway.matches_application(parts.uri.path()) {
            tracing::debug!("No handler for {} {}", parts.method, parts.uri);
            return Self::reject(GatewayStatus::NoHandlerFound);
        }

        let config = self.gateway.config();
        let body = match axum::body::to_bytes(body, config.max_body_bytes).await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(uri = %parts.uri, error = %e, "Failed to read request body");
                return Self::reject(GatewayStatus::IllegalRequest);
            }
        };

        let uri = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string());

        let (writer, response_rx) = ResponseWriter::channel();
        let ctx = RequestContext::builder()
            .application(config.application.as_str())
            .method(parts.method)
            .uri(uri)
            .version(parts.version)
            .headers(&parts.headers)
            .body(body)
            .writer(writer)
            .build();

        let ctx = match ctx {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::warn!(uri = %parts.uri, error = %e, "Rejecting malformed request");
                return Self::reject(GatewayStatus::IllegalRequest);
            }
        };

        self.gateway.dispatch(ctx);

        match response_rx.await {
            Ok(response) => response.into_response(),
            Err(_) => {
                tracing::error!(uri = %parts.uri, "Request finished without a response");
                Self::reject(GatewayStatus::InternalError)
            }
        }
    }

    /// Answer without entering the chain.
    fn reject(status: GatewayStatus) -> HyperResponse<AxumBody> {
        increment_request_total(status.label());
        GatewayResponse::from_status(status).into_response()
    }
}

async fn dispatch(State(handler): State<Arc<HttpHandler>>, req: Request) -> Response {
    handler.handle_request(req).await
}
