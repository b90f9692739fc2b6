use std::fmt;

use http::StatusCode;
use serde_json::json;

/// Terminal outcome of a gateway request as seen by the HTTP client.
///
/// Every failure path in the pipeline resolves to one of these values so a
/// response can always be rendered, even when the chain is abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayStatus {
    Success,
    IllegalRequest,
    NoHandlerFound,
    CallServiceError,
    InvokeUnavailable,
    ServerBusy,
    InvokeTimeout,
    InternalError,
}

impl GatewayStatus {
    /// HTTP status used on the wire.
    pub fn http_status(&self) -> StatusCode {
        match self {
            GatewayStatus::Success => StatusCode::OK,
            GatewayStatus::IllegalRequest => StatusCode::BAD_REQUEST,
            GatewayStatus::NoHandlerFound => StatusCode::NOT_FOUND,
            GatewayStatus::CallServiceError | GatewayStatus::InvokeUnavailable => {
                StatusCode::BAD_GATEWAY
            }
            GatewayStatus::ServerBusy => StatusCode::SERVICE_UNAVAILABLE,
            GatewayStatus::InvokeTimeout => StatusCode::GATEWAY_TIMEOUT,
            GatewayStatus::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> u16 {
        self.http_status().as_u16()
    }

    pub fn message(&self) -> &'static str {
        match self {
            GatewayStatus::Success => "Success",
            GatewayStatus::IllegalRequest => "Illegal request",
            GatewayStatus::NoHandlerFound => "No handler found",
            GatewayStatus::CallServiceError => "Call service error",
            GatewayStatus::InvokeUnavailable => "Service invocation unavailable",
            GatewayStatus::ServerBusy => "Server busy, please retry later",
            GatewayStatus::InvokeTimeout => "Service invocation timed out",
            GatewayStatus::InternalError => "Internal server error",
        }
    }

    /// Short label used for metrics and log fields.
    pub fn label(&self) -> &'static str {
        match self {
            GatewayStatus::Success => "success",
            GatewayStatus::IllegalRequest => "illegal_request",
            GatewayStatus::NoHandlerFound => "no_handler_found",
            GatewayStatus::CallServiceError => "call_service_error",
            GatewayStatus::InvokeUnavailable => "invoke_unavailable",
            GatewayStatus::ServerBusy => "server_busy",
            GatewayStatus::InvokeTimeout => "invoke_timeout",
            GatewayStatus::InternalError => "internal_error",
        }
    }

    /// JSON error body: `{"code": .., "message": ..}`.
    pub fn to_body(&self) -> serde_json::Value {
        json!({
            "code": self.code(),
            "message": self.message(),
        })
    }
}

impl fmt::Display for GatewayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}
