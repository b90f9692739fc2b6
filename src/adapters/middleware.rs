//! Axum middleware attached in front of the gateway handler.
use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};

use crate::core::context::REQUEST_ID_HEADER;

/// Make sure every request carries an `x-request-id`, generating a UUID when
/// the client did not send a usable one, and echo it on the response.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let header = HeaderName::from_static(REQUEST_ID_HEADER);

    let incoming = req
        .headers()
        .get(&header)
        .filter(|v| v.to_str().is_ok_and(|s| !s.trim().is_empty()))
        .cloned();
    let request_id = match incoming {
        Some(value) => value,
        None => match HeaderValue::from_str(&uuid::Uuid::new_v4().to_string()) {
            Ok(value) => {
                req.headers_mut().insert(header.clone(), value.clone());
                value
            }
            Err(e) => {
                tracing::warn!("Failed to build request id header: {}", e);
                return next.run(req).await;
            }
        },
    };

    let mut response = next.run(req).await;
    if !response.headers().contains_key(&header) {
        response.headers_mut().insert(header, request_id);
    }
    response
}
