//! Per-request id for log correlation and audit records.

use axum::{middleware::Next, response::Response};
use uuid::Uuid;

/// Request id carried in extensions and echoed as `x-request-id`.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

pub async fn request_id_middleware(
    mut request: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    // Honor an inbound id from a trusted proxy; mint one otherwise.
    let id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(RequestId(id.clone()));
    let mut response = next.run(request).await;
    if let Ok(value) = id.parse() {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}
