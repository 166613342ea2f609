//! Bearer-token authentication middleware.
//!
//! Resolves the Authorization header through the identity adapter and adds
//! a `Caller` to request extensions. Requests without a valid token
//! continue without one; handlers that need identity reject with 401.

use std::sync::Arc;

use axum::{middleware::Next, response::Response};
use tracing::debug;

use crate::common::auth::Caller;
use crate::kernel::traits::IdentityProvider;

/// Authentication middleware; identity resolution happens here once per
/// request.
pub async fn auth_middleware(
    identity: Arc<dyn IdentityProvider>,
    mut request: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    if let Some(caller) = extract_caller(bearer_token(&request), &identity).await {
        debug!(caller_id = %caller.id, "authenticated caller");
        request.extensions_mut().insert(caller);
    } else {
        debug!("no valid authentication token");
    }

    next.run(request).await
}

/// Pull the bearer token (or raw token) out of the Authorization header.
///
/// Split out of `extract_caller` so the borrow of `request` ends here,
/// before any `.await` — `Request<Body>` is not `Sync`, so holding a
/// reference to it across an await point would make the middleware's
/// future non-`Send`.
fn bearer_token(request: &axum::http::Request<axum::body::Body>) -> Option<String> {
    let auth_header = request.headers().get("authorization")?;
    let auth_str = auth_header.to_str().ok()?;
    Some(auth_str.strip_prefix("Bearer ").unwrap_or(auth_str).to_string())
}

/// Resolve a caller from an already-extracted bearer token.
async fn extract_caller(
    token: Option<String>,
    identity: &Arc<dyn IdentityProvider>,
) -> Option<Caller> {
    let token = token?;
    identity.authenticate(&token).await.ok().flatten()
}
