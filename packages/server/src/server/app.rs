//! Application setup and router wiring.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    error_handling::HandleErrorLayer,
    extract::Extension,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        Method,
    },
    middleware,
    routing::{get, post},
    Router,
};
use tower::timeout::TimeoutLayer;
use tower::{BoxError, ServiceBuilder};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::common::ApiError;
use crate::kernel::ServerKernel;
use crate::server::middleware::{auth_middleware, request_id_middleware};
use crate::server::routes::{
    decisions::list_decisions,
    events::post_events,
    exports::{delete_export, get_export, list_exports, post_export},
    health::health_handler,
    items::{get_item, list_items, refresh_url},
    projects::{get_config, list_projects},
    AppState,
};

/// Per-request deadline.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Map errors escaping the timeout middleware into the standard error
/// envelope; an exceeded deadline surfaces as `500 internal_error`.
async fn handle_middleware_error(err: BoxError) -> ApiError {
    if err.is::<tower::timeout::error::Elapsed>() {
        ApiError::Internal(anyhow::anyhow!("request deadline exceeded"))
    } else {
        ApiError::Internal(anyhow::anyhow!("middleware failure: {}", err))
    }
}

/// Build the application router around a kernel.
///
/// Rate limiting is production-only (debug builds share a localhost IP and
/// drive the API from tests): 60/min on the event write route, 600/min on
/// reads, per client IP.
pub fn build_app(kernel: Arc<ServerKernel>) -> Router {
    let state = AppState {
        kernel: kernel.clone(),
    };
    let identity_for_middleware = kernel.identity.clone();

    // Event writes carry their own, tighter ceiling.
    let write_routes = Router::new().route("/projects/:pid/events", post(post_events));
    #[cfg(not(debug_assertions))]
    let write_routes = {
        use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
        let config = std::sync::Arc::new(
            GovernorConfigBuilder::default()
                .per_second(1) // 60 requests per minute
                .burst_size(10)
                .use_headers()
                .finish()
                .expect("Rate limiter configuration is valid and should never fail"),
        );
        write_routes.layer(GovernorLayer { config })
    };

    let read_routes = Router::new()
        .route("/projects", get(list_projects))
        .route("/projects/:pid/config", get(get_config))
        .route("/projects/:pid/items", get(list_items))
        .route("/projects/:pid/items/:iid", get(get_item))
        .route("/projects/:pid/items/:iid/url", get(refresh_url))
        .route("/projects/:pid/decisions", get(list_decisions))
        .route(
            "/projects/:pid/exports",
            post(post_export).get(list_exports),
        )
        .route(
            "/projects/:pid/exports/:eid",
            get(get_export).delete(delete_export),
        );
    #[cfg(not(debug_assertions))]
    let read_routes = {
        use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
        let config = std::sync::Arc::new(
            GovernorConfigBuilder::default()
                .per_second(10) // 600 requests per minute
                .burst_size(60)
                .use_headers()
                .finish()
                .expect("Rate limiter configuration is valid and should never fail"),
        );
        read_routes.layer(GovernorLayer { config })
    };

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    Router::new()
        .nest("/api/v1", write_routes.merge(read_routes))
        .route("/health", get(health_handler))
        // Middleware layers (applied in reverse order - last added runs first)
        .layer(middleware::from_fn(
            move |req: axum::extract::Request, next: middleware::Next| {
                let identity = identity_for_middleware.clone();
                async move { auth_middleware(identity, req, next).await }
            },
        ))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(Extension(state))
        .layer(cors)
        // Timeout errors are not axum-compatible on their own; the
        // HandleErrorLayer turns them into the error envelope.
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_middleware_error))
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT)),
        )
        .layer(TraceLayer::new_for_http())
}
