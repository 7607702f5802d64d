use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request},
    routing::get,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::constants::{MAX_CONCURRENT_REQUESTS, REQUEST_ID_HEADER, REQUEST_TIMEOUT_SECS};
use crate::handlers::{chat, swipes, system};
use crate::state::AppState;

pub fn create_router(state: AppState, allowed_origins: &[String]) -> Router {
    // Sockets are long-lived, so only the REST routes get the timeout, the
    // in-flight limit and compression.
    let rest = Router::new()
        .route("/like/{uuid}", get(swipes::like))
        .route("/dislike/{uuid}", get(swipes::dislike))
        .route("/liked", get(swipes::liked))
        .route("/disliked", get(swipes::disliked))
        .route("/matches", get(swipes::matches))
        .route("/chats", get(swipes::chats))
        .route("/chat/{uuid}/history", get(swipes::history))
        .layer(
            ServiceBuilder::new()
                .layer(TimeoutLayer::new(Duration::from_secs(REQUEST_TIMEOUT_SECS)))
                .layer(ConcurrencyLimitLayer::new(MAX_CONCURRENT_REQUESTS))
                .layer(CompressionLayer::new()),
        );

    let live = Router::new().route("/chat/{uuid}", get(chat::connect));

    Router::new()
        .route("/ping", get(system::ping))
        .route("/version", get(system::version))
        .nest("/public/v1", rest.merge(live))
        .fallback(system::not_found)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http().make_span_with(request_span))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .layer(create_cors_layer(allowed_origins))
        .with_state(state)
}

fn request_span(request: &Request<Body>) -> tracing::Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-");
    tracing::info_span!(
        "request",
        method = %request.method(),
        uri = %request.uri(),
        request_id
    )
}

fn create_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .allow_credentials(false);

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.trim().parse().ok())
        .collect();

    if origins.is_empty() {
        // Permissive for development
        cors.allow_origin(Any)
    } else {
        cors.allow_origin(origins)
    }
}
