//! Axum middleware for caching GET responses and invalidating on writes.
//!
//! ```ignore
//! use axum::{middleware, routing::get, Router};
//! use response_cache::{cache_get_requests, invalidate_on_mutation, ResponseCache};
//!
//! let news = Router::new()
//!     .route("/api/news", get(list_news).post(create_news))
//!     .route("/api/news/{id}", get(get_news).put(update_news).delete(delete_news))
//!     .layer(middleware::from_fn_with_state(cache.clone(), invalidate_on_mutation))
//!     .layer(middleware::from_fn_with_state(cache, cache_get_requests));
//! ```

use crate::cache::{invalidation_prefix, ResponseCache};
use crate::entry::cache_key;
use axum::{
    body::{to_bytes, Body, HttpBody},
    extract::{Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

/// Response header reporting `HIT` or `MISS`.
pub const CACHE_STATUS_HEADER: &str = "x-cache";

/// Largest body the middleware buffers for caching. Larger bodies, and
/// bodies of unknown length, are streamed through uncached.
const MAX_CACHED_BODY: usize = 2 * 1024 * 1024;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

fn with_status(mut response: Response, status: &'static str) -> Response {
    response
        .headers_mut()
        .insert(CACHE_STATUS_HEADER, HeaderValue::from_static(status));
    response
}

fn cached_response(body: String, content_type: &str) -> Response {
    let mut response = Response::new(Body::from(body));
    if let Ok(value) = HeaderValue::from_str(content_type) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    with_status(response, "HIT")
}

/// Serve GET requests from the cache and populate it from `200 OK` responses.
///
/// Other methods and non-200 responses pass through untouched. A response
/// is not cached when an invalidation ran while the handler was producing
/// it. Cache failures are logged and the request is served from the
/// handler.
pub async fn cache_get_requests(
    State(cache): State<ResponseCache>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() != Method::GET {
        return next.run(request).await;
    }

    let key = cache_key(request.uri());
    match cache.get(&key).await {
        Ok(Some(entry)) => return cached_response(entry.body, &entry.content_type),
        Ok(None) => {}
        Err(e) => tracing::warn!(key = %key, error = %e, "Cache lookup failed"),
    }

    let generation = match cache.generation().await {
        Ok(generation) => Some(generation),
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Cache generation unavailable, not caching");
            None
        }
    };

    let response = next.run(request).await;
    if response.status() != StatusCode::OK {
        return response;
    }
    let Some(generation) = generation else {
        return with_status(response, "MISS");
    };
    let fits = response
        .body()
        .size_hint()
        .upper()
        .is_some_and(|len| len <= MAX_CACHED_BODY as u64);
    if !fits {
        tracing::debug!(key = %key, "Response body too large or unsized, not caching");
        return with_status(response, "MISS");
    }

    let (parts, body) = response.into_parts();
    let bytes = match to_bytes(body, MAX_CACHED_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(key = %key, error = %e, "Failed to buffer response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if let Ok(text) = std::str::from_utf8(&bytes) {
        let content_type = parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(DEFAULT_CONTENT_TYPE);
        match cache.put_if_generation(&key, text, content_type, generation).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!(key = %key, "Invalidated while loading, not caching"),
            Err(e) => tracing::warn!(key = %key, error = %e, "Failed to populate cache"),
        }
    }

    with_status(Response::from_parts(parts, Body::from(bytes)), "MISS")
}

/// Invalidate cached entries after a successful POST, PUT, PATCH or DELETE.
///
/// Invalidation completes before the response is returned. If it fails the
/// client gets `500`, since a follow-up read could still see the old body.
pub async fn invalidate_on_mutation(
    State(cache): State<ResponseCache>,
    request: Request,
    next: Next,
) -> Response {
    let Some(prefix) = invalidation_prefix(request.method(), request.uri().path()) else {
        return next.run(request).await;
    };

    let response = next.run(request).await;
    if !response.status().is_success() {
        return response;
    }

    match cache.invalidate_prefix(&prefix).await {
        Ok(removed) => {
            tracing::debug!(prefix = %prefix, removed, "Invalidated cached responses");
            response
        }
        Err(e) => {
            tracing::error!(prefix = %prefix, error = %e, "Cache invalidation failed after mutation");
            (StatusCode::INTERNAL_SERVER_ERROR, "Cache invalidation failed").into_response()
        }
    }
}
