//! Request-wide layers shared across the whole router. Per-WS
//! origin enforcement lives in [`crate::extractors`] instead, since it
//! needs `Settings.allowed_origins` at upgrade time rather than at every
//! HTTP request.

use tower_http::cors::{Any, CorsLayer};

pub fn cors_layer() -> CorsLayer {
    CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
}
