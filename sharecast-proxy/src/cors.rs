//! CORS policy for the public endpoints.
//!
//! Any origin is allowed. Preflight requests are answered by the layer itself and
//! never reach the relay.

use http::{HeaderName, Method};
use tower_http::cors::{Any, CorsLayer};

pub const PREFER_LOW_LATENCY: &str = "x-prefer-low-latency";

/// For `POST` signaling endpoints (`/whip`, `/whep`, `/stop`)
#[must_use]
pub fn signaling_cors() -> CorsLayer {
    cors_for([Method::POST, Method::OPTIONS])
}

/// For read endpoints (`/streams`, `/streams/sse`)
#[must_use]
pub fn read_only_cors() -> CorsLayer {
    cors_for([Method::GET, Method::OPTIONS])
}

/// `/presence` is both read and written
#[must_use]
pub fn presence_cors() -> CorsLayer {
    cors_for([Method::GET, Method::POST, Method::OPTIONS])
}

fn cors_for<const N: usize>(methods: [Method; N]) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(methods)
        .allow_headers([
            http::header::CONTENT_TYPE,
            HeaderName::from_static(PREFER_LOW_LATENCY),
        ])
}
