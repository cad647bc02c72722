//! HTTP router.
//!
//! Returns a composable `Router` with every route nested under `/api/`.
//! Cross-origin requests are accepted from localhost UIs only.

use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::api::endpoints;
use crate::api::types::ApiContext;

/// Build the API router over a prepared context.
pub fn api_router(ctx: ApiContext) -> Router {
    // NOTE: Path params use `:param` syntax (matchit 0.7 / axum 0.7).
    let routes = Router::new()
        .route("/health", get(endpoints::health::check))
        .route("/documents/process", post(endpoints::documents::process))
        .route("/patients/:id/decrypt", get(endpoints::patients::decrypt))
        .route("/patients/:id/reprocess", post(endpoints::patients::reprocess))
        .route("/feedback", post(endpoints::feedback::submit))
        .route("/feedback/stats", get(endpoints::feedback::stats))
        .route("/prompts/performance", get(endpoints::prompts::performance))
        .route("/prompts/evolve", post(endpoints::prompts::evolve))
        .route("/metrics/improvement-trend", get(endpoints::metrics::trend))
        .route("/metrics/snapshot", post(endpoints::metrics::snapshot))
        .route("/metrics/insights", get(endpoints::metrics::insights))
        .with_state(ctx);

    Router::new().nest("/api", routes).layer(cors_layer())
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _| {
            origin.to_str().map(is_local_origin).unwrap_or(false)
        }))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

fn is_local_origin(origin: &str) -> bool {
    let host = origin
        .strip_prefix("http://")
        .or_else(|| origin.strip_prefix("https://"))
        .unwrap_or("");
    let host = host.split(':').next().unwrap_or("");
    host == "localhost" || host == "127.0.0.1"
}
