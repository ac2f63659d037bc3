use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::auth::identity;
use crate::chat::history;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Uniform CORS policy; also answers every OPTIONS preflight.
fn cors_layer(frontend_url: &str) -> CorsLayer {
    let origin = match HeaderValue::from_str(frontend_url) {
        Ok(value) => AllowOrigin::exact(value),
        Err(_) => {
            tracing::warn!(frontend_url, "frontend_url is not a valid origin, CORS will allow none");
            AllowOrigin::list(Vec::<HeaderValue>::new())
        }
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-api-key"),
        ])
        .allow_methods([Method::POST, Method::GET, Method::OPTIONS])
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Identity issuance, gated by the privileged secret
    let auth_routes = Router::new().route("/auth", post(identity::issue_identity));

    // Gated by the general API secret
    let api_routes = Router::new()
        .route("/checkJWT", post(identity::check_token))
        .route("/getMessages", get(history::latest_messages));

    // Chat stream (admission via Sec-WebSocket-Protocol, not headers)
    let ws_routes = Router::new().route("/chat", get(ws_handler::chat_upgrade));

    let health = Router::new().route("/health", get(health_check));

    Router::new()
        .merge(auth_routes)
        .merge(api_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(cors_layer(&state.settings.frontend_url))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
