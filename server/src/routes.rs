use axum::{middleware, routing::get, routing::post, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::accounts;
use crate::auth::middleware::JwtSecret;
use crate::chat::history;
use crate::config::RateLimitConfig;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Wrap the unauthenticated auth routes in a per-IP governor.
/// Uses PeerIpKeyExtractor, which reads ConnectInfo<SocketAddr>.
fn rate_limited(routes: Router<AppState>, limit: &RateLimitConfig) -> Router<AppState> {
    let Some(config) = GovernorConfigBuilder::default()
        .key_extractor(PeerIpKeyExtractor)
        .per_second(limit.replenish_secs.max(1))
        .burst_size(limit.burst_size.max(1))
        .finish()
    else {
        tracing::warn!(?limit, "Invalid rate limit settings, auth routes are not rate limited");
        return routes;
    };
    let config = Arc::new(config);

    // Periodically drop limiter state for idle IPs
    let limiter = config.limiter().clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(60)).await;
            limiter.retain_recent();
        }
    });

    routes.layer(GovernorLayer { config })
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o.trim() == "*") {
        return CorsLayer::permissive();
    }

    let allowed: Vec<_> = origins
        .iter()
        .filter_map(|o| o.trim().parse().ok())
        .collect();
    if allowed.is_empty() {
        tracing::warn!("No valid CORS origins parsed, falling back to permissive CORS");
        return CorsLayer::permissive();
    }

    tracing::info!(origins = ?allowed, "Configured CORS with explicit allowed origins");
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/api/auth/register", post(accounts::register))
        .route("/api/auth/login", post(accounts::login));
    let auth_routes = match &state.rate_limit {
        Some(limit) => rate_limited(auth_routes, limit),
        None => auth_routes,
    };

    // JWT required (Claims extractor validates the token)
    let authenticated_routes = Router::new()
        .route("/api/auth/user", get(accounts::get_user))
        .route("/api/auth/users", get(accounts::list_users))
        .route("/api/auth/messages/{other_id}", get(history::get_history));

    // WebSocket endpoint (auth via query param, not a header)
    let ws_routes = Router::new().route("/ws", get(ws_handler::ws_upgrade));

    let health = Router::new().route("/health", get(health_check));

    Router::new()
        .merge(auth_routes)
        .merge(authenticated_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .layer(cors_layer(&state.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
