//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{credits, features, health, sweep};
use crate::state::AppState;

// ============================================================================
// Concurrency Limiting Constants
// ============================================================================

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Features (Service API Key auth)
/// - `GET /v1/catalog` - Feature catalog
/// - `GET /v1/guilds/:guild_id/features` - All subscriptions of a guild
/// - `GET /v1/guilds/:guild_id/features/:feature_id` - Subscription status
/// - `GET /v1/guilds/:guild_id/features/:feature_id/active` - Entitlement check
/// - `POST /v1/guilds/:guild_id/features/:feature_id/activate` - Activate
/// - `POST /v1/guilds/:guild_id/features/:feature_id/cancel` - Cancel auto-renewal
/// - `GET /v1/guilds/:guild_id/transactions` - Guild history
///
/// ## Credits
/// - `GET /v1/credits/:user_id/balance` - Balance (Service API Key auth)
/// - `POST /v1/credits/grant` - Grant credits (Admin auth)
///
/// ## Sweeper (Admin auth)
/// - `POST /v1/sweep/run` - Run one sweep tick
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config().cors_origins.clone();
    let max_body_bytes = state.config().max_body_bytes;
    let request_timeout_seconds = state.config().request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let api_routes = Router::new()
        // Catalog
        .route("/catalog", get(features::list_catalog))
        // Guild subscriptions
        .route("/guilds/:guild_id/features", get(features::list_guild_features))
        .route(
            "/guilds/:guild_id/features/:feature_id",
            get(features::get_feature_status),
        )
        .route(
            "/guilds/:guild_id/features/:feature_id/active",
            get(features::is_feature_active),
        )
        .route(
            "/guilds/:guild_id/features/:feature_id/activate",
            post(features::activate_feature),
        )
        .route(
            "/guilds/:guild_id/features/:feature_id/cancel",
            post(features::cancel_feature),
        )
        .route("/guilds/:guild_id/transactions", get(features::list_transactions))
        // Credits
        .route("/credits/:user_id/balance", get(credits::get_balance))
        .route("/credits/grant", post(credits::grant_credits))
        // Sweeper
        .route("/sweep/run", post(sweep::run_sweep))
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        // API v1 routes (rate limited)
        .nest("/v1", api_routes)
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
