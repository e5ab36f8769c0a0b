//! Main application router.

use crate::{
    controllers::{health_controller, jobs_controller, queue_controller},
    middleware::{auth_middleware, AuthState},
    openapi::ApiDoc,
    state::AppState,
};
use axum::{middleware, routing::get, Router};
use beeline_config::ServerConfig;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Creates the main application router.
///
/// Health endpoints and Swagger UI stay open; everything under `/v1`
/// goes through the bearer auth middleware when a token is configured.
pub fn create_router(state: AppState, server_config: &ServerConfig) -> Router {
    let cors = create_cors_layer(server_config);
    let auth_state = AuthState::new(server_config.api_token.clone());

    let api_router = Router::new()
        .merge(queue_controller::router())
        .merge(jobs_controller::router())
        .layer(middleware::from_fn_with_state(auth_state, auth_middleware))
        .with_state(state.clone());

    let router = Router::new()
        // Health endpoints (no auth required)
        .merge(health_controller::router().with_state(state))
        // API v1
        .nest("/v1", api_router)
        // Swagger UI and OpenAPI spec
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Root endpoint
        .route("/", get(root))
        // Middleware layers
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    info!("Router created with REST endpoints and Swagger UI at /swagger-ui");
    router
}

/// Creates a CORS layer based on server configuration.
fn create_cors_layer(server_config: &ServerConfig) -> CorsLayer {
    if server_config.cors_enabled {
        if server_config.cors_origins.contains(&"*".to_string()) {
            CorsLayer::permissive()
        } else {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    }
}

/// Root endpoint handler.
async fn root() -> &'static str {
    "Beeline Job Queue API v1"
}
