use axum::{
    Json, Router,
    http::{HeaderValue, Method},
    routing::get,
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::server::config::ServerConfig;
use crate::translator::Translator;
use crate::translator::llm::LanguageModel;
use crate::version::VERSION;
use crate::warehouse::{WarehouseConnector, WarehouseManager};
use crate::web::routes::*;

pub use crate::web::error::AppError;

pub mod error;
pub mod extract;
pub mod models;
pub mod routes;

#[derive(Clone)]
pub struct AppState {
    pub db_pool: DatabaseConnection,
    pub warehouse: WarehouseManager,
    pub translator: Translator,
    pub config: Arc<ServerConfig>,
}

async fn health_check_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "version": VERSION }))
}

fn cors_layer(allow_origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods(vec![
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let allow_origin = allow_origin.trim();
    if allow_origin.is_empty() || allow_origin == "*" {
        return cors.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = allow_origin
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(origin, error = %e, "Ignoring invalid CORS origin.");
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(origins))
}

pub fn create_axum_router(
    db_pool: DatabaseConnection,
    connector: Arc<dyn WarehouseConnector>,
    language_model: Arc<dyn LanguageModel>,
    config: Arc<ServerConfig>,
) -> Router {
    let warehouse = WarehouseManager::new(connector);
    let translator = Translator::new(warehouse.clone(), language_model);
    let cors = cors_layer(&config.cors_allow_origin);

    let app_state = Arc::new(AppState {
        db_pool,
        warehouse,
        translator,
        config,
    });

    Router::new()
        .route("/api/health", get(health_check_handler))
        .nest("/api/warehouse", warehouse_routes::create_warehouse_router())
        .nest("/api/tags", tag_routes::create_tags_router())
        .nest("/api/tagged-items", tagged_item_routes::create_tagged_items_router())
        .merge(query_routes::create_query_router())
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
