use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use std::sync::Arc;

use crate::db::entities::search_history;
use crate::db::services::{self, DEFAULT_HISTORY_LIMIT};
use crate::translator::{NaturalLanguageQuery, QueryAnswer};
use crate::web::extract::{AppJson, AppQuery};
use crate::web::models::query_models::HistoryQuery;
use crate::web::{AppError, AppState};

async fn natural_language_query_handler(
    State(app_state): State<Arc<AppState>>,
    AppJson(payload): AppJson<NaturalLanguageQuery>,
) -> Result<Json<QueryAnswer>, AppError> {
    let answer = app_state.translator.run(&app_state.db_pool, payload).await?;
    Ok(Json(answer))
}

async fn search_history_handler(
    State(app_state): State<Arc<AppState>>,
    AppQuery(query): AppQuery<HistoryQuery>,
) -> Result<Json<Vec<search_history::Model>>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let history = services::recent_searches(&app_state.db_pool, limit).await?;
    Ok(Json(history))
}

pub fn create_query_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/natural-language-query", post(natural_language_query_handler))
        .route("/api/search-history", get(search_history_handler))
}
