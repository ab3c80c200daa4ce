use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::get,
};
use std::sync::Arc;

use crate::db::entities::tag;
use crate::db::services::{self, NewTag, TagChanges, TagWithCount};
use crate::web::extract::{AppJson, AppPath, AppQuery};
use crate::web::models::tag_models::{TagSearchQuery, TagSuggestionsResponse};
use crate::web::{AppError, AppState};

async fn create_tag_handler(
    State(app_state): State<Arc<AppState>>,
    AppJson(payload): AppJson<NewTag>,
) -> Result<(StatusCode, Json<tag::Model>), AppError> {
    let tag = services::create_tag(&app_state.db_pool, payload).await?;
    Ok((StatusCode::CREATED, Json(tag)))
}

async fn list_tags_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Vec<TagWithCount>>, AppError> {
    let tags = services::list_tags_with_counts(&app_state.db_pool).await?;
    Ok(Json(tags))
}

async fn get_tag_handler(
    State(app_state): State<Arc<AppState>>,
    AppPath(tag_id): AppPath<i32>,
) -> Result<Json<tag::Model>, AppError> {
    let tag = services::get_tag(&app_state.db_pool, tag_id).await?;
    Ok(Json(tag))
}

async fn update_tag_handler(
    State(app_state): State<Arc<AppState>>,
    AppPath(tag_id): AppPath<i32>,
    AppJson(payload): AppJson<TagChanges>,
) -> Result<Json<tag::Model>, AppError> {
    let tag = services::update_tag(&app_state.db_pool, tag_id, payload).await?;
    Ok(Json(tag))
}

async fn delete_tag_handler(
    State(app_state): State<Arc<AppState>>,
    AppPath(tag_id): AppPath<i32>,
) -> Result<StatusCode, AppError> {
    services::delete_tag(&app_state.db_pool, tag_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn search_tags_handler(
    State(app_state): State<Arc<AppState>>,
    AppQuery(query): AppQuery<TagSearchQuery>,
) -> Result<Json<Vec<tag::Model>>, AppError> {
    let tags = services::search_tags(&app_state.db_pool, &query.q).await?;
    Ok(Json(tags))
}

async fn tag_suggestions_handler() -> Json<TagSuggestionsResponse> {
    Json(TagSuggestionsResponse {
        suggestions: services::tag_suggestions(),
    })
}

pub fn create_tags_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_tags_handler).post(create_tag_handler))
        .route("/search", get(search_tags_handler))
        .route("/suggestions", get(tag_suggestions_handler))
        .route(
            "/{tag_id}",
            get(get_tag_handler)
                .put(update_tag_handler)
                .delete(delete_tag_handler),
        )
}
