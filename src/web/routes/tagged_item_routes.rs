use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{delete, get, post},
};
use std::sync::Arc;

use crate::db::services::{self, BulkTagging, NewTaggedItem, TagRemoval, TaggedItemFilter};
use crate::web::extract::{AppJson, AppPath, AppQuery};
use crate::web::models::tag_models::{
    BulkCreateResponse, ColumnTagsQuery, ColumnTagsResponse, RemoveTagsResponse,
    TaggedItemResponse,
};
use crate::web::{AppError, AppState};

async fn list_tagged_items_handler(
    State(app_state): State<Arc<AppState>>,
    AppQuery(filter): AppQuery<TaggedItemFilter>,
) -> Result<Json<Vec<TaggedItemResponse>>, AppError> {
    let items = services::list_tagged_items(&app_state.db_pool, &filter).await?;
    Ok(Json(items.into_iter().map(Into::into).collect()))
}

async fn create_tagged_item_handler(
    State(app_state): State<Arc<AppState>>,
    AppJson(payload): AppJson<NewTaggedItem>,
) -> Result<(StatusCode, Json<TaggedItemResponse>), AppError> {
    let created = services::create_tagged_item(&app_state.db_pool, payload).await?;
    Ok((StatusCode::CREATED, Json(created.into())))
}

async fn get_tagged_item_handler(
    State(app_state): State<Arc<AppState>>,
    AppPath(item_id): AppPath<i32>,
) -> Result<Json<TaggedItemResponse>, AppError> {
    let item = services::get_tagged_item(&app_state.db_pool, item_id).await?;
    Ok(Json(item.into()))
}

async fn update_tagged_item_handler(
    State(app_state): State<Arc<AppState>>,
    AppPath(item_id): AppPath<i32>,
    AppJson(payload): AppJson<NewTaggedItem>,
) -> Result<Json<TaggedItemResponse>, AppError> {
    let item = services::update_tagged_item(&app_state.db_pool, item_id, payload).await?;
    Ok(Json(item.into()))
}

async fn delete_tagged_item_handler(
    State(app_state): State<Arc<AppState>>,
    AppPath(item_id): AppPath<i32>,
) -> Result<StatusCode, AppError> {
    services::delete_tagged_item(&app_state.db_pool, item_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn bulk_create_handler(
    State(app_state): State<Arc<AppState>>,
    AppJson(payload): AppJson<BulkTagging>,
) -> Result<(StatusCode, Json<BulkCreateResponse>), AppError> {
    let outcomes = services::bulk_create_tagged_items(&app_state.db_pool, payload).await?;
    let response = BulkCreateResponse::from(outcomes);
    let status = if response.created > 0 {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(response)))
}

async fn remove_tags_handler(
    State(app_state): State<Arc<AppState>>,
    AppJson(payload): AppJson<TagRemoval>,
) -> Result<Json<RemoveTagsResponse>, AppError> {
    let count = services::remove_tags(&app_state.db_pool, payload).await?;
    Ok(Json(RemoveTagsResponse {
        message: format!("Successfully deleted {count} tagged items"),
        count,
    }))
}

async fn column_tags_handler(
    State(app_state): State<Arc<AppState>>,
    AppQuery(query): AppQuery<ColumnTagsQuery>,
) -> Result<Json<ColumnTagsResponse>, AppError> {
    let (Some(database), Some(schema), Some(table)) = (
        query.database.as_deref(),
        query.schema.as_deref(),
        query.table.as_deref(),
    ) else {
        return Err(AppError::Validation(
            "database, schema and table are required".to_string(),
        ));
    };
    let column_tags = services::column_tags(&app_state.db_pool, database, schema, table).await?;
    Ok(Json(ColumnTagsResponse { column_tags }))
}

pub fn create_tagged_items_router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/",
            get(list_tagged_items_handler).post(create_tagged_item_handler),
        )
        .route("/bulk-create", post(bulk_create_handler))
        .route("/remove-tags", delete(remove_tags_handler))
        .route("/column-tags", get(column_tags_handler))
        .route(
            "/{item_id}",
            get(get_tagged_item_handler)
                .put(update_tagged_item_handler)
                .delete(delete_tagged_item_handler),
        )
}
