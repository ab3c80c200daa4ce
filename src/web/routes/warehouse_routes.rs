use axum::{Json, Router, extract::State, routing::post};
use std::sync::Arc;
use tracing::info;

use crate::warehouse::metadata::{self, MetadataRecord, TableConstraint, TableMatch};
use crate::web::extract::AppJson;
use crate::web::models::warehouse_models::{ConnectionTestResponse, WarehouseRequest};
use crate::web::{AppError, AppState};

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str, AppError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Validation(format!("{field} is required")))
}

async fn test_connection_handler(
    State(app_state): State<Arc<AppState>>,
    AppJson(payload): AppJson<WarehouseRequest>,
) -> Result<Json<ConnectionTestResponse>, AppError> {
    let version = app_state
        .warehouse
        .test_connection(&payload.credentials)
        .await?;
    info!(
        account = payload.credentials.account_identifier(),
        %version,
        "Warehouse connection test succeeded."
    );
    Ok(Json(ConnectionTestResponse {
        success: true,
        version,
    }))
}

async fn list_databases_handler(
    State(app_state): State<Arc<AppState>>,
    AppJson(payload): AppJson<WarehouseRequest>,
) -> Result<Json<Vec<MetadataRecord>>, AppError> {
    let mut session = app_state.warehouse.open(&payload.credentials).await?;
    let result = metadata::list_databases(&mut session).await;
    session.close().await;
    Ok(Json(result?))
}

async fn list_schemas_handler(
    State(app_state): State<Arc<AppState>>,
    AppJson(payload): AppJson<WarehouseRequest>,
) -> Result<Json<Vec<MetadataRecord>>, AppError> {
    let database = required(&payload.database, "database")?;
    let mut session = app_state.warehouse.open(&payload.credentials).await?;
    let result = metadata::list_schemas(&mut session, database).await;
    session.close().await;
    Ok(Json(result?))
}

async fn list_tables_handler(
    State(app_state): State<Arc<AppState>>,
    AppJson(payload): AppJson<WarehouseRequest>,
) -> Result<Json<Vec<MetadataRecord>>, AppError> {
    let database = required(&payload.database, "database")?;
    let schema = required(&payload.schema, "schema")?;
    let mut session = app_state.warehouse.open(&payload.credentials).await?;
    let result = metadata::list_tables(&mut session, database, schema).await;
    session.close().await;
    Ok(Json(result?))
}

async fn list_columns_handler(
    State(app_state): State<Arc<AppState>>,
    AppJson(payload): AppJson<WarehouseRequest>,
) -> Result<Json<Vec<MetadataRecord>>, AppError> {
    let database = required(&payload.database, "database")?;
    let schema = required(&payload.schema, "schema")?;
    let table = required(&payload.table, "table")?;
    let mut session = app_state.warehouse.open(&payload.credentials).await?;
    let result = metadata::list_columns(&mut session, database, schema, table).await;
    session.close().await;
    Ok(Json(result?))
}

async fn search_tables_handler(
    State(app_state): State<Arc<AppState>>,
    AppJson(payload): AppJson<WarehouseRequest>,
) -> Result<Json<Vec<TableMatch>>, AppError> {
    let text = required(&payload.query, "query")?;
    let mut session = app_state.warehouse.open(&payload.credentials).await?;
    let result = metadata::search_tables(&mut session, text, payload.search_all_schemas).await;
    session.close().await;
    Ok(Json(result?))
}

async fn list_constraints_handler(
    State(app_state): State<Arc<AppState>>,
    AppJson(payload): AppJson<WarehouseRequest>,
) -> Result<Json<Vec<TableConstraint>>, AppError> {
    let database = required(&payload.database, "database")?;
    let schema = required(&payload.schema, "schema")?;
    let table = required(&payload.table, "table")?;
    let mut session = app_state.warehouse.open(&payload.credentials).await?;
    let result = metadata::list_constraints(&mut session, database, schema, table).await;
    session.close().await;
    Ok(Json(result?))
}

pub fn create_warehouse_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/test-connection", post(test_connection_handler))
        .route("/databases", post(list_databases_handler))
        .route("/schemas", post(list_schemas_handler))
        .route("/tables", post(list_tables_handler))
        .route("/columns", post(list_columns_handler))
        .route("/search-tables", post(search_tables_handler))
        .route("/constraints", post(list_constraints_handler))
}
