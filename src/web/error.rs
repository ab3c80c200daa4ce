use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use crate::db::services::TagStoreError;
use crate::translator::TranslatorError;
use crate::warehouse::WarehouseError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("Translation error: {0}")]
    Translation(String),
    #[error("Unsafe query: {0}")]
    UnsafeQuery(String),
    #[error("Not Found: {0}")]
    NotFound(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

impl AppError {
    /// Stable error kind reported to clients.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Connection(_) => "ConnectionError",
            AppError::Query(_) => "QueryError",
            AppError::Conflict(_) => "ConflictError",
            AppError::Validation(_) => "ValidationError",
            AppError::Translation(_) => "TranslationError",
            AppError::UnsafeQuery(_) => "UnsafeQueryError",
            AppError::NotFound(_) => "NotFound",
            AppError::DatabaseError(_) => "DatabaseError",
            AppError::InternalServerError(_) => "InternalError",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Connection(_) => StatusCode::BAD_GATEWAY,
            AppError::Query(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Translation(_) => StatusCode::BAD_GATEWAY,
            AppError::UnsafeQuery(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::DatabaseError(_) | AppError::InternalServerError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::Connection(msg)
            | AppError::Query(msg)
            | AppError::Conflict(msg)
            | AppError::Validation(msg)
            | AppError::Translation(msg)
            | AppError::UnsafeQuery(msg)
            | AppError::NotFound(msg)
            | AppError::DatabaseError(msg)
            | AppError::InternalServerError(msg) => msg,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(kind = self.kind(), error = %self, "Request failed.");
        }
        let body = serde_json::json!({ "kind": self.kind(), "error": self.message() });
        (status, Json(body)).into_response()
    }
}

impl From<sea_orm::DbErr> for AppError {
    fn from(err: sea_orm::DbErr) -> Self {
        AppError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InternalServerError(format!("JSON serialization/deserialization error: {err}"))
    }
}

impl From<WarehouseError> for AppError {
    fn from(err: WarehouseError) -> Self {
        match err {
            WarehouseError::Connection(msg) => AppError::Connection(msg),
            WarehouseError::Query(msg) => AppError::Query(msg),
            WarehouseError::InvalidCredentials(msg) => AppError::Validation(msg),
        }
    }
}

impl From<TagStoreError> for AppError {
    fn from(err: TagStoreError) -> Self {
        match err {
            TagStoreError::DbErr(e) => e.into(),
            TagStoreError::TagNotFound(_) | TagStoreError::ItemNotFound(_) => {
                AppError::NotFound(err.to_string())
            }
            TagStoreError::DuplicateName(_) | TagStoreError::DuplicateItem(_) => {
                AppError::Conflict(err.to_string())
            }
            TagStoreError::Validation(msg) => AppError::Validation(msg),
        }
    }
}

impl From<TranslatorError> for AppError {
    fn from(err: TranslatorError) -> Self {
        match err {
            TranslatorError::Warehouse(e) => e.into(),
            TranslatorError::Translation(e) => AppError::Translation(e.to_string()),
            TranslatorError::Unsafe(e) => AppError::UnsafeQuery(e.to_string()),
            TranslatorError::Validation(msg) => AppError::Validation(msg),
        }
    }
}
