//! Data access for the catalog tables.
//!
//! Route handlers call these functions instead of building queries
//! themselves. Every function takes the connection it should run on.

use sea_orm::{DbErr, SqlErr};
use thiserror::Error;

pub mod search_history_service;
pub mod tag_service;
pub mod tagged_item_service;

pub use search_history_service::*;
pub use tag_service::*;
pub use tagged_item_service::*;

#[derive(Error, Debug)]
pub enum TagStoreError {
    #[error("Database error: {0}")]
    DbErr(#[from] DbErr),
    #[error("Tag {0} not found")]
    TagNotFound(i32),
    #[error("Tagged item {0} not found")]
    ItemNotFound(i32),
    #[error("A tag named '{0}' already exists")]
    DuplicateName(String),
    #[error("{0} already carries this tag")]
    DuplicateItem(String),
    #[error("{0}")]
    Validation(String),
}

pub(crate) fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}
