//! Request and response bodies of the HTTP API.

pub mod query_models;
pub mod tag_models;
pub mod warehouse_models;
