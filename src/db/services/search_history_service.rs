use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, DbErr, EntityTrait, QueryOrder, QuerySelect, Set};

use crate::db::entities::{prelude::*, search_history};

pub const DEFAULT_HISTORY_LIMIT: u64 = 50;
pub const MAX_HISTORY_LIMIT: u64 = 500;

#[derive(Debug, Clone)]
pub struct NewSearchEntry {
    pub natural_language_query: String,
    pub generated_sql: String,
    pub execution_time: f64,
    pub row_count: i64,
    pub user_identifier: Option<String>,
}

pub async fn record_search(
    db: &DatabaseConnection,
    entry: NewSearchEntry,
) -> Result<search_history::Model, DbErr> {
    search_history::ActiveModel {
        natural_language_query: Set(entry.natural_language_query),
        generated_sql: Set(entry.generated_sql),
        execution_time: Set(entry.execution_time),
        row_count: Set(entry.row_count),
        user_identifier: Set(entry.user_identifier),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
}

/// Newest entries first.
pub async fn recent_searches(
    db: &DatabaseConnection,
    limit: u64,
) -> Result<Vec<search_history::Model>, DbErr> {
    SearchHistory::find()
        .order_by_desc(search_history::Column::CreatedAt)
        .order_by_desc(search_history::Column::Id)
        .limit(limit.clamp(1, MAX_HISTORY_LIMIT))
        .all(db)
        .await
}
