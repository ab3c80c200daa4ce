//! Local relational store for tags, tagged items and query history.

use sea_orm::sea_query::Index;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, Schema};
use tracing::info;

pub mod entities;
pub mod enums;
pub mod services;

use entities::{search_history, tag, tagged_item};

pub async fn connect(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(database_url.to_owned());
    opt.max_connections(10).sqlx_logging(false);
    Database::connect(opt).await
}

/// Creates the catalog tables and their indexes when they do not exist yet.
pub async fn create_tables(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let tables = [
        schema.create_table_from_entity(tag::Entity).if_not_exists().to_owned(),
        schema.create_table_from_entity(tagged_item::Entity).if_not_exists().to_owned(),
        schema.create_table_from_entity(search_history::Entity).if_not_exists().to_owned(),
    ];
    for table in &tables {
        db.execute(backend.build(table)).await?;
    }

    let indexes = [
        Index::create()
            .name("idx_tagged_items_tag_id")
            .table(tagged_item::Entity)
            .col(tagged_item::Column::TagId)
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_tagged_items_object")
            .table(tagged_item::Entity)
            .col(tagged_item::Column::DatabaseName)
            .col(tagged_item::Column::ObjectType)
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_search_history_created_at")
            .table(search_history::Entity)
            .col(search_history::Column::CreatedAt)
            .if_not_exists()
            .to_owned(),
    ];
    for index in &indexes {
        db.execute(backend.build(index)).await?;
    }

    // Absent path parts must collide too, hence the COALESCE key.
    db.execute_unprepared(
        "CREATE UNIQUE INDEX IF NOT EXISTS uq_tagged_items_tag_object ON tagged_items \
         (tag_id, object_type, database_name, COALESCE(schema_name, ''), \
         COALESCE(table_name, ''), COALESCE(column_name, ''))",
    )
    .await?;

    info!("Catalog tables are ready.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::enums::ObjectType;
    use crate::db::services::is_unique_violation;
    use crate::testing::catalog_db;
    use chrono::Utc;
    use sea_orm::{ActiveModelTrait, Set};

    #[tokio::test]
    async fn test_create_tables_is_idempotent() {
        let db = catalog_db().await;
        create_tables(&db).await.unwrap();
    }

    #[tokio::test]
    async fn test_tagged_item_path_is_unique_with_absent_parts() {
        let db = catalog_db().await;
        let now = Utc::now();
        let tag = tag::ActiveModel {
            name: Set("PII".to_string()),
            color: Set("#3498db".to_string()),
            description: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&db)
        .await
        .unwrap();

        let schema_item = || tagged_item::ActiveModel {
            tag_id: Set(tag.id),
            object_type: Set(ObjectType::Schema),
            database_name: Set("SALES".to_string()),
            schema_name: Set(Some("PUBLIC".to_string())),
            table_name: Set(None),
            column_name: Set(None),
            tagged_by: Set(None),
            created_at: Set(now),
            ..Default::default()
        };
        schema_item().insert(&db).await.unwrap();
        let err = schema_item().insert(&db).await.unwrap_err();
        assert!(is_unique_violation(&err));
    }
}
