use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use sea_orm::sea_query::{Expr, Func, LikeExpr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

use super::{TagStoreError, is_unique_violation};
use crate::db::entities::{prelude::*, tag, tagged_item};

pub const DEFAULT_TAG_COLOR: &str = "#3498db";
pub const MAX_TAG_NAME_LEN: usize = 100;
pub const TAG_SUGGESTIONS: [&str; 5] = ["PII", "Confidential", "Sensitive", "Public", "Internal"];

static COLOR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^#(?:[0-9a-fA-F]{3}|[0-9a-fA-F]{6})$")
        .unwrap_or_else(|e| panic!("invalid color pattern: {e}"))
});

/// A tag together with the number of objects it is applied to.
#[derive(Serialize, Debug)]
pub struct TagWithCount {
    #[serde(flatten)]
    pub tag: tag::Model,
    pub item_count: i64,
}

/// Fields of a tag to create. A missing color falls back to the default.
#[derive(Debug, Deserialize)]
pub struct NewTag {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Partial update; absent fields keep their stored value.
#[derive(Debug, Default, Deserialize)]
pub struct TagChanges {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

fn validate_name(name: &str) -> Result<String, TagStoreError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(TagStoreError::Validation("Tag name must not be empty".to_string()));
    }
    if name.chars().count() > MAX_TAG_NAME_LEN {
        return Err(TagStoreError::Validation(format!(
            "Tag name must be at most {MAX_TAG_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

fn validate_color(color: &str) -> Result<String, TagStoreError> {
    let color = color.trim();
    if COLOR_PATTERN.is_match(color) {
        Ok(color.to_string())
    } else {
        Err(TagStoreError::Validation(format!(
            "Invalid color '{color}', expected a hex value such as {DEFAULT_TAG_COLOR}"
        )))
    }
}

fn clean_description(description: Option<String>) -> Option<String> {
    description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
}

async fn ensure_name_free(
    db: &DatabaseConnection,
    name: &str,
    except_id: Option<i32>,
) -> Result<(), TagStoreError> {
    let mut query = Tag::find().filter(tag::Column::Name.eq(name));
    if let Some(id) = except_id {
        query = query.filter(tag::Column::Id.ne(id));
    }
    match query.one(db).await? {
        Some(_) => Err(TagStoreError::DuplicateName(name.to_string())),
        None => Ok(()),
    }
}

pub async fn create_tag(
    db: &DatabaseConnection,
    request: NewTag,
) -> Result<tag::Model, TagStoreError> {
    let name = validate_name(&request.name)?;
    let color = match request.color.as_deref() {
        Some(color) if !color.trim().is_empty() => validate_color(color)?,
        _ => DEFAULT_TAG_COLOR.to_string(),
    };
    ensure_name_free(db, &name, None).await?;

    let now = Utc::now();
    let new_tag = tag::ActiveModel {
        name: Set(name.clone()),
        color: Set(color),
        description: Set(clean_description(request.description)),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    // The unique index still decides when two creates race.
    let created = new_tag.insert(db).await.map_err(|e| {
        if is_unique_violation(&e) {
            TagStoreError::DuplicateName(name.clone())
        } else {
            e.into()
        }
    })?;
    info!(tag_id = created.id, name = %created.name, "Tag created.");
    Ok(created)
}

/// All tags ordered by name, each with its tagged-item count.
pub async fn list_tags_with_counts(
    db: &DatabaseConnection,
) -> Result<Vec<TagWithCount>, TagStoreError> {
    let tags = Tag::find().order_by_asc(tag::Column::Name).all(db).await?;

    let counts: HashMap<i32, i64> = TaggedItem::find()
        .select_only()
        .column(tagged_item::Column::TagId)
        .column_as(Expr::col(tagged_item::Column::Id).count(), "item_count")
        .group_by(tagged_item::Column::TagId)
        .into_tuple::<(i32, i64)>()
        .all(db)
        .await?
        .into_iter()
        .collect();

    Ok(tags
        .into_iter()
        .map(|tag| {
            let item_count = counts.get(&tag.id).copied().unwrap_or(0);
            TagWithCount { tag, item_count }
        })
        .collect())
}

pub async fn get_tag(db: &DatabaseConnection, tag_id: i32) -> Result<tag::Model, TagStoreError> {
    Tag::find_by_id(tag_id)
        .one(db)
        .await?
        .ok_or(TagStoreError::TagNotFound(tag_id))
}

/// Applies the fields present in `request`; absent fields keep their value.
pub async fn update_tag(
    db: &DatabaseConnection,
    tag_id: i32,
    request: TagChanges,
) -> Result<tag::Model, TagStoreError> {
    let existing = get_tag(db, tag_id).await?;

    let name = match request.name.as_deref() {
        Some(name) => validate_name(name)?,
        None => existing.name.clone(),
    };
    if name != existing.name {
        ensure_name_free(db, &name, Some(tag_id)).await?;
    }
    let color = match request.color.as_deref() {
        Some(color) => validate_color(color)?,
        None => existing.color.clone(),
    };
    let description = match request.description {
        Some(description) => clean_description(Some(description)),
        None => existing.description.clone(),
    };

    let mut active: tag::ActiveModel = existing.into();
    active.name = Set(name.clone());
    active.color = Set(color);
    active.description = Set(description);
    active.updated_at = Set(Utc::now());

    active.update(db).await.map_err(|e| {
        if is_unique_violation(&e) {
            TagStoreError::DuplicateName(name)
        } else {
            e.into()
        }
    })
}

/// Deletes a tag and every tagged item that references it.
pub async fn delete_tag(db: &DatabaseConnection, tag_id: i32) -> Result<u64, TagStoreError> {
    let txn = db.begin().await?;

    let removed_items = TaggedItem::delete_many()
        .filter(tagged_item::Column::TagId.eq(tag_id))
        .exec(&txn)
        .await?
        .rows_affected;
    let deleted = Tag::delete_by_id(tag_id).exec(&txn).await?;
    if deleted.rows_affected == 0 {
        txn.rollback().await?;
        return Err(TagStoreError::TagNotFound(tag_id));
    }

    txn.commit().await?;
    info!(tag_id, removed_items, "Tag deleted.");
    Ok(removed_items)
}

/// Case-insensitive substring match on tag names. An empty query matches all.
pub async fn search_tags(
    db: &DatabaseConnection,
    query: &str,
) -> Result<Vec<tag::Model>, TagStoreError> {
    let needle = query.trim().to_lowercase();
    let mut select = Tag::find();
    if !needle.is_empty() {
        let escaped = needle
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        select = select.filter(
            Expr::expr(Func::lower(Expr::col(tag::Column::Name)))
                .like(LikeExpr::new(format!("%{escaped}%")).escape('\\')),
        );
    }
    Ok(select.order_by_asc(tag::Column::Name).all(db).await?)
}

pub fn tag_suggestions() -> Vec<&'static str> {
    TAG_SUGGESTIONS.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::enums::ObjectType;
    use crate::db::services::{
        NewTaggedItem, ObjectAddress, TaggedItemFilter, create_tagged_item, list_tagged_items,
    };
    use crate::testing::catalog_db;

    fn new_tag(name: &str) -> NewTag {
        NewTag {
            name: name.to_string(),
            color: None,
            description: None,
        }
    }

    fn database_address(name: &str) -> ObjectAddress {
        ObjectAddress {
            object_type: ObjectType::Database,
            database_name: name.to_string(),
            schema_name: None,
            table_name: None,
            column_name: None,
        }
    }

    #[tokio::test]
    async fn test_create_tag_applies_defaults() {
        let db = catalog_db().await;
        let tag = create_tag(&db, new_tag("  PII ")).await.unwrap();
        assert_eq!(tag.name, "PII");
        assert_eq!(tag.color, DEFAULT_TAG_COLOR);
        assert_eq!(tag.description, None);
    }

    #[tokio::test]
    async fn test_duplicate_name_is_rejected_and_existing_unchanged() {
        let db = catalog_db().await;
        let mut first = new_tag("PII");
        first.color = Some("#ff0000".to_string());
        let original = create_tag(&db, first).await.unwrap();

        let mut second = new_tag("PII");
        second.color = Some("#00ff00".to_string());
        let err = create_tag(&db, second).await.unwrap_err();
        assert!(matches!(err, TagStoreError::DuplicateName(ref n) if n == "PII"));

        let stored = get_tag(&db, original.id).await.unwrap();
        assert_eq!(stored.color, "#ff0000");
        assert_eq!(list_tags_with_counts(&db).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_tag_validates_name_and_color() {
        let db = catalog_db().await;
        assert!(matches!(
            create_tag(&db, new_tag("   ")).await,
            Err(TagStoreError::Validation(_))
        ));
        assert!(matches!(
            create_tag(&db, new_tag(&"x".repeat(101))).await,
            Err(TagStoreError::Validation(_))
        ));
        let mut bad_color = new_tag("Finance");
        bad_color.color = Some("blue".to_string());
        assert!(matches!(
            create_tag(&db, bad_color).await,
            Err(TagStoreError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_rename_to_existing_name_conflicts() {
        let db = catalog_db().await;
        create_tag(&db, new_tag("PII")).await.unwrap();
        let other = create_tag(&db, new_tag("Public")).await.unwrap();

        let err = update_tag(
            &db,
            other.id,
            TagChanges {
                name: Some("PII".to_string()),
                color: None,
                description: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TagStoreError::DuplicateName(_)));
        assert_eq!(get_tag(&db, other.id).await.unwrap().name, "Public");
    }

    #[tokio::test]
    async fn test_update_keeps_absent_fields() {
        let db = catalog_db().await;
        let mut request = new_tag("Finance");
        request.description = Some("Money things".to_string());
        let tag = create_tag(&db, request).await.unwrap();

        let updated = update_tag(
            &db,
            tag.id,
            TagChanges {
                name: None,
                color: Some("#abc".to_string()),
                description: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.name, "Finance");
        assert_eq!(updated.color, "#abc");
        assert_eq!(updated.description.as_deref(), Some("Money things"));
        assert!(updated.updated_at >= tag.updated_at);
    }

    #[tokio::test]
    async fn test_update_missing_tag_is_not_found() {
        let db = catalog_db().await;
        let err = update_tag(
            &db,
            42,
            TagChanges {
                name: Some("x".to_string()),
                color: None,
                description: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TagStoreError::TagNotFound(42)));
    }

    #[tokio::test]
    async fn test_delete_tag_removes_its_items() {
        let db = catalog_db().await;
        let pii = create_tag(&db, new_tag("PII")).await.unwrap();
        let public = create_tag(&db, new_tag("Public")).await.unwrap();
        for (tag_id, database) in [(pii.id, "SALES"), (pii.id, "HR"), (public.id, "SALES")] {
            create_tagged_item(
                &db,
                NewTaggedItem {
                    tag_id,
                    address: database_address(database),
                    tagged_by: None,
                },
            )
            .await
            .unwrap();
        }

        let removed = delete_tag(&db, pii.id).await.unwrap();
        assert_eq!(removed, 2);
        assert!(matches!(get_tag(&db, pii.id).await, Err(TagStoreError::TagNotFound(_))));

        let remaining = list_tagged_items(&db, &TaggedItemFilter::default()).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].tag.id, public.id);

        assert!(matches!(
            delete_tag(&db, pii.id).await,
            Err(TagStoreError::TagNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_tags_includes_item_counts() {
        let db = catalog_db().await;
        let pii = create_tag(&db, new_tag("PII")).await.unwrap();
        create_tag(&db, new_tag("Confidential")).await.unwrap();
        create_tagged_item(
            &db,
            NewTaggedItem {
                tag_id: pii.id,
                address: database_address("SALES"),
                tagged_by: Some("alice".to_string()),
            },
        )
        .await
        .unwrap();

        let tags = list_tags_with_counts(&db).await.unwrap();
        let summary: Vec<(&str, i64)> = tags
            .iter()
            .map(|t| (t.tag.name.as_str(), t.item_count))
            .collect();
        assert_eq!(summary, vec![("Confidential", 0), ("PII", 1)]);
    }

    #[tokio::test]
    async fn test_search_is_case_insensitive_substring() {
        let db = catalog_db().await;
        for name in ["Confidential", "PII", "Public", "100%_done"] {
            create_tag(&db, new_tag(name)).await.unwrap();
        }

        let names = |tags: Vec<tag::Model>| tags.into_iter().map(|t| t.name).collect::<Vec<_>>();
        assert_eq!(names(search_tags(&db, "pi").await.unwrap()), vec!["PII"]);
        assert_eq!(names(search_tags(&db, "UBL").await.unwrap()), vec!["Public"]);
        assert_eq!(names(search_tags(&db, "%_").await.unwrap()), vec!["100%_done"]);
        assert_eq!(search_tags(&db, "").await.unwrap().len(), 4);
        assert!(search_tags(&db, "zzz").await.unwrap().is_empty());
    }

    #[test]
    fn test_suggestions_are_fixed() {
        assert_eq!(
            tag_suggestions(),
            vec!["PII", "Confidential", "Sensitive", "Public", "Internal"]
        );
    }
}
