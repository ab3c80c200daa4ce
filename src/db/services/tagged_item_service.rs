use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::{TagStoreError, is_unique_violation};
use crate::db::entities::{prelude::*, tag, tagged_item};
use crate::db::enums::ObjectType;

/// Identifies one warehouse object by its name path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectAddress {
    pub object_type: ObjectType,
    #[serde(default)]
    pub database_name: String,
    #[serde(default)]
    pub schema_name: Option<String>,
    #[serde(default)]
    pub table_name: Option<String>,
    #[serde(default)]
    pub column_name: Option<String>,
}

fn clean(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl ObjectAddress {
    /// Trims every name, turns empty names into absent ones and checks that
    /// exactly the names required by the object type are present.
    pub fn normalized(self) -> Result<Self, TagStoreError> {
        let address = ObjectAddress {
            object_type: self.object_type,
            database_name: self.database_name.trim().to_string(),
            schema_name: clean(self.schema_name),
            table_name: clean(self.table_name),
            column_name: clean(self.column_name),
        };

        let parts = [
            ("database_name", !address.database_name.is_empty()),
            ("schema_name", address.schema_name.is_some()),
            ("table_name", address.table_name.is_some()),
            ("column_name", address.column_name.is_some()),
        ];
        let depth = address.object_type.depth();
        for (level, (field, present)) in parts.iter().enumerate() {
            if level < depth && !present {
                return Err(TagStoreError::Validation(format!(
                    "{field} is required for a {} tag",
                    address.object_type
                )));
            }
            if level >= depth && *present {
                return Err(TagStoreError::Validation(format!(
                    "{field} must be empty for a {} tag",
                    address.object_type
                )));
            }
        }
        Ok(address)
    }

    /// Dotted name, e.g. `SALES.PUBLIC.ORDERS`.
    pub fn path(&self) -> String {
        [
            Some(self.database_name.as_str()),
            self.schema_name.as_deref(),
            self.table_name.as_deref(),
            self.column_name.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(".")
    }
}

/// Exact-match filters; absent or empty fields do not restrict the result.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaggedItemFilter {
    pub tag_id: Option<i32>,
    pub object_type: Option<ObjectType>,
    pub database_name: Option<String>,
    pub schema_name: Option<String>,
    pub table_name: Option<String>,
    pub column_name: Option<String>,
}

impl TaggedItemFilter {
    fn condition(&self) -> Condition {
        let mut condition = Condition::all();
        if let Some(tag_id) = self.tag_id {
            condition = condition.add(tagged_item::Column::TagId.eq(tag_id));
        }
        if let Some(object_type) = self.object_type {
            condition = condition.add(tagged_item::Column::ObjectType.eq(object_type));
        }
        for (column, value) in [
            (tagged_item::Column::DatabaseName, &self.database_name),
            (tagged_item::Column::SchemaName, &self.schema_name),
            (tagged_item::Column::TableName, &self.table_name),
            (tagged_item::Column::ColumnName, &self.column_name),
        ] {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                condition = condition.add(column.eq(value));
            }
        }
        condition
    }
}

/// One tag applied to one object. Also the body of a full replace.
#[derive(Debug, Deserialize)]
pub struct NewTaggedItem {
    pub tag_id: i32,
    #[serde(flatten)]
    pub address: ObjectAddress,
    #[serde(default)]
    pub tagged_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BulkTagging {
    pub tag_id: i32,
    /// Object addresses, validated one by one.
    #[serde(default)]
    pub items: Vec<Value>,
    #[serde(default)]
    pub tagged_by: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TagRemoval {
    #[serde(default)]
    pub object_type: Option<ObjectType>,
    #[serde(default)]
    pub database_name: Option<String>,
    #[serde(default)]
    pub schema_name: Option<String>,
    #[serde(default)]
    pub table_name: Option<String>,
    #[serde(default)]
    pub column_name: Option<String>,
    #[serde(default)]
    pub tag_ids: Option<Vec<i32>>,
}

#[derive(Debug, Clone)]
pub struct TaggedItemWithTag {
    pub item: tagged_item::Model,
    pub tag: tag::Model,
}

/// Outcome of one entry of a bulk create, keyed by its position in the request.
#[derive(Debug)]
pub struct BulkItemOutcome {
    pub index: usize,
    pub result: Result<TaggedItemWithTag, TagStoreError>,
}

async fn find_tag(db: &DatabaseConnection, tag_id: i32) -> Result<tag::Model, TagStoreError> {
    Tag::find_by_id(tag_id)
        .one(db)
        .await?
        .ok_or(TagStoreError::TagNotFound(tag_id))
}

/// The unique index over tag and object path rejects repeats, also when
/// two requests race.
fn duplicate_or(err: DbErr, address: &ObjectAddress) -> TagStoreError {
    if is_unique_violation(&err) {
        TagStoreError::DuplicateItem(address.path())
    } else {
        err.into()
    }
}

async fn insert_item(
    db: &DatabaseConnection,
    tag: &tag::Model,
    address: ObjectAddress,
    tagged_by: Option<String>,
) -> Result<TaggedItemWithTag, TagStoreError> {
    let address = address.normalized()?;
    let item = tagged_item::ActiveModel {
        tag_id: Set(tag.id),
        object_type: Set(address.object_type),
        database_name: Set(address.database_name.clone()),
        schema_name: Set(address.schema_name.clone()),
        table_name: Set(address.table_name.clone()),
        column_name: Set(address.column_name.clone()),
        tagged_by: Set(clean(tagged_by)),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(|e| duplicate_or(e, &address))?;

    Ok(TaggedItemWithTag {
        item,
        tag: tag.clone(),
    })
}

pub async fn create_tagged_item(
    db: &DatabaseConnection,
    request: NewTaggedItem,
) -> Result<TaggedItemWithTag, TagStoreError> {
    let tag = find_tag(db, request.tag_id).await?;
    let created = insert_item(db, &tag, request.address, request.tagged_by).await?;
    info!(
        item_id = created.item.id,
        tag_id = tag.id,
        object_type = %created.item.object_type,
        "Tag applied."
    );
    Ok(created)
}

pub async fn get_tagged_item(
    db: &DatabaseConnection,
    item_id: i32,
) -> Result<TaggedItemWithTag, TagStoreError> {
    match TaggedItem::find_by_id(item_id)
        .find_also_related(Tag)
        .one(db)
        .await?
    {
        Some((item, Some(tag))) => Ok(TaggedItemWithTag { item, tag }),
        _ => Err(TagStoreError::ItemNotFound(item_id)),
    }
}

/// Replaces the tag and object of an existing item.
pub async fn update_tagged_item(
    db: &DatabaseConnection,
    item_id: i32,
    request: NewTaggedItem,
) -> Result<TaggedItemWithTag, TagStoreError> {
    let existing = TaggedItem::find_by_id(item_id)
        .one(db)
        .await?
        .ok_or(TagStoreError::ItemNotFound(item_id))?;
    let tag = find_tag(db, request.tag_id).await?;
    let address = request.address.normalized()?;

    let mut active: tagged_item::ActiveModel = existing.into();
    active.tag_id = Set(tag.id);
    active.object_type = Set(address.object_type);
    active.database_name = Set(address.database_name.clone());
    active.schema_name = Set(address.schema_name.clone());
    active.table_name = Set(address.table_name.clone());
    active.column_name = Set(address.column_name.clone());
    active.tagged_by = Set(clean(request.tagged_by));
    let item = active
        .update(db)
        .await
        .map_err(|e| duplicate_or(e, &address))?;

    Ok(TaggedItemWithTag { item, tag })
}

pub async fn delete_tagged_item(db: &DatabaseConnection, item_id: i32) -> Result<(), TagStoreError> {
    let result = TaggedItem::delete_by_id(item_id).exec(db).await?;
    if result.rows_affected == 0 {
        return Err(TagStoreError::ItemNotFound(item_id));
    }
    Ok(())
}

pub async fn list_tagged_items(
    db: &DatabaseConnection,
    filter: &TaggedItemFilter,
) -> Result<Vec<TaggedItemWithTag>, TagStoreError> {
    let rows = TaggedItem::find()
        .find_also_related(Tag)
        .filter(filter.condition())
        .order_by_asc(tagged_item::Column::Id)
        .all(db)
        .await?;
    Ok(rows
        .into_iter()
        .filter_map(|(item, tag)| tag.map(|tag| TaggedItemWithTag { item, tag }))
        .collect())
}

/// Tag names of every tagged column of one table, keyed by column name.
pub async fn column_tags(
    db: &DatabaseConnection,
    database: &str,
    schema: &str,
    table: &str,
) -> Result<BTreeMap<String, Vec<String>>, TagStoreError> {
    let rows = TaggedItem::find()
        .find_also_related(Tag)
        .filter(tagged_item::Column::ObjectType.eq(ObjectType::Column))
        .filter(tagged_item::Column::DatabaseName.eq(database.trim()))
        .filter(tagged_item::Column::SchemaName.eq(schema.trim()))
        .filter(tagged_item::Column::TableName.eq(table.trim()))
        .order_by_asc(tagged_item::Column::Id)
        .all(db)
        .await?;

    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (item, tag) in rows {
        if let (Some(column), Some(tag)) = (item.column_name, tag) {
            grouped.entry(column).or_default().push(tag.name);
        }
    }
    Ok(grouped)
}

/// Applies one tag to many objects. Each entry succeeds or fails on its own;
/// an unknown tag fails the whole call.
pub async fn bulk_create_tagged_items(
    db: &DatabaseConnection,
    request: BulkTagging,
) -> Result<Vec<BulkItemOutcome>, TagStoreError> {
    let tag = find_tag(db, request.tag_id).await?;

    let mut outcomes = Vec::with_capacity(request.items.len());
    for (index, raw) in request.items.into_iter().enumerate() {
        let result = match serde_json::from_value::<ObjectAddress>(raw) {
            Ok(address) => insert_item(db, &tag, address, request.tagged_by.clone()).await,
            Err(e) => Err(TagStoreError::Validation(format!("Invalid object address: {e}"))),
        };
        if let Err(e) = &result {
            debug!(index, error = %e, "Bulk tag entry rejected.");
        }
        outcomes.push(BulkItemOutcome { index, result });
    }

    let created = outcomes.iter().filter(|o| o.result.is_ok()).count();
    info!(
        tag_id = tag.id,
        created,
        failed = outcomes.len() - created,
        "Bulk tagging finished."
    );
    Ok(outcomes)
}

/// Deletes every item under the given object prefix, optionally only for
/// the listed tags. Returns the number of deleted items.
pub async fn remove_tags(
    db: &DatabaseConnection,
    request: TagRemoval,
) -> Result<u64, TagStoreError> {
    let database_name = clean(request.database_name);
    let (Some(object_type), Some(database_name)) = (request.object_type, database_name) else {
        return Err(TagStoreError::Validation(
            "object_type and database_name are required".to_string(),
        ));
    };

    let filter = TaggedItemFilter {
        tag_id: None,
        object_type: Some(object_type),
        database_name: Some(database_name),
        schema_name: clean(request.schema_name),
        table_name: clean(request.table_name),
        column_name: clean(request.column_name),
    };
    let mut condition = filter.condition();
    if let Some(tag_ids) = request.tag_ids.filter(|ids| !ids.is_empty()) {
        condition = condition.add(tagged_item::Column::TagId.is_in(tag_ids));
    }

    let result = TaggedItem::delete_many().filter(condition).exec(db).await?;
    info!(count = result.rows_affected, "Tags removed.");
    Ok(result.rows_affected)
}
