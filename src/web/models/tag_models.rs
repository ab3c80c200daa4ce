use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::db::entities::{tag, tagged_item};
use crate::db::services::{BulkItemOutcome, TaggedItemWithTag};
use crate::web::error::AppError;

#[derive(Debug, Deserialize)]
pub struct TagSearchQuery {
    #[serde(default, alias = "name")]
    pub q: String,
}

#[derive(Debug, Serialize)]
pub struct TagSuggestionsResponse {
    pub suggestions: Vec<&'static str>,
}

#[derive(Debug, Deserialize)]
pub struct ColumnTagsQuery {
    pub database: Option<String>,
    pub schema: Option<String>,
    pub table: Option<String>,
}

/// Tag names keyed by column name.
#[derive(Debug, Serialize)]
pub struct ColumnTagsResponse {
    pub column_tags: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct RemoveTagsResponse {
    pub message: String,
    pub count: u64,
}

#[derive(Debug, Serialize)]
pub struct TagInfo {
    pub id: i32,
    pub name: String,
    pub color: String,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TaggedItemResponse {
    #[serde(flatten)]
    pub item: tagged_item::Model,
    pub tag_name: String,
    pub tag_color: String,
    pub tag_info: TagInfo,
}

impl From<TaggedItemWithTag> for TaggedItemResponse {
    fn from(value: TaggedItemWithTag) -> Self {
        let tag::Model {
            id,
            name,
            color,
            description,
            ..
        } = value.tag;
        Self {
            item: value.item,
            tag_name: name.clone(),
            tag_color: color.clone(),
            tag_info: TagInfo {
                id,
                name,
                color,
                description,
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum BulkItemResult {
    Created {
        index: usize,
        item: TaggedItemResponse,
    },
    Failed {
        index: usize,
        kind: &'static str,
        error: String,
    },
}

#[derive(Debug, Serialize)]
pub struct BulkCreateResponse {
    pub created: usize,
    pub failed: usize,
    pub results: Vec<BulkItemResult>,
}

impl From<Vec<BulkItemOutcome>> for BulkCreateResponse {
    fn from(outcomes: Vec<BulkItemOutcome>) -> Self {
        let results: Vec<BulkItemResult> = outcomes
            .into_iter()
            .map(|outcome| match outcome.result {
                Ok(created) => BulkItemResult::Created {
                    index: outcome.index,
                    item: created.into(),
                },
                Err(e) => {
                    let error = AppError::from(e);
                    BulkItemResult::Failed {
                        index: outcome.index,
                        kind: error.kind(),
                        error: error.message().to_string(),
                    }
                }
            })
            .collect();
        let created = results
            .iter()
            .filter(|r| matches!(r, BulkItemResult::Created { .. }))
            .count();
        Self {
            created,
            failed: results.len() - created,
            results,
        }
    }
}
