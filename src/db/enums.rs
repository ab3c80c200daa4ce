use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Level of a warehouse object in the database > schema > table > column
/// hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "object_type_enum")]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    #[sea_orm(string_value = "database")]
    Database,
    #[sea_orm(string_value = "schema")]
    Schema,
    #[sea_orm(string_value = "table")]
    Table,
    #[sea_orm(string_value = "column")]
    Column,
}

impl ObjectType {
    /// Number of name parts an address at this level carries.
    pub fn depth(self) -> usize {
        match self {
            ObjectType::Database => 1,
            ObjectType::Schema => 2,
            ObjectType::Table => 3,
            ObjectType::Column => 4,
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ObjectType::Database => "database",
            ObjectType::Schema => "schema",
            ObjectType::Table => "table",
            ObjectType::Column => "column",
        })
    }
}
