//! Introspection queries against the warehouse catalog.
//!
//! Each listing issues exactly one statement and returns records in the order
//! the warehouse produced them.

use serde::Serialize;
use serde_json::Value;

use super::{QueryResult, ScopedSession, Statement, WarehouseError, quote_identifier, stored_name};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRecord {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_on: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDescription {
    pub name: String,
    pub data_type: Option<String>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableDescription {
    pub name: String,
    pub comment: Option<String>,
    pub columns: Vec<ColumnDescription>,
}

pub async fn list_databases(
    session: &mut ScopedSession,
) -> Result<Vec<MetadataRecord>, WarehouseError> {
    let result = session.execute(&Statement::new("SHOW DATABASES")).await?;
    map_records(&result)
}

pub async fn list_schemas(
    session: &mut ScopedSession,
    database: &str,
) -> Result<Vec<MetadataRecord>, WarehouseError> {
    let sql = format!("SHOW SCHEMAS IN DATABASE {}", quote_identifier(database));
    let result = session.execute(&Statement::new(sql)).await?;
    map_records(&result)
}

pub async fn list_tables(
    session: &mut ScopedSession,
    database: &str,
    schema: &str,
) -> Result<Vec<MetadataRecord>, WarehouseError> {
    let sql = format!(
        "SHOW TABLES IN SCHEMA {}.{}",
        quote_identifier(database),
        quote_identifier(schema)
    );
    let result = session.execute(&Statement::new(sql)).await?;
    map_records(&result)
}

pub async fn list_columns(
    session: &mut ScopedSession,
    database: &str,
    schema: &str,
    table: &str,
) -> Result<Vec<MetadataRecord>, WarehouseError> {
    let sql = format!(
        "SELECT COLUMN_NAME AS NAME, DATA_TYPE, IS_NULLABLE, COMMENT \
         FROM {}.INFORMATION_SCHEMA.COLUMNS \
         WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
         ORDER BY ORDINAL_POSITION",
        quote_identifier(database)
    );
    let statement = Statement::new(sql)
        .bind(stored_name(schema))
        .bind(stored_name(table));
    let result = session.execute(&statement).await?;
    map_records(&result)
}

/// Tables of one schema with their columns, from a single joined query.
pub async fn describe_schema(
    session: &mut ScopedSession,
    database: &str,
    schema: &str,
) -> Result<Vec<TableDescription>, WarehouseError> {
    let db = quote_identifier(database);
    let sql = format!(
        "SELECT t.TABLE_NAME, t.COMMENT AS TABLE_COMMENT, c.COLUMN_NAME, c.DATA_TYPE, \
         c.COMMENT AS COLUMN_COMMENT \
         FROM {db}.INFORMATION_SCHEMA.TABLES t \
         LEFT JOIN {db}.INFORMATION_SCHEMA.COLUMNS c \
         ON t.TABLE_SCHEMA = c.TABLE_SCHEMA AND t.TABLE_NAME = c.TABLE_NAME \
         WHERE t.TABLE_SCHEMA = ? \
         ORDER BY t.TABLE_NAME, c.ORDINAL_POSITION"
    );
    let result = session
        .execute(&Statement::new(sql).bind(stored_name(schema)))
        .await?;
    group_tables(&result)
}

/// A table whose name contains the searched text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMatch {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub database_name: String,
    pub schema_name: String,
    pub comment: Option<String>,
    pub row_count: Option<i64>,
    pub size_bytes: Option<i64>,
    /// 1 for tables in a `PUBLIC` schema, 2 for any other schema.
    pub priority: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableConstraint {
    pub constraint_type: &'static str,
    pub constraint_name: Option<String>,
    pub column_name: String,
    pub key_sequence: Option<i64>,
    /// `DATABASE.SCHEMA.TABLE.COLUMN` a foreign key points at.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub references: Option<String>,
}

const PRIMARY_SCHEMA: &str = "PUBLIC";
const PRIMARY_KEY: &str = "PRIMARY KEY";
const UNIQUE_KEY: &str = "UNIQUE";
const FOREIGN_KEY: &str = "FOREIGN KEY";

/// Tables anywhere in the account whose name contains `text`, ignoring case.
///
/// Tables in `PUBLIC` schemas come first. Unless `all_schemas` is set, other
/// schemas are only reported when no `PUBLIC` table matches.
pub async fn search_tables(
    session: &mut ScopedSession,
    text: &str,
    all_schemas: bool,
) -> Result<Vec<TableMatch>, WarehouseError> {
    let pattern = text.trim().replace('\\', "\\\\").replace('\'', "''");
    let sql = format!("SHOW TABLES LIKE '%{pattern}%' IN ACCOUNT");
    let result = session.execute(&Statement::new(sql)).await?;

    let mut matches = map_table_matches(&result)?;
    if !all_schemas && matches.iter().any(|m| m.priority == 1) {
        matches.retain(|m| m.priority == 1);
    }
    matches.sort_by_key(|m| m.priority);
    Ok(matches)
}

/// Declared primary, unique and foreign keys of one table.
pub async fn list_constraints(
    session: &mut ScopedSession,
    database: &str,
    schema: &str,
    table: &str,
) -> Result<Vec<TableConstraint>, WarehouseError> {
    let target = format!(
        "{}.{}.{}",
        quote_identifier(database),
        quote_identifier(schema),
        quote_identifier(table)
    );
    let mut constraints = Vec::new();
    for (kind, keys) in [
        (PRIMARY_KEY, "PRIMARY KEYS"),
        (UNIQUE_KEY, "UNIQUE KEYS"),
        (FOREIGN_KEY, "IMPORTED KEYS"),
    ] {
        let sql = format!("SHOW {keys} IN TABLE {target}");
        let result = session.execute(&Statement::new(sql)).await?;
        constraints.extend(map_constraints(&result, kind)?);
    }
    Ok(constraints)
}

fn required_column(result: &QueryResult, name: &str) -> Result<usize, WarehouseError> {
    result.column_index(name).ok_or_else(|| {
        WarehouseError::Query(format!("Unexpected result shape: no {name} column"))
    })
}

fn cell<'a>(row: &'a [Value], index: Option<usize>) -> Option<&'a Value> {
    index.and_then(|i| row.get(i))
}

fn map_records(result: &QueryResult) -> Result<Vec<MetadataRecord>, WarehouseError> {
    let name = required_column(result, "name")?;
    let comment = result.column_index("comment");
    let rows = result.column_index("rows");
    let created_on = result
        .column_index("created_on")
        .or_else(|| result.column_index("created"));
    let data_type = result.column_index("data_type");
    let nullable = result.column_index("is_nullable");

    Ok(result
        .rows
        .iter()
        .map(|row| MetadataRecord {
            name: cell(row, Some(name)).and_then(value_as_text).unwrap_or_default(),
            comment: cell(row, comment).and_then(value_as_text),
            row_count: cell(row, rows).and_then(value_as_i64),
            created_on: cell(row, created_on).and_then(value_as_text),
            data_type: cell(row, data_type).and_then(value_as_text),
            nullable: cell(row, nullable).and_then(value_as_text).map(|v| v == "YES"),
        })
        .collect())
}

fn group_tables(result: &QueryResult) -> Result<Vec<TableDescription>, WarehouseError> {
    let table_name = required_column(result, "table_name")?;
    let table_comment = result.column_index("table_comment");
    let column_name = result.column_index("column_name");
    let data_type = result.column_index("data_type");
    let column_comment = result.column_index("column_comment");

    let mut tables: Vec<TableDescription> = Vec::new();
    for row in &result.rows {
        let Some(name) = cell(row, Some(table_name)).and_then(value_as_text) else {
            continue;
        };
        if tables.last().map(|t| t.name != name).unwrap_or(true) {
            tables.push(TableDescription {
                name,
                comment: cell(row, table_comment).and_then(value_as_text),
                columns: Vec::new(),
            });
        }
        // A table without columns still yields one row with a null column.
        if let (Some(table), Some(column)) = (
            tables.last_mut(),
            cell(row, column_name).and_then(value_as_text),
        ) {
            table.columns.push(ColumnDescription {
                name: column,
                data_type: cell(row, data_type).and_then(value_as_text),
                comment: cell(row, column_comment).and_then(value_as_text),
            });
        }
    }
    Ok(tables)
}

fn map_table_matches(result: &QueryResult) -> Result<Vec<TableMatch>, WarehouseError> {
    if result.rows.is_empty() {
        return Ok(Vec::new());
    }
    let name = required_column(result, "name")?;
    let database_name = required_column(result, "database_name")?;
    let schema_name = required_column(result, "schema_name")?;
    let kind = result.column_index("kind");
    let comment = result.column_index("comment");
    let rows = result.column_index("rows");
    let bytes = result.column_index("bytes");

    Ok(result
        .rows
        .iter()
        .map(|row| {
            let schema = cell(row, Some(schema_name)).and_then(value_as_text).unwrap_or_default();
            TableMatch {
                name: cell(row, Some(name)).and_then(value_as_text).unwrap_or_default(),
                kind: cell(row, kind).and_then(value_as_text),
                database_name: cell(row, Some(database_name))
                    .and_then(value_as_text)
                    .unwrap_or_default(),
                priority: if schema.eq_ignore_ascii_case(PRIMARY_SCHEMA) { 1 } else { 2 },
                schema_name: schema,
                comment: cell(row, comment).and_then(value_as_text),
                row_count: cell(row, rows).and_then(value_as_i64),
                size_bytes: cell(row, bytes).and_then(value_as_i64),
            }
        })
        .collect())
}

fn map_constraints(
    result: &QueryResult,
    kind: &'static str,
) -> Result<Vec<TableConstraint>, WarehouseError> {
    if result.rows.is_empty() {
        return Ok(Vec::new());
    }
    let foreign = kind == FOREIGN_KEY;
    let column = required_column(result, if foreign { "fk_column_name" } else { "column_name" })?;
    let name = result.column_index(if foreign { "fk_name" } else { "constraint_name" });
    let sequence = result.column_index("key_sequence");
    let referenced: Vec<Option<usize>> =
        ["pk_database_name", "pk_schema_name", "pk_table_name", "pk_column_name"]
            .iter()
            .map(|c| result.column_index(c))
            .collect();

    Ok(result
        .rows
        .iter()
        .map(|row| TableConstraint {
            constraint_type: kind,
            constraint_name: cell(row, name).and_then(value_as_text),
            column_name: cell(row, Some(column)).and_then(value_as_text).unwrap_or_default(),
            key_sequence: cell(row, sequence).and_then(value_as_i64),
            references: foreign
                .then(|| {
                    referenced
                        .iter()
                        .filter_map(|i| cell(row, *i).and_then(value_as_text))
                        .collect::<Vec<_>>()
                        .join(".")
                })
                .filter(|r| !r.is_empty()),
        })
        .collect())
}

/// Text form of a cell; empty strings and nulls are absent.
pub fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
