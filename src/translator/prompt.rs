//! Prompt text for SQL generation.

use serde::Serialize;
use tera::{Context, Tera};

use super::llm::TranslationError;
use crate::warehouse::metadata::TableDescription;

pub const SYSTEM_PROMPT: &str =
    "You are a SQL expert that converts natural language to SQL queries.";

const SCHEMA_TEMPLATE: &str = "Database Schema:
{% for table in tables %}
Table: {{ table.name }}
Description: {{ table.description }}
Columns:
{% for column in table.columns -%}
- {{ column.name }} ({{ column.data_type }}): {{ column.description }}
{% endfor -%}
{% endfor %}";

const USER_TEMPLATE: &str = "
Schema information:
{{ schema }}

Convert this natural language query to correct Snowflake SQL using only the tables and columns above, without backticks and markdown formatting:
\"{{ question }}\"

SQL query:
";

#[derive(Serialize)]
struct TableContext<'a> {
    name: &'a str,
    description: &'a str,
    columns: Vec<ColumnContext<'a>>,
}

#[derive(Serialize)]
struct ColumnContext<'a> {
    name: &'a str,
    data_type: &'a str,
    description: &'a str,
}

fn render(template: &str, context: &Context) -> Result<String, TranslationError> {
    Tera::one_off(template, context, false).map_err(|e| TranslationError::Prompt(e.to_string()))
}

/// Describes every table and column of a schema for the model.
pub fn render_schema_context(tables: &[TableDescription]) -> Result<String, TranslationError> {
    let tables: Vec<TableContext<'_>> = tables
        .iter()
        .map(|table| TableContext {
            name: &table.name,
            description: table.comment.as_deref().unwrap_or("No description"),
            columns: table
                .columns
                .iter()
                .map(|column| ColumnContext {
                    name: &column.name,
                    data_type: column.data_type.as_deref().unwrap_or("unknown"),
                    description: column.comment.as_deref().unwrap_or("No description"),
                })
                .collect(),
        })
        .collect();

    let mut context = Context::new();
    context.insert("tables", &tables);
    render(SCHEMA_TEMPLATE, &context)
}

pub fn render_user_prompt(schema: &str, question: &str) -> Result<String, TranslationError> {
    let mut context = Context::new();
    context.insert("schema", schema);
    context.insert("question", question);
    render(USER_TEMPLATE, &context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::metadata::ColumnDescription;

    fn customers() -> TableDescription {
        TableDescription {
            name: "CUSTOMERS".to_string(),
            comment: None,
            columns: vec![
                ColumnDescription {
                    name: "ID".to_string(),
                    data_type: Some("NUMBER".to_string()),
                    comment: Some("Primary key".to_string()),
                },
                ColumnDescription {
                    name: "SALARY".to_string(),
                    data_type: None,
                    comment: None,
                },
            ],
        }
    }

    #[test]
    fn test_schema_context_lists_tables_and_columns() {
        let rendered = render_schema_context(&[customers()]).unwrap();
        assert!(rendered.starts_with("Database Schema:"));
        assert!(rendered.contains("Table: CUSTOMERS\nDescription: No description\nColumns:\n"));
        assert!(rendered.contains("- ID (NUMBER): Primary key\n"));
        assert!(rendered.contains("- SALARY (unknown): No description\n"));
    }

    #[test]
    fn test_user_prompt_is_not_html_escaped() {
        let rendered = render_user_prompt("Table: A&B", "who earns > 100 & < 200?").unwrap();
        assert!(rendered.contains("Table: A&B"));
        assert!(rendered.contains("\"who earns > 100 & < 200?\""));
        assert!(rendered.trim_end().ends_with("SQL query:"));
    }
}
