//! Natural-language questions to read-only SQL.
//!
//! One request runs the whole pipeline on a single warehouse session:
//! describe the schema, ask the model for SQL, check the SQL is read-only,
//! execute it and record the search.

use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

use crate::db::services::{NewSearchEntry, record_search};
use crate::warehouse::metadata::describe_schema;
use crate::warehouse::{
    QueryResult, ScopedSession, Statement, WarehouseCredentials, WarehouseError,
    WarehouseManager,
};

pub mod guard;
pub mod llm;
pub mod prompt;

use guard::{UnsafeQueryError, ensure_read_only, extract_sql};
use llm::{LanguageModel, TranslationError};

#[derive(Error, Debug)]
pub enum TranslatorError {
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
    #[error(transparent)]
    Translation(#[from] TranslationError),
    #[error(transparent)]
    Unsafe(#[from] UnsafeQueryError),
    #[error("{0}")]
    Validation(String),
}

/// Accepts credentials either nested under `credentials` or spread over the
/// top level of the body, as older clients send them.
#[derive(Deserialize, Debug)]
#[serde(from = "QueryBody")]
pub struct NaturalLanguageQuery {
    pub credentials: WarehouseCredentials,
    pub question: String,
    pub database: Option<String>,
    pub schema: Option<String>,
    pub user_identifier: Option<String>,
}

#[derive(Deserialize)]
struct QueryBody {
    #[serde(default)]
    credentials: Option<WarehouseCredentials>,
    #[serde(default, alias = "query")]
    question: String,
    #[serde(default)]
    database: Option<String>,
    #[serde(default)]
    schema: Option<String>,
    #[serde(default)]
    user_identifier: Option<String>,
    #[serde(default)]
    account: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    warehouse: String,
    #[serde(default)]
    role: Option<String>,
}

impl From<QueryBody> for NaturalLanguageQuery {
    fn from(body: QueryBody) -> Self {
        let credentials = body.credentials.unwrap_or_else(|| WarehouseCredentials {
            account: body.account,
            username: body.username,
            password: body.password,
            warehouse: body.warehouse,
            role: body.role,
            database: body.database.clone(),
            schema: body.schema.clone(),
        });
        Self {
            credentials,
            question: body.question,
            database: body.database,
            schema: body.schema,
            user_identifier: body.user_identifier,
        }
    }
}

#[derive(Serialize, Debug)]
pub struct QueryAnswer {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
    pub sql: String,
    /// Seconds spent executing the generated statement.
    pub execution_time: f64,
    pub natural_language_query: String,
}

fn pick<'a>(explicit: Option<&'a str>, fallback: Option<&'a str>) -> Option<&'a str> {
    explicit
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or(fallback)
}

#[derive(Clone)]
pub struct Translator {
    warehouse: WarehouseManager,
    model: Arc<dyn LanguageModel>,
}

impl Translator {
    pub fn new(warehouse: WarehouseManager, model: Arc<dyn LanguageModel>) -> Self {
        Self { warehouse, model }
    }

    pub async fn run(
        &self,
        db: &DatabaseConnection,
        request: NaturalLanguageQuery,
    ) -> Result<QueryAnswer, TranslatorError> {
        let question = request.question.trim().to_string();
        if question.is_empty() {
            return Err(TranslatorError::Validation("Query must not be empty".to_string()));
        }
        let credentials = &request.credentials;
        let database = pick(request.database.as_deref(), credentials.default_database())
            .map(str::to_string);
        let schema = pick(request.schema.as_deref(), credentials.default_schema())
            .map(str::to_string);
        let (Some(database), Some(schema)) = (database, schema) else {
            return Err(TranslatorError::Validation(
                "A database and schema are required to answer a question".to_string(),
            ));
        };

        let mut session = self.warehouse.open(credentials).await?;
        let outcome = self
            .answer_in_session(&mut session, &database, &schema, &question)
            .await;
        session.close().await;
        let (sql, result, execution_time) = outcome?;

        let answer = QueryAnswer {
            rows: result.records(),
            columns: result.columns,
            sql,
            execution_time,
            natural_language_query: question,
        };

        let entry = NewSearchEntry {
            natural_language_query: answer.natural_language_query.clone(),
            generated_sql: answer.sql.clone(),
            execution_time: answer.execution_time,
            row_count: answer.rows.len() as i64,
            user_identifier: request.user_identifier.filter(|u| !u.trim().is_empty()),
        };
        if let Err(e) = record_search(db, entry).await {
            warn!(error = %e, "Failed to record search history.");
        }

        Ok(answer)
    }

    async fn answer_in_session(
        &self,
        session: &mut ScopedSession,
        database: &str,
        schema: &str,
        question: &str,
    ) -> Result<(String, QueryResult, f64), TranslatorError> {
        let tables = describe_schema(session, database, schema).await?;
        if tables.is_empty() {
            return Err(TranslationError::Context(format!(
                "No tables found in {database}.{schema}; choose a schema with tables"
            ))
            .into());
        }

        let schema_context = prompt::render_schema_context(&tables)?;
        let user_prompt = prompt::render_user_prompt(&schema_context, question)?;
        let answer = self.model.complete(prompt::SYSTEM_PROMPT, &user_prompt).await?;
        let sql = extract_sql(&answer).ok_or(TranslationError::NoSql)?;

        if let Err(e) = ensure_read_only(&sql) {
            warn!(verb = %e.verb, "Rejected generated SQL.");
            return Err(e.into());
        }

        let started = Instant::now();
        let result = session.execute(&Statement::new(sql.clone())).await?;
        let execution_time = started.elapsed().as_secs_f64();
        info!(
            tables = tables.len(),
            rows = result.rows.len(),
            execution_time,
            "Answered natural-language query."
        );
        Ok((sql, result, execution_time))
    }
}
