//! Connection management for the remote warehouse.
//!
//! Every request that touches the warehouse opens its own session through
//! [`WarehouseManager::open`] and releases it before returning. Sessions are
//! never pooled, cached or shared between requests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

pub mod metadata;
pub mod snowflake;

const ACCOUNT_HOST_SUFFIX: &str = ".snowflakecomputing.com";

#[derive(Error, Debug)]
pub enum WarehouseError {
    /// Authentication or network setup failed.
    #[error("{0}")]
    Connection(String),
    /// The warehouse rejected a statement. The message is the warehouse's own.
    #[error("{0}")]
    Query(String),
    #[error("{0}")]
    InvalidCredentials(String),
}

/// Credentials supplied with each request. Nothing here is persisted.
#[derive(Deserialize, Clone, Default)]
pub struct WarehouseCredentials {
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub warehouse: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
}

impl fmt::Debug for WarehouseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarehouseCredentials")
            .field("account", &self.account)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("warehouse", &self.warehouse)
            .field("role", &self.role)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .finish()
    }
}

impl WarehouseCredentials {
    pub fn validate(&self) -> Result<(), WarehouseError> {
        let missing: Vec<&str> = [
            ("account", &self.account),
            ("username", &self.username),
            ("password", &self.password),
            ("warehouse", &self.warehouse),
        ]
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| *field)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(WarehouseError::InvalidCredentials(format!(
                "Missing required credentials: {}",
                missing.join(", ")
            )))
        }
    }

    /// The account locator without the `.snowflakecomputing.com` host suffix.
    pub fn account_identifier(&self) -> &str {
        let account = self.account.trim();
        account.strip_suffix(ACCOUNT_HOST_SUFFIX).unwrap_or(account)
    }

    pub fn default_database(&self) -> Option<&str> {
        non_empty(self.database.as_deref())
    }

    pub fn default_schema(&self) -> Option<&str> {
        non_empty(self.schema.as_deref())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// One SQL statement with positional `?` bind values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub bindings: Vec<String>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            bindings: Vec::new(),
        }
    }

    pub fn bind(mut self, value: impl Into<String>) -> Self {
        self.bindings.push(value.into());
        self
    }
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Renders a name for use as an identifier in SQL text.
///
/// Plain names are left unquoted so the warehouse resolves them
/// case-insensitively; anything else is double-quoted with embedded quotes
/// doubled.
pub fn quote_identifier(name: &str) -> String {
    if is_plain_identifier(name) {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// The form in which the warehouse stores a name in its information schema.
/// Unquoted identifiers are stored upper-cased.
pub fn stored_name(name: &str) -> String {
    if is_plain_identifier(name) {
        name.to_uppercase()
    } else {
        name.to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    /// Case-insensitive column lookup.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column.eq_ignore_ascii_case(name))
    }

    /// Rows as objects keyed by column name, in warehouse order.
    pub fn records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect::<Map<String, Value>>()
            })
            .collect()
    }
}

/// Opens authenticated sessions against a warehouse.
#[async_trait]
pub trait WarehouseConnector: Send + Sync {
    async fn connect(
        &self,
        credentials: &WarehouseCredentials,
    ) -> Result<Box<dyn WarehouseSession>, WarehouseError>;
}

/// A live, authenticated warehouse session.
#[async_trait]
pub trait WarehouseSession: Send {
    async fn execute(&mut self, statement: &Statement) -> Result<QueryResult, WarehouseError>;

    /// Releases the session. Must be safe to call more than once.
    async fn close(&mut self);
}

#[derive(Clone)]
pub struct WarehouseManager {
    connector: Arc<dyn WarehouseConnector>,
}

impl WarehouseManager {
    pub fn new(connector: Arc<dyn WarehouseConnector>) -> Self {
        Self { connector }
    }

    pub async fn open(
        &self,
        credentials: &WarehouseCredentials,
    ) -> Result<ScopedSession, WarehouseError> {
        credentials.validate()?;
        let session = self.connector.connect(credentials).await?;
        debug!(
            account = credentials.account_identifier(),
            warehouse = %credentials.warehouse,
            "Warehouse session opened."
        );
        Ok(ScopedSession {
            inner: Some(session),
        })
    }

    /// Opens a session, asks the warehouse for its version and closes again.
    pub async fn test_connection(
        &self,
        credentials: &WarehouseCredentials,
    ) -> Result<String, WarehouseError> {
        let mut session = self.open(credentials).await?;
        let result = session
            .execute(&Statement::new("SELECT CURRENT_VERSION()"))
            .await;
        session.close().await;

        result?
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(metadata::value_as_text)
            .ok_or_else(|| WarehouseError::Query("Warehouse returned no version".to_string()))
    }
}

/// A session bound to the lifetime of one request.
///
/// Call [`ScopedSession::close`] on the normal path. If the guard is dropped
/// while still open (early return, cancelled request) the close is spawned
/// onto the current runtime instead.
pub struct ScopedSession {
    inner: Option<Box<dyn WarehouseSession>>,
}

impl ScopedSession {
    pub async fn execute(&mut self, statement: &Statement) -> Result<QueryResult, WarehouseError> {
        match self.inner.as_mut() {
            Some(session) => session.execute(statement).await,
            None => Err(WarehouseError::Connection(
                "Warehouse session is already closed".to_string(),
            )),
        }
    }

    pub async fn close(mut self) {
        if let Some(mut session) = self.inner.take() {
            session.close().await;
            debug!("Warehouse session closed.");
        }
    }
}

impl Drop for ScopedSession {
    fn drop(&mut self) {
        if let Some(mut session) = self.inner.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        session.close().await;
                    });
                }
                Err(_) => {
                    warn!("Warehouse session dropped outside a runtime; it will expire server-side.")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeWarehouse, credentials};
    use std::sync::atomic::Ordering;

    #[test]
    fn test_validate_reports_all_missing_fields() {
        let creds = WarehouseCredentials {
            account: "acme".to_string(),
            ..Default::default()
        };
        let err = creds.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing required credentials: username, password, warehouse"
        );
    }

    #[test]
    fn test_account_identifier_strips_host_suffix() {
        let mut creds = credentials();
        creds.account = "xy12345.eu-west-1.snowflakecomputing.com".to_string();
        assert_eq!(creds.account_identifier(), "xy12345.eu-west-1");
        creds.account = "xy12345".to_string();
        assert_eq!(creds.account_identifier(), "xy12345");
    }

    #[test]
    fn test_debug_redacts_password() {
        let rendered = format!("{:?}", credentials());
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_identifier_quoting() {
        assert_eq!(quote_identifier("SALES_DB"), "SALES_DB");
        assert_eq!(quote_identifier("my db"), "\"my db\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_identifier("1abc"), "\"1abc\"");
        assert_eq!(stored_name("public"), "PUBLIC");
        assert_eq!(stored_name("Mixed Case"), "Mixed Case");
    }

    #[test]
    fn test_records_zip_columns_and_rows() {
        let result = QueryResult {
            columns: vec!["ID".to_string(), "NAME".to_string()],
            rows: vec![vec![Value::from(1), Value::from("a")]],
        };
        let records = result.records();
        assert_eq!(records[0]["ID"], Value::from(1));
        assert_eq!(records[0]["NAME"], Value::from("a"));
        assert_eq!(result.column_index("name"), Some(1));
    }

    #[tokio::test]
    async fn test_open_rejects_incomplete_credentials_without_connecting() {
        let fake = FakeWarehouse::new(|_| Ok(QueryResult::default()));
        let manager = WarehouseManager::new(Arc::new(fake.clone()));
        let result = manager.open(&WarehouseCredentials::default()).await;
        assert!(matches!(result, Err(WarehouseError::InvalidCredentials(_))));
        assert_eq!(fake.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_close_releases_session() {
        let fake = FakeWarehouse::new(|_| Ok(QueryResult::default()));
        let manager = WarehouseManager::new(Arc::new(fake.clone()));
        let session = manager.open(&credentials()).await.unwrap();
        session.close().await;
        assert_eq!(fake.connects.load(Ordering::SeqCst), 1);
        assert_eq!(fake.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drop_releases_session() {
        let fake = FakeWarehouse::new(|_| Ok(QueryResult::default()));
        let manager = WarehouseManager::new(Arc::new(fake.clone()));
        {
            let _session = manager.open(&credentials()).await.unwrap();
        }
        // The close runs on a spawned task.
        for _ in 0..50 {
            if fake.closes.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(fake.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connection_returns_version_and_closes() {
        let fake = FakeWarehouse::new(|_| {
            Ok(QueryResult {
                columns: vec!["CURRENT_VERSION()".to_string()],
                rows: vec![vec![Value::from("8.14.2")]],
            })
        });
        let manager = WarehouseManager::new(Arc::new(fake.clone()));
        let version = manager.test_connection(&credentials()).await.unwrap();
        assert_eq!(version, "8.14.2");
        assert_eq!(fake.closes.load(Ordering::SeqCst), 1);
        assert_eq!(fake.executed_sql(), vec!["SELECT CURRENT_VERSION()".to_string()]);
    }

    #[tokio::test]
    async fn test_query_failure_still_closes() {
        let fake = FakeWarehouse::new(|_| {
            Err(WarehouseError::Query("SQL compilation error".to_string()))
        });
        let manager = WarehouseManager::new(Arc::new(fake.clone()));
        let err = manager.test_connection(&credentials()).await.unwrap_err();
        assert_eq!(err.to_string(), "SQL compilation error");
        assert_eq!(fake.closes.load(Ordering::SeqCst), 1);
    }
}
