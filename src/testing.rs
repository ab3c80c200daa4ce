//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::translator::llm::{LanguageModel, TranslationError};
use crate::warehouse::{
    QueryResult, Statement, WarehouseConnector, WarehouseCredentials, WarehouseError,
    WarehouseSession,
};

type Responder = dyn Fn(&Statement) -> Result<QueryResult, WarehouseError> + Send + Sync;

pub fn credentials() -> WarehouseCredentials {
    WarehouseCredentials {
        account: "acme-test".to_string(),
        username: "analyst".to_string(),
        password: "hunter2".to_string(),
        warehouse: "COMPUTE_WH".to_string(),
        role: None,
        database: Some("SALES".to_string()),
        schema: Some("PUBLIC".to_string()),
    }
}

/// Connector that answers every statement through a closure and records what
/// it was asked to run.
#[derive(Clone)]
pub struct FakeWarehouse {
    pub executed: Arc<Mutex<Vec<Statement>>>,
    pub connects: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
    responder: Arc<Responder>,
}

impl FakeWarehouse {
    pub fn new(
        responder: impl Fn(&Statement) -> Result<QueryResult, WarehouseError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            executed: Arc::new(Mutex::new(Vec::new())),
            connects: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
            responder: Arc::new(responder),
        }
    }

    pub fn executed_sql(&self) -> Vec<String> {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .map(|statement| statement.sql.clone())
            .collect()
    }
}

#[async_trait]
impl WarehouseConnector for FakeWarehouse {
    async fn connect(
        &self,
        _credentials: &WarehouseCredentials,
    ) -> Result<Box<dyn WarehouseSession>, WarehouseError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            owner: self.clone(),
            open: true,
        }))
    }
}

struct FakeSession {
    owner: FakeWarehouse,
    open: bool,
}

#[async_trait]
impl WarehouseSession for FakeSession {
    async fn execute(&mut self, statement: &Statement) -> Result<QueryResult, WarehouseError> {
        self.owner.executed.lock().unwrap().push(statement.clone());
        (self.owner.responder)(statement)
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            self.owner.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Language model that returns a canned answer and remembers its prompts.
#[derive(Clone)]
pub struct FakeLanguageModel {
    answer: Result<String, String>,
    pub prompts: Arc<Mutex<Vec<String>>>,
}

impl FakeLanguageModel {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: Ok(answer.to_string()),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            answer: Err(message.to_string()),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl LanguageModel for FakeLanguageModel {
    async fn complete(
        &self,
        _system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, TranslationError> {
        self.prompts.lock().unwrap().push(user_prompt.to_string());
        self.answer.clone().map_err(TranslationError::Request)
    }
}

/// A single-connection in-memory sqlite database with the catalog tables.
pub async fn catalog_db() -> DatabaseConnection {
    let db = empty_db().await;
    crate::db::create_tables(&db).await.unwrap();
    db
}

/// Same as [`catalog_db`] but without any tables, so every write fails.
pub async fn empty_db() -> DatabaseConnection {
    let mut opt = ConnectOptions::new("sqlite::memory:".to_owned());
    opt.max_connections(1).min_connections(1).sqlx_logging(false);
    Database::connect(opt).await.unwrap()
}
