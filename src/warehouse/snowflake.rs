//! Snowflake connector speaking the REST protocol used by the official drivers.
//!
//! Login exchanges username/password for a session token, statements are
//! posted to the query endpoint with JSON result format, and the session is
//! deleted on close.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeDelta};
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    QueryResult, Statement, WarehouseConnector, WarehouseCredentials, WarehouseError,
    WarehouseSession,
};
use crate::version::{CLIENT_APP_ID, VERSION};

/// Returned while a statement is still running server-side.
const QUERY_IN_PROGRESS: &str = "333333";
const QUERY_IN_PROGRESS_ASYNC: &str = "333334";
const POLL_INTERVAL: Duration = Duration::from_millis(500);
const SSE_C_ALGORITHM: &str = "x-amz-server-side-encryption-customer-algorithm";
const SSE_C_KEY: &str = "x-amz-server-side-encryption-customer-key";

pub struct SnowflakeConnector {
    client: Client,
    query_timeout: Duration,
}

impl SnowflakeConnector {
    pub fn new(login_timeout: Duration, query_timeout: Duration) -> Result<Self, WarehouseError> {
        let client = Client::builder()
            .connect_timeout(login_timeout)
            .build()
            .map_err(|e| WarehouseError::Connection(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            query_timeout,
        })
    }
}

#[derive(Deserialize, Debug)]
struct Envelope<T> {
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    success: bool,
}

#[derive(Deserialize, Debug)]
struct LoginData {
    token: String,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    #[serde(default)]
    rowtype: Vec<RowType>,
    #[serde(default)]
    rowset: Rowset,
    #[serde(default)]
    chunks: Vec<ChunkRef>,
    #[serde(default)]
    qrmk: Option<String>,
    #[serde(default)]
    chunk_headers: Option<HashMap<String, String>>,
    #[serde(default)]
    total: Option<i64>,
    #[serde(default)]
    get_result_url: Option<String>,
    #[serde(default)]
    query_id: Option<String>,
}

/// A further slice of a large result, served from cloud storage.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ChunkRef {
    url: String,
    #[serde(default)]
    row_count: Option<i64>,
}

type Rowset = Vec<Vec<Option<String>>>;

#[derive(Deserialize, Debug)]
struct RowType {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    scale: Option<i64>,
}

#[async_trait]
impl WarehouseConnector for SnowflakeConnector {
    async fn connect(
        &self,
        credentials: &WarehouseCredentials,
    ) -> Result<Box<dyn WarehouseSession>, WarehouseError> {
        let base_url = format!(
            "https://{}.snowflakecomputing.com",
            credentials.account_identifier()
        );

        let mut params: Vec<(&str, String)> = vec![
            ("requestId", Uuid::new_v4().to_string()),
            ("warehouse", credentials.warehouse.clone()),
        ];
        if let Some(database) = credentials.default_database() {
            params.push(("databaseName", database.to_string()));
        }
        if let Some(schema) = credentials.default_schema() {
            params.push(("schemaName", schema.to_string()));
        }
        if let Some(role) = credentials.role.as_deref().filter(|r| !r.trim().is_empty()) {
            params.push(("roleName", role.to_string()));
        }

        let body = json!({
            "data": {
                "CLIENT_APP_ID": CLIENT_APP_ID,
                "CLIENT_APP_VERSION": VERSION,
                "ACCOUNT_NAME": credentials.account_identifier(),
                "LOGIN_NAME": credentials.username,
                "PASSWORD": credentials.password,
                "SESSION_PARAMETERS": {
                    "QUERY_RESULT_FORMAT": "JSON",
                    "STATEMENT_TIMEOUT_IN_SECONDS": self.query_timeout.as_secs(),
                },
            }
        });

        let response = self
            .client
            .post(format!("{base_url}/session/v1/login-request"))
            .query(&params)
            .header(header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| WarehouseError::Connection(format!("Failed to reach warehouse: {e}")))?;

        let envelope: Envelope<LoginData> = read_envelope(response)
            .await
            .map_err(WarehouseError::Connection)?;
        if !envelope.success {
            return Err(WarehouseError::Connection(failure_message(
                envelope.message,
                envelope.code,
                "Login failed",
            )));
        }
        let token = envelope
            .data
            .map(|d| d.token)
            .ok_or_else(|| WarehouseError::Connection("Login response had no token".to_string()))?;

        Ok(Box::new(SnowflakeSession {
            client: self.client.clone(),
            base_url,
            token: Some(token),
            sequence_id: 0,
            query_timeout: self.query_timeout,
        }))
    }
}

struct SnowflakeSession {
    client: Client,
    base_url: String,
    token: Option<String>,
    sequence_id: u64,
    query_timeout: Duration,
}

impl SnowflakeSession {
    fn authorization(&self) -> Result<String, WarehouseError> {
        self.token
            .as_ref()
            .map(|token| format!("Snowflake Token=\"{token}\""))
            .ok_or_else(|| WarehouseError::Connection("Warehouse session is closed".to_string()))
    }

    async fn poll_result(
        &self,
        result_url: &str,
        deadline: Instant,
    ) -> Result<Envelope<QueryData>, WarehouseError> {
        loop {
            if Instant::now() >= deadline {
                return Err(WarehouseError::Query(format!(
                    "Statement did not finish within {} seconds",
                    self.query_timeout.as_secs()
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;

            let response = self
                .client
                .get(format!("{}{}", self.base_url, result_url))
                .header(header::AUTHORIZATION, self.authorization()?)
                .header(header::ACCEPT, "application/json")
                .send()
                .await
                .map_err(|e| WarehouseError::Connection(format!("Lost warehouse connection: {e}")))?;
            let envelope: Envelope<QueryData> =
                read_envelope(response).await.map_err(WarehouseError::Connection)?;
            if !is_in_progress(&envelope) {
                return Ok(envelope);
            }
        }
    }

    /// Appends every chunk to the inline rowset, in order, and checks the
    /// row total announced by the warehouse.
    async fn download_chunks(
        &self,
        data: &mut QueryData,
        deadline: Instant,
    ) -> Result<(), WarehouseError> {
        let chunks = std::mem::take(&mut data.chunks);
        if !chunks.is_empty() {
            let headers = chunk_headers(data)?;
            debug!(
                query_id = data.query_id.as_deref().unwrap_or("unknown"),
                chunks = chunks.len(),
                "Downloading result chunks."
            );
            for (index, chunk) in chunks.iter().enumerate() {
                let rows = self.fetch_chunk(chunk, &headers, deadline).await?;
                if let Some(expected) = chunk.row_count {
                    if rows.len() as i64 != expected {
                        return Err(WarehouseError::Query(format!(
                            "Result chunk {index} had {} rows, expected {expected}",
                            rows.len()
                        )));
                    }
                }
                data.rowset.extend(rows);
            }
        }
        match data.total {
            Some(total) if total > data.rowset.len() as i64 => Err(WarehouseError::Query(format!(
                "Result is incomplete: received {} of {total} rows",
                data.rowset.len()
            ))),
            _ => Ok(()),
        }
    }

    async fn fetch_chunk(
        &self,
        chunk: &ChunkRef,
        headers: &HeaderMap,
        deadline: Instant,
    ) -> Result<Rowset, WarehouseError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(WarehouseError::Query(format!(
                "Statement did not finish within {} seconds",
                self.query_timeout.as_secs()
            )));
        }
        // Chunk URLs are pre-signed; the session token must not be sent along.
        let response = self
            .client
            .get(&chunk.url)
            .headers(headers.clone())
            .timeout(remaining)
            .send()
            .await
            .map_err(|e| WarehouseError::Connection(format!("Failed to download result chunk: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(WarehouseError::Query(format!(
                "Result chunk download failed ({status})"
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| WarehouseError::Connection(format!("Failed to read result chunk: {e}")))?;
        parse_chunk(&body)
    }
}

#[async_trait]
impl WarehouseSession for SnowflakeSession {
    async fn execute(&mut self, statement: &Statement) -> Result<QueryResult, WarehouseError> {
        self.sequence_id += 1;
        let deadline = Instant::now() + self.query_timeout;

        let bindings: Map<String, Value> = statement
            .bindings
            .iter()
            .enumerate()
            .map(|(i, value)| {
                (
                    (i + 1).to_string(),
                    json!({ "type": "TEXT", "value": value }),
                )
            })
            .collect();
        let mut body = json!({
            "sqlText": statement.sql,
            "asyncExec": false,
            "sequenceId": self.sequence_id,
            "querySubmissionTime": chrono::Utc::now().timestamp_millis(),
        });
        if !bindings.is_empty() {
            body["bindings"] = Value::Object(bindings);
        }

        debug!(sequence_id = self.sequence_id, "Submitting warehouse statement.");
        let response = self
            .client
            .post(format!("{}/queries/v1/query-request", self.base_url))
            .query(&[("requestId", Uuid::new_v4().to_string())])
            .header(header::AUTHORIZATION, self.authorization()?)
            .header(header::ACCEPT, "application/json")
            .timeout(self.query_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| WarehouseError::Connection(format!("Lost warehouse connection: {e}")))?;

        let mut envelope: Envelope<QueryData> =
            read_envelope(response).await.map_err(WarehouseError::Connection)?;

        if is_in_progress(&envelope) {
            let result_url = envelope
                .data
                .as_ref()
                .and_then(|d| d.get_result_url.clone())
                .ok_or_else(|| {
                    WarehouseError::Query("Statement is running but no result URL was given".to_string())
                })?;
            envelope = self.poll_result(&result_url, deadline).await?;
        }

        if !envelope.success {
            return Err(WarehouseError::Query(failure_message(
                envelope.message,
                envelope.code,
                "Statement failed",
            )));
        }

        let mut data = envelope.data.unwrap_or_default();
        self.download_chunks(&mut data, deadline).await?;
        Ok(convert_result(data))
    }

    async fn close(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        let result = self
            .client
            .post(format!("{}/session", self.base_url))
            .query(&[("delete", "true")])
            .header(header::AUTHORIZATION, format!("Snowflake Token=\"{token}\""))
            .header(header::ACCEPT, "application/json")
            .send()
            .await;
        if let Err(e) = result {
            warn!(error = %e, "Failed to delete warehouse session.");
        }
    }
}

async fn read_envelope<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<Envelope<T>, String> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(format!("Warehouse refused the session ({status})"));
    }
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error body".to_string());
        return Err(format!("Warehouse returned {status}: {body}"));
    }
    response
        .json::<Envelope<T>>()
        .await
        .map_err(|e| format!("Unreadable warehouse response: {e}"))
}

/// Headers required by the storage service holding the chunks: either the
/// ones the warehouse lists, or the customer key for encrypted results.
fn chunk_headers(data: &QueryData) -> Result<HeaderMap, WarehouseError> {
    let invalid = |e: String| WarehouseError::Query(format!("Invalid result chunk header: {e}"));
    let mut headers = HeaderMap::new();
    match (&data.chunk_headers, &data.qrmk) {
        (Some(given), _) if !given.is_empty() => {
            for (name, value) in given {
                let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
                let value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
                headers.insert(name, value);
            }
        }
        (_, Some(qrmk)) => {
            headers.insert(SSE_C_ALGORITHM, HeaderValue::from_static("AES256"));
            let key = HeaderValue::from_str(qrmk).map_err(|e| invalid(e.to_string()))?;
            headers.insert(SSE_C_KEY, key);
        }
        _ => {}
    }
    Ok(headers)
}

/// Chunk bodies are comma-separated row arrays without the enclosing brackets.
fn parse_chunk(body: &str) -> Result<Rowset, WarehouseError> {
    let body = body.trim();
    let body = body.strip_suffix(',').unwrap_or(body);
    serde_json::from_str(&format!("[{body}]"))
        .map_err(|e| WarehouseError::Query(format!("Unreadable result chunk: {e}")))
}

fn is_in_progress<T>(envelope: &Envelope<T>) -> bool {
    matches!(
        envelope.code.as_deref(),
        Some(QUERY_IN_PROGRESS) | Some(QUERY_IN_PROGRESS_ASYNC)
    )
}

fn failure_message(message: Option<String>, code: Option<String>, fallback: &str) -> String {
    match (message, code) {
        (Some(message), _) if !message.is_empty() => message,
        (_, Some(code)) => format!("{fallback} (code {code})"),
        _ => fallback.to_string(),
    }
}

fn convert_result(data: QueryData) -> QueryResult {
    let columns = data.rowtype.iter().map(|r| r.name.clone()).collect();
    let rows = data
        .rowset
        .into_iter()
        .map(|row| {
            row.into_iter()
                .enumerate()
                .map(|(i, cell)| match (cell, data.rowtype.get(i)) {
                    (None, _) => Value::Null,
                    (Some(text), Some(row_type)) => convert_cell(text, row_type),
                    (Some(text), None) => Value::String(text),
                })
                .collect()
        })
        .collect();
    QueryResult { columns, rows }
}

/// JSON results carry every cell as text; numbers, booleans and temporal
/// values are decoded according to the column type.
fn convert_cell(text: String, row_type: &RowType) -> Value {
    match row_type.kind.to_ascii_lowercase().as_str() {
        "fixed" if row_type.scale.unwrap_or(0) == 0 => text
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or(Value::String(text)),
        "fixed" | "real" => text
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::String(text)),
        "boolean" => match text.as_str() {
            "1" | "true" | "TRUE" => Value::Bool(true),
            "0" | "false" | "FALSE" => Value::Bool(false),
            _ => Value::String(text),
        },
        "date" => text
            .parse::<i64>()
            .ok()
            .and_then(|days| {
                NaiveDate::from_ymd_opt(1970, 1, 1)?.checked_add_signed(TimeDelta::days(days))
            })
            .map(|date| Value::String(date.to_string()))
            .unwrap_or(Value::String(text)),
        "timestamp_ltz" | "timestamp_ntz" | "timestamp_tz" => epoch_to_rfc3339(&text)
            .map(Value::String)
            .unwrap_or(Value::String(text)),
        _ => Value::String(text),
    }
}

/// `"1700000000.123456789"` or, for TZ values, `"1700000000.123 1440"`.
/// The fraction carries the sign of the whole value.
fn epoch_to_rfc3339(text: &str) -> Option<String> {
    let epoch = text.split_whitespace().next()?;
    let (negative, digits) = match epoch.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, epoch),
    };
    let (whole, frac) = digits.split_once('.').unwrap_or((digits, "0"));
    let whole: i64 = whole.parse().ok()?;
    let frac: i64 = format!("{frac:0<9}").get(..9)?.parse().ok()?;
    if whole < 0 || frac < 0 {
        return None;
    }

    let mut nanos = i128::from(whole) * 1_000_000_000 + i128::from(frac);
    if negative {
        nanos = -nanos;
    }
    let secs = i64::try_from(nanos.div_euclid(1_000_000_000)).ok()?;
    let subsec = u32::try_from(nanos.rem_euclid(1_000_000_000)).ok()?;
    DateTime::from_timestamp(secs, subsec).map(|dt| dt.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_type(name: &str, kind: &str, scale: Option<i64>) -> RowType {
        RowType {
            name: name.to_string(),
            kind: kind.to_string(),
            scale,
        }
    }

    #[test]
    fn test_convert_result_decodes_typed_cells() {
        let data = QueryData {
            rowtype: vec![
                row_type("ID", "fixed", Some(0)),
                row_type("AMOUNT", "fixed", Some(2)),
                row_type("ACTIVE", "boolean", None),
                row_type("NAME", "text", None),
                row_type("SIGNUP", "date", None),
            ],
            rowset: vec![vec![
                Some("7".to_string()),
                Some("12.50".to_string()),
                Some("1".to_string()),
                None,
                Some("19723".to_string()),
            ]],
            ..Default::default()
        };
        let result = convert_result(data);
        assert_eq!(result.columns, vec!["ID", "AMOUNT", "ACTIVE", "NAME", "SIGNUP"]);
        assert_eq!(result.rows[0][0], Value::from(7));
        assert_eq!(result.rows[0][1], json!(12.5));
        assert_eq!(result.rows[0][2], Value::Bool(true));
        assert_eq!(result.rows[0][3], Value::Null);
        assert_eq!(result.rows[0][4], Value::from("2024-01-01"));
    }

    #[test]
    fn test_epoch_timestamps_become_rfc3339() {
        assert_eq!(
            epoch_to_rfc3339("1704067200.000000000").as_deref(),
            Some("2024-01-01T00:00:00+00:00")
        );
        assert_eq!(
            epoch_to_rfc3339("1704067200.5 1440").as_deref(),
            Some("2024-01-01T00:00:00.500+00:00")
        );
        assert_eq!(epoch_to_rfc3339("not a time"), None);
    }

    #[test]
    fn test_negative_epochs_keep_the_fraction_sign() {
        assert_eq!(
            epoch_to_rfc3339("-1.5").as_deref(),
            Some("1969-12-31T23:59:58.500+00:00")
        );
        assert_eq!(
            epoch_to_rfc3339("-0.25 1440").as_deref(),
            Some("1969-12-31T23:59:59.750+00:00")
        );
        assert_eq!(epoch_to_rfc3339("--1.5"), None);
    }

    #[test]
    fn test_parse_chunk_wraps_bare_rows() {
        let rows = parse_chunk("[\"1\",\"a\"],\n[\"2\",null]\n").unwrap();
        assert_eq!(
            rows,
            vec![
                vec![Some("1".to_string()), Some("a".to_string())],
                vec![Some("2".to_string()), None],
            ]
        );
        assert!(parse_chunk("[\"1\",").is_err());
    }

    #[test]
    fn test_chunk_headers_prefer_listed_headers() {
        let mut data = QueryData {
            qrmk: Some("master-key".to_string()),
            ..Default::default()
        };
        let headers = chunk_headers(&data).unwrap();
        assert_eq!(headers[SSE_C_ALGORITHM], "AES256");
        assert_eq!(headers[SSE_C_KEY], "master-key");

        data.chunk_headers = Some(HashMap::from([(
            "x-custom-auth".to_string(),
            "abc".to_string(),
        )]));
        let headers = chunk_headers(&data).unwrap();
        assert_eq!(headers["x-custom-auth"], "abc");
        assert!(headers.get(SSE_C_KEY).is_none());
    }

    /// Serves a query answer whose rows are split over two chunks.
    async fn chunked_warehouse(total: i64) -> String {
        use axum::extract::Path;
        use axum::routing::{get, post};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let chunk_base = base_url.clone();
        let router = axum::Router::new()
            .route(
                "/queries/v1/query-request",
                post(move || {
                    let chunk_base = chunk_base.clone();
                    async move {
                        axum::Json(json!({
                            "success": true,
                            "data": {
                                "queryId": "01ab",
                                "rowtype": [
                                    { "name": "ID", "type": "fixed", "scale": 0 },
                                    { "name": "NAME", "type": "text" }
                                ],
                                "rowset": [["1", "a"]],
                                "qrmk": "master-key",
                                "chunks": [
                                    { "url": format!("{chunk_base}/chunks/0"), "rowCount": 2 },
                                    { "url": format!("{chunk_base}/chunks/1"), "rowCount": 1 }
                                ],
                                "total": total
                            }
                        }))
                    }
                }),
            )
            .route(
                "/chunks/{n}",
                get(|Path(n): Path<usize>, headers: axum::http::HeaderMap| async move {
                    let keyed = headers.get(SSE_C_KEY).is_some_and(|v| v == "master-key");
                    if !keyed || headers.contains_key(header::AUTHORIZATION) {
                        return (StatusCode::FORBIDDEN, String::new());
                    }
                    let body = match n {
                        0 => "[\"2\",\"b\"],\n[\"3\",\"c\"]",
                        _ => "[\"4\",\"d\"]",
                    };
                    (StatusCode::OK, body.to_string())
                }),
            );
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        base_url
    }

    fn session(base_url: String) -> SnowflakeSession {
        SnowflakeSession {
            client: Client::new(),
            base_url,
            token: Some("t0k".to_string()),
            sequence_id: 0,
            query_timeout: Duration::from_secs(10),
        }
    }

    #[tokio::test]
    async fn test_execute_collects_every_chunk_in_order() {
        let mut session = session(chunked_warehouse(4).await);
        let result = session
            .execute(&Statement::new("SELECT ID, NAME FROM CUSTOMERS"))
            .await
            .unwrap();
        let ids: Vec<Value> = result.rows.iter().map(|row| row[0].clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(2), json!(3), json!(4)]);
        assert_eq!(result.rows[3][1], json!("d"));
    }

    #[tokio::test]
    async fn test_execute_rejects_incomplete_results() {
        let mut session = session(chunked_warehouse(6).await);
        let err = session
            .execute(&Statement::new("SELECT ID, NAME FROM CUSTOMERS"))
            .await
            .unwrap_err();
        assert!(matches!(&err, WarehouseError::Query(m) if m == "Result is incomplete: received 4 of 6 rows"));
    }

    #[test]
    fn test_failure_message_prefers_warehouse_text() {
        assert_eq!(
            failure_message(Some("Object does not exist".to_string()), Some("002003".to_string()), "x"),
            "Object does not exist"
        );
        assert_eq!(
            failure_message(None, Some("390100".to_string()), "Login failed"),
            "Login failed (code 390100)"
        );
    }

    #[test]
    fn test_login_envelope_parses() {
        let envelope: Envelope<LoginData> = serde_json::from_value(json!({
            "data": { "token": "abc", "masterToken": "def" },
            "code": null,
            "message": null,
            "success": true
        }))
        .unwrap();
        assert!(envelope.success);
        assert_eq!(envelope.data.unwrap().token, "abc");
    }

    #[test]
    fn test_in_progress_codes_are_recognised() {
        let envelope: Envelope<QueryData> = serde_json::from_value(json!({
            "data": { "getResultUrl": "/queries/01ab/result", "queryId": "01ab" },
            "code": "333334",
            "success": true
        }))
        .unwrap();
        assert!(is_in_progress(&envelope));
        assert_eq!(
            envelope.data.unwrap().get_result_url.as_deref(),
            Some("/queries/01ab/result")
        );
    }
}
