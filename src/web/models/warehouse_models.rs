use serde::{Deserialize, Serialize};

use crate::warehouse::WarehouseCredentials;

/// Every metadata call carries the credentials it should connect with.
#[derive(Debug, Deserialize)]
pub struct WarehouseRequest {
    #[serde(default)]
    pub credentials: WarehouseCredentials,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub table: Option<String>,
    /// Search text for table search.
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub search_all_schemas: bool,
}

#[derive(Debug, Serialize)]
pub struct ConnectionTestResponse {
    pub success: bool,
    pub version: String,
}
