use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::translator::llm::ChatModelSettings;

#[derive(Deserialize, Debug, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default)]
    pub llm_api_key: Option<String>,

    #[serde(default = "default_llm_base_url")]
    pub llm_base_url: String,

    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,

    #[serde(default = "default_llm_max_tokens")]
    pub llm_max_tokens: u32,

    #[serde(default = "default_login_timeout_secs")]
    pub warehouse_login_timeout_secs: u64,

    #[serde(default = "default_query_timeout_secs")]
    pub warehouse_query_timeout_secs: u64,

    #[serde(default = "default_cors_allow_origin")]
    pub cors_allow_origin: String,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialServerConfig {
    listen_addr: Option<String>,
    database_url: Option<String>,
    log_dir: Option<String>,
    llm_api_key: Option<String>,
    llm_base_url: Option<String>,
    llm_model: Option<String>,
    llm_timeout_secs: Option<u64>,
    llm_max_tokens: Option<u32>,
    warehouse_login_timeout_secs: Option<u64>,
    warehouse_query_timeout_secs: Option<u64>,
    cors_allow_origin: Option<String>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_database_url() -> String {
    "sqlite://catalog.db?mode=rwc".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    60
}

fn default_llm_max_tokens() -> u32 {
    500
}

fn default_login_timeout_secs() -> u64 {
    60
}

fn default_query_timeout_secs() -> u64 {
    300
}

fn default_cors_allow_origin() -> String {
    "*".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::merge(PartialServerConfig::default(), PartialServerConfig::default())
    }
}

impl ServerConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self, String> {
        dotenv::dotenv().ok();

        // 1. Load from file (optional)
        let file_config: PartialServerConfig = if let Some(path_str) = config_path {
            let path = Path::new(path_str);
            if path.exists() {
                let contents = fs::read_to_string(path)
                    .map_err(|e| format!("Failed to read config file at {path:?}: {e}"))?;
                toml::from_str(&contents)
                    .map_err(|e| format!("Failed to parse TOML from config file at {path:?}: {e}"))?
            } else {
                PartialServerConfig::default()
            }
        } else {
            PartialServerConfig::default()
        };

        // 2. Load from environment variables
        let env_config: PartialServerConfig = envy::from_env::<PartialServerConfig>()
            .map_err(|e| format!("Failed to load config from environment: {e}"))?;

        // 3. Merge: environment overrides file
        Ok(Self::merge(env_config, file_config))
    }

    fn merge(env_config: PartialServerConfig, file_config: PartialServerConfig) -> Self {
        ServerConfig {
            listen_addr: env_config.listen_addr.or(file_config.listen_addr)
                .unwrap_or_else(default_listen_addr),
            database_url: env_config.database_url.or(file_config.database_url)
                .unwrap_or_else(default_database_url),
            log_dir: env_config.log_dir.or(file_config.log_dir)
                .unwrap_or_else(default_log_dir),
            llm_api_key: env_config.llm_api_key.or(file_config.llm_api_key)
                .filter(|key| !key.trim().is_empty()),
            llm_base_url: env_config.llm_base_url.or(file_config.llm_base_url)
                .unwrap_or_else(default_llm_base_url),
            llm_model: env_config.llm_model.or(file_config.llm_model)
                .unwrap_or_else(default_llm_model),
            llm_timeout_secs: env_config.llm_timeout_secs.or(file_config.llm_timeout_secs)
                .unwrap_or_else(default_llm_timeout_secs),
            llm_max_tokens: env_config.llm_max_tokens.or(file_config.llm_max_tokens)
                .unwrap_or_else(default_llm_max_tokens),
            warehouse_login_timeout_secs: env_config.warehouse_login_timeout_secs
                .or(file_config.warehouse_login_timeout_secs)
                .unwrap_or_else(default_login_timeout_secs),
            warehouse_query_timeout_secs: env_config.warehouse_query_timeout_secs
                .or(file_config.warehouse_query_timeout_secs)
                .unwrap_or_else(default_query_timeout_secs),
            cors_allow_origin: env_config.cors_allow_origin.or(file_config.cors_allow_origin)
                .unwrap_or_else(default_cors_allow_origin),
        }
    }

    pub fn chat_model_settings(&self) -> ChatModelSettings {
        ChatModelSettings {
            api_key: self.llm_api_key.clone(),
            base_url: self.llm_base_url.clone(),
            model: self.llm_model.clone(),
            timeout: Duration::from_secs(self.llm_timeout_secs),
            max_tokens: self.llm_max_tokens,
        }
    }

    pub fn warehouse_login_timeout(&self) -> Duration {
        Duration::from_secs(self.warehouse_login_timeout_secs)
    }

    pub fn warehouse_query_timeout(&self) -> Duration {
        Duration::from_secs(self.warehouse_query_timeout_secs)
    }
}
