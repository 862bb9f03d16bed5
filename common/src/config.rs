//! Environment-driven configuration.
//!
//! Values are read once at startup. Every setting has a default so a local
//! run needs nothing but an optional `.env` file.

use std::time::Duration;

/// Fallback secret used when `APP_ENCRYPTION_KEY` is unset. Only acceptable for
/// local development; a warning is logged when it is used.
pub const DEV_ENCRYPTION_KEY: &str = "querypilot-dev-encryption-key-32";

/// Pool sizing and timeouts for target databases.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Maximum live connections per data source.
    pub max_size: u32,
    /// Connections kept open while idle.
    pub min_idle: u32,
    /// How long a caller waits for a connection before failing.
    pub connect_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: 5,
            min_idle: 1,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Text-completion endpoint settings.
#[derive(Debug, Clone)]
pub struct CompletionSettings {
    /// Base URL of an OpenAI-compatible API.
    pub base_url: String,
    /// Bearer token, if the endpoint requires one.
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepseek.com".to_string(),
            api_key: None,
            model: "deepseek-chat".to_string(),
            temperature: 0.0,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Process configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Name used in logs and response metadata.
    pub service_name: String,
    pub host: String,
    pub port: u16,
    /// Metadata database; the in-memory store is used when absent.
    pub database_url: Option<String>,
    /// Secret the credential cipher key is derived from.
    pub encryption_key: String,
    /// Username seeded as ADMIN in the in-memory store.
    pub bootstrap_admin: String,
    pub pool: PoolSettings,
    pub completion: CompletionSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service_name: "querypilot".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8080,
            database_url: None,
            encryption_key: DEV_ENCRYPTION_KEY.to_string(),
            bootstrap_admin: "admin".to_string(),
            pool: PoolSettings::default(),
            completion: CompletionSettings::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from the environment for the named service.
    pub fn load_with_service(service_name: &str) -> Self {
        let defaults = Self::default();

        let encryption_key = match non_empty_var("APP_ENCRYPTION_KEY") {
            Some(key) => key,
            None => {
                tracing::warn!("APP_ENCRYPTION_KEY is not set, using the development key");
                defaults.encryption_key
            }
        };

        Self {
            service_name: service_name.to_string(),
            host: non_empty_var("SERVER_HOST").unwrap_or(defaults.host),
            port: parsed_var("SERVER_PORT").unwrap_or(defaults.port),
            database_url: non_empty_var("DATABASE_URL"),
            encryption_key,
            bootstrap_admin: non_empty_var("BOOTSTRAP_ADMIN_USER")
                .unwrap_or(defaults.bootstrap_admin),
            pool: PoolSettings {
                max_size: parsed_var("POOL_MAX_SIZE").unwrap_or(defaults.pool.max_size),
                min_idle: parsed_var("POOL_MIN_IDLE").unwrap_or(defaults.pool.min_idle),
                connect_timeout: parsed_var("POOL_CONNECT_TIMEOUT_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.pool.connect_timeout),
            },
            completion: CompletionSettings {
                base_url: non_empty_var("AI_BASE_URL").unwrap_or(defaults.completion.base_url),
                api_key: non_empty_var("AI_API_KEY"),
                model: non_empty_var("AI_MODEL").unwrap_or(defaults.completion.model),
                temperature: parsed_var("AI_TEMPERATURE")
                    .unwrap_or(defaults.completion.temperature),
                timeout: parsed_var("AI_TIMEOUT_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.completion.timeout),
            },
        }
    }
}

/// Load .env file from the working directory (best-effort, no error if missing).
pub fn load_dotenv() {
    let env_path = std::path::Path::new(".env");
    if !env_path.exists() {
        return;
    }
    if let Ok(content) = std::fs::read_to_string(env_path) {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim().trim_matches('"');
                // Only set if not already set by the environment
                if std::env::var(key).is_err() {
                    std::env::set_var(key, value);
                }
            }
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    non_empty_var(key).and_then(|v| match v.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(key, value = %v, "ignoring unparsable setting");
            None
        }
    })
}
