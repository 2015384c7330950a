use coursecraft_core::llm_client::DEFAULT_BASE_URL;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// `None` runs the service offline with an in-memory course store.
    pub database_url: Option<String>,
    pub gemini_api_key: String,
    pub gemini_base_url: String,
    pub chat_model: String,
    pub log_level: Level,
    pub prompts_path: PathBuf,
    pub export_dir: PathBuf,
    pub preferences_path: PathBuf,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        let gemini_api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;

        let gemini_base_url =
            std::env::var("GEMINI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        if !gemini_base_url.starts_with("http://") && !gemini_base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "GEMINI_BASE_URL".to_string(),
                format!("'{}' is not an http(s) URL", gemini_base_url),
            ));
        }

        let chat_model =
            std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gemini-2.5-flash".to_string());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let path_var = |name: &str, default: &str| {
            std::env::var(name)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(default))
        };

        Ok(Self {
            bind_address,
            database_url,
            gemini_api_key,
            gemini_base_url,
            chat_model,
            log_level,
            prompts_path: path_var("PROMPTS_PATH", "./prompts"),
            export_dir: path_var("EXPORT_DIR", "./exports"),
            preferences_path: path_var("PREFERENCES_PATH", "./preferences.json"),
        })
    }
}
