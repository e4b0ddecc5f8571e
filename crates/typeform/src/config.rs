//! Configuration management for typeform.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::query::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "typeform";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "responses.db";

/// Default API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.typeform.com";

/// Environment variable holding the access token.
pub const TOKEN_ENV_VAR: &str = "TYPEFORM_TOKEN";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. `TYPEFORM_TOKEN` for the access token
/// 2. Environment variables prefixed with `TYPEFORM_`, sections split on `__`
///    (e.g. `TYPEFORM_API__FORM_ID`)
/// 3. TOML config file at `~/.config/typeform/config.toml`
/// 4. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// API connection settings.
    pub api: ApiConfig,
    /// Paging and retry settings.
    pub fetch: FetchConfig,
    /// Local cache settings.
    pub storage: StorageConfig,
}

/// API connection settings.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the API.
    pub base_url: String,
    /// Personal access token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Form to read responses from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form_id: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

/// Paging and retry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Responses requested per page.
    pub page_size: u16,
    /// How many times a throttled or failed request is retried.
    pub max_retries: u32,
    /// Base delay between retries in milliseconds, doubled on each attempt.
    pub retry_backoff_ms: u64,
    /// Maximum pages fetched by one sync run.
    /// Set to 0 for unlimited.
    pub max_pages: u32,
    /// Seconds between sync rounds in watch mode.
    pub watch_interval_secs: u64,
}

/// Local cache settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/typeform/responses.db`
    pub database_path: Option<PathBuf>,
    /// Maximum number of responses kept per form after a sync.
    /// Set to 0 for unlimited.
    pub max_responses: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: None,
            form_id: None,
            timeout_secs: 30,
        }
    }
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("form_id", &self.form_id)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_retries: 3,
            retry_backoff_ms: 500,
            max_pages: 0,
            watch_interval_secs: 300,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let config: Config = Self::figment(Toml::file(&config_file)).extract()?;
        config.validate()?;
        Ok(config)
    }

    fn figment(file: impl figment::Provider) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(file)
            .merge(Env::prefixed("TYPEFORM_").split("__"))
            .merge(
                Env::raw()
                    .only(&[TOKEN_ENV_VAR])
                    .map(|_| "api.token".into()),
            )
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if reqwest::Url::parse(&self.api.base_url).is_err() {
            return Err(Error::config_validation(format!(
                "invalid base_url: {}",
                self.api.base_url
            )));
        }

        if self.api.timeout_secs == 0 {
            return Err(Error::config_validation(
                "timeout_secs must be greater than 0",
            ));
        }

        if self.fetch.page_size == 0 || self.fetch.page_size > MAX_PAGE_SIZE {
            return Err(Error::config_validation(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}, got {}",
                self.fetch.page_size
            )));
        }

        if self.fetch.watch_interval_secs == 0 {
            return Err(Error::config_validation(
                "watch_interval_secs must be greater than 0",
            ));
        }

        if matches!(&self.api.form_id, Some(id) if id.trim().is_empty()) {
            return Err(Error::config_validation("form_id must not be empty"));
        }

        Ok(())
    }

    /// The configured form id, or [`Error::MissingFormId`].
    ///
    /// # Errors
    ///
    /// Returns an error if no form id is set.
    pub fn form_id(&self) -> Result<&str> {
        self.api.form_id.as_deref().ok_or(Error::MissingFormId)
    }

    /// The configured access token, or [`Error::MissingToken`].
    ///
    /// # Errors
    ///
    /// Returns an error if no token is set or it is blank.
    pub fn token(&self) -> Result<&str> {
        self.api
            .token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or(Error::MissingToken)
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the request timeout as a Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    /// Get the base retry delay as a Duration.
    #[must_use]
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.fetch.retry_backoff_ms)
    }

    /// Get the page limit for one sync run, `None` when unlimited.
    #[must_use]
    pub fn max_pages(&self) -> Option<u32> {
        (self.fetch.max_pages > 0).then_some(self.fetch.max_pages)
    }

    /// Get the number of responses kept per form, `None` when unlimited.
    #[must_use]
    pub fn max_responses(&self) -> Option<usize> {
        (self.storage.max_responses > 0).then_some(self.storage.max_responses)
    }

    /// Get the watch interval as a Duration.
    #[must_use]
    pub fn watch_interval(&self) -> Duration {
        Duration::from_secs(self.fetch.watch_interval_secs)
    }
}
