use crate::handle::{HandleValidator, DEFAULT_HANDLE_PATTERN};
use crate::ingest::RefreshPolicy;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Errors found while validating a loaded configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Main configuration for the directory service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Profile store configuration
    #[serde(default)]
    pub store: StoreConfig,
    /// Handle grammar
    #[serde(default)]
    pub handle: HandleConfig,
    /// Page renderer configuration
    #[serde(default)]
    pub renderer: RendererConfig,
    /// Ingestion behaviour
    #[serde(default)]
    pub ingest: IngestConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port, 0 disables the exporter
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Name of the request-path parameter carrying the handle
    #[serde(default = "default_path_parameter")]
    pub path_parameter: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Dynamodb,
    Memory,
}

/// Profile store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Table holding the profiles
    #[serde(default = "default_table")]
    pub table: String,
    /// Primary key attribute name
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for LocalStack, DynamoDB Local, etc.)
    pub endpoint_url: Option<String>,
    /// Maximum items per scan page; unset leaves paging to the store
    pub page_size: Option<i32>,
}

/// Handle grammar configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HandleConfig {
    /// Regular expression a handle must match in full
    #[serde(default = "default_handle_pattern")]
    pub pattern: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RendererBackend {
    #[default]
    Webdriver,
    Fixture,
}

/// Page renderer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RendererConfig {
    #[serde(default)]
    pub backend: RendererBackend,
    /// WebDriver endpoint (chromedriver)
    #[serde(default = "default_driver_url")]
    pub driver_url: String,
    /// Driver binary to launch at startup; unset means an external driver
    pub driver_path: Option<String>,
    /// Port passed to a launched driver
    #[serde(default = "default_driver_port")]
    pub driver_port: u16,
    /// Browser binary location
    pub browser_binary: Option<String>,
    /// Browser launch flags
    #[serde(default = "default_browser_args")]
    pub browser_args: Vec<String>,
    /// Upper bound on waiting for the page to settle
    #[serde(default = "default_settle_timeout_ms")]
    pub settle_timeout_ms: u64,
    /// Interval between settle checks
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Timeout for a single WebDriver request
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Directory of recorded page snapshots (fixture backend)
    #[serde(default = "default_fixture_dir")]
    pub fixture_dir: String,
}

/// Ingestion configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Profile page URL, `{handle}` is substituted
    #[serde(default = "default_profile_url_template")]
    pub profile_url_template: String,
    /// What to do when the handle already has a record
    #[serde(default)]
    pub refresh_policy: RefreshPolicy,
}

// Default value functions
fn default_service_name() -> String {
    "profile-directory".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_path_parameter() -> String {
    "handle".to_string()
}

fn default_table() -> String {
    "profiles".to_string()
}

fn default_primary_key() -> String {
    "user".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_handle_pattern() -> String {
    DEFAULT_HANDLE_PATTERN.to_string()
}

fn default_driver_url() -> String {
    "http://127.0.0.1:9515".to_string()
}

fn default_driver_port() -> u16 {
    9515
}

fn default_browser_args() -> Vec<String> {
    [
        "--headless",
        "--no-sandbox",
        "--disable-dev-shm-usage",
        "--disable-gpu",
        "--disable-dev-tools",
        "--no-zygote",
        "--single-process",
        "--remote-debugging-port=9222",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_settle_timeout_ms() -> u64 {
    5000
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_request_timeout_ms() -> u64 {
    30000
}

fn default_fixture_dir() -> String {
    "fixtures".to_string()
}

fn default_profile_url_template() -> String {
    "https://twitter.com/{handle}".to_string()
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/directory").required(false))
            .add_source(config::File::with_name("/etc/profile-directory/directory").required(false))
            // Override with environment variables
            // DIRECTORY__STORE__TABLE -> store.table
            .add_source(
                config::Environment::with_prefix("DIRECTORY")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("api.cors_origins")
                    .with_list_parse_key("renderer.browser_args")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.table.is_empty() {
            return Err(ConfigError::MissingRequired("store.table".to_string()));
        }

        if self.store.primary_key.is_empty() {
            return Err(ConfigError::MissingRequired("store.primary_key".to_string()));
        }

        if let Some(page_size) = self.store.page_size {
            if page_size < 1 {
                return Err(ConfigError::InvalidValue {
                    key: "store.page_size".to_string(),
                    message: "must be at least 1".to_string(),
                });
            }
        }

        let parameter = &self.api.path_parameter;
        if parameter.is_empty()
            || !parameter
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ConfigError::InvalidValue {
                key: "api.path_parameter".to_string(),
                message: format!("{parameter:?} is not a plain identifier"),
            });
        }

        HandleValidator::new(&self.handle.pattern).map_err(|e| ConfigError::InvalidValue {
            key: "handle.pattern".to_string(),
            message: e.to_string(),
        })?;

        if !self.ingest.profile_url_template.contains("{handle}") {
            return Err(ConfigError::InvalidValue {
                key: "ingest.profile_url_template".to_string(),
                message: "must contain {handle}".to_string(),
            });
        }

        if self.renderer.driver_path.is_some() {
            let port = reqwest::Url::parse(&self.renderer.driver_url)
                .map_err(|e| ConfigError::InvalidValue {
                    key: "renderer.driver_url".to_string(),
                    message: e.to_string(),
                })?
                .port_or_known_default();
            if port != Some(self.renderer.driver_port) {
                return Err(ConfigError::InvalidValue {
                    key: "renderer.driver_port".to_string(),
                    message: format!(
                        "launched driver listens on {} but driver_url is {}",
                        self.renderer.driver_port, self.renderer.driver_url
                    ),
                });
            }
        }

        if self.renderer.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "renderer.poll_interval_ms".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    /// Get the render settle timeout as Duration
    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.renderer.settle_timeout_ms)
    }

    /// Get the settle poll interval as Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.renderer.poll_interval_ms)
    }

    /// Get the WebDriver request timeout as Duration
    pub fn driver_request_timeout(&self) -> Duration {
        Duration::from_millis(self.renderer.request_timeout_ms)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
            path_parameter: default_path_parameter(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            table: default_table(),
            primary_key: default_primary_key(),
            region: default_region(),
            endpoint_url: None,
            page_size: None,
        }
    }
}

impl Default for HandleConfig {
    fn default() -> Self {
        Self {
            pattern: default_handle_pattern(),
        }
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            backend: RendererBackend::default(),
            driver_url: default_driver_url(),
            driver_path: None,
            driver_port: default_driver_port(),
            browser_binary: None,
            browser_args: default_browser_args(),
            settle_timeout_ms: default_settle_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            fixture_dir: default_fixture_dir(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            profile_url_template: default_profile_url_template(),
            refresh_policy: RefreshPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.store.primary_key, "user");
        assert_eq!(config.api.path_parameter, "handle");
        assert_eq!(config.ingest.refresh_policy, RefreshPolicy::Always);
        assert_eq!(config.settle_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_default_browser_flags() {
        let args = default_browser_args();
        assert!(args.contains(&"--headless".to_string()));
        assert!(args.contains(&"--no-sandbox".to_string()));
        assert!(args.contains(&"--disable-gpu".to_string()));
        assert!(args.contains(&"--single-process".to_string()));
        assert!(args.contains(&"--remote-debugging-port=9222".to_string()));
    }

    #[test]
    fn test_rejects_bad_handle_pattern() {
        let mut config = Config::default();
        config.handle.pattern = "(".to_string();

        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "handle.pattern"
        ));
    }

    #[test]
    fn test_launched_driver_port_must_match_url() {
        let mut config = Config::default();
        config.renderer.driver_path = Some("/usr/bin/chromedriver".to_string());
        assert!(config.validate().is_ok());

        config.renderer.driver_port = 9600;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "renderer.driver_port"
        ));

        config.renderer.driver_url = "http://127.0.0.1:9600/".to_string();
        assert!(config.validate().is_ok());

        config.renderer.driver_path = None;
        config.renderer.driver_url = "http://127.0.0.1:9515".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_template_without_handle() {
        let mut config = Config::default();
        config.ingest.profile_url_template = "https://twitter.com/".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_path_parameter_with_punctuation() {
        let mut config = Config::default();
        config.api.path_parameter = "handle/x".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_table() {
        let mut config = Config::default();
        config.store.table.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired(_))
        ));
    }

    #[test]
    fn test_deserializes_snake_case_enums() {
        let config: Config = serde_json::from_value(serde_json::json!({
            "store": { "backend": "memory", "page_size": 25 },
            "renderer": { "backend": "fixture" },
            "ingest": { "refresh_policy": "skip_if_present" }
        }))
        .unwrap();

        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.page_size, Some(25));
        assert_eq!(config.renderer.backend, RendererBackend::Fixture);
        assert_eq!(config.ingest.refresh_policy, RefreshPolicy::SkipIfPresent);
        assert_eq!(config.store.table, "profiles");
    }
}
