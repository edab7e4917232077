//! Configuration system for wsrelay
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables
//! 3. Configuration file (TOML)
//! 4. Default values
//!
//! The upstream connection settings honor the historical environment names
//! `WEBSOCKET_SERVER_URL`, `MAX_CONNECTION_RETRY_COUNT` and
//! `CONNECTION_RETRY_DEBOUNCE`; everything else uses the `WSRELAY_` prefix.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Sentinel value in `max_retry_count` meaning "retry forever"
pub const UNLIMITED_RETRIES: i64 = -1;

/// Main relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Relay identity
    pub relay: RelaySettings,

    /// Upstream WebSocket connection settings
    pub upstream: UpstreamSettings,

    /// Local HTTP send endpoint
    pub http: HttpSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Relay identity settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Human-readable relay name (defaults to the hostname)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Upstream connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamSettings {
    /// Upstream WebSocket URL
    pub url: String,

    /// Maximum connection attempts before giving up (-1 = unlimited)
    pub max_retry_count: i64,

    /// Fixed wait between failed connection attempts, in milliseconds
    pub retry_debounce_ms: u64,

    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// Interval at which the upstream sends ping frames, in milliseconds
    pub ping_interval_ms: u64,

    /// Latency allowance added on top of the ping interval, in milliseconds
    pub latency_margin_ms: u64,

    /// Outbound keepalive probe period in milliseconds (0 = disabled)
    pub keepalive_interval_ms: u64,

    /// Optional payload sent once after each successful open, as a
    /// connectivity probe
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hello_message: Option<String>,
}

/// Local HTTP surface settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Enable the HTTP send endpoint
    pub enabled: bool,

    /// Bind address
    pub bind: String,

    /// Listen port (0 = ephemeral)
    pub port: u16,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Maximum log file size in MB before rotation
    pub max_file_size_mb: u64,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

// Default implementations

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            relay: RelaySettings::default(),
            upstream: UpstreamSettings::default(),
            http: HttpSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self { name: None }
    }
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_retry_count: UNLIMITED_RETRIES,
            retry_debounce_ms: 5000,
            connect_timeout_ms: 30000,
            ping_interval_ms: 30000,
            latency_margin_ms: 1000,
            keepalive_interval_ms: 540_000, // 9 minutes
            hello_message: None,
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_file_size_mb: 100,
            max_files: 5,
            json_format: false,
        }
    }
}

impl UpstreamSettings {
    /// Attempt budget as an option: `None` means unlimited
    pub fn max_attempts(&self) -> Option<u32> {
        if self.max_retry_count < 0 {
            None
        } else {
            Some(self.max_retry_count as u32)
        }
    }

    /// Fixed debounce between failed attempts
    pub fn retry_debounce(&self) -> Duration {
        Duration::from_millis(self.retry_debounce_ms)
    }

    /// Watchdog deadline: ping interval plus latency margin
    pub fn watchdog_deadline(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms + self.latency_margin_ms)
    }

    /// Keepalive probe period, `None` when disabled
    pub fn keepalive_interval(&self) -> Option<Duration> {
        if self.keepalive_interval_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.keepalive_interval_ms))
        }
    }
}

impl RelaySettings {
    /// Relay name, falling back to the hostname
    pub fn instance_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "wsrelay".to_string())
        })
    }
}

impl RelayConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        // 1. Load from config file if it exists
        let config_file = Self::find_config_file(config_path)?;
        if let Some(path) = config_file {
            debug!(path = %path.display(), "Loading configuration file");
            let content = fs::read_to_string(&path)
                .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
            config = toml::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        // 2. Apply environment variable overrides
        config.apply_env_overrides();

        // 3. Expand paths
        config.expand_paths();

        // 4. Validate
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        // If explicit path provided, use it (error if not found)
        if let Some(path) = explicit_path {
            let expanded = shellexpand::tilde(path);
            let path = PathBuf::from(expanded.as_ref());
            if path.exists() {
                return Ok(Some(path));
            } else {
                return Err(Error::Config(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
        }

        // Search in standard locations
        let search_paths = [
            // Current directory
            PathBuf::from("wsrelay.toml"),
            PathBuf::from("config.toml"),
            // User config directory
            dirs::config_dir()
                .map(|p| p.join("wsrelay").join("config.toml"))
                .unwrap_or_default(),
            // Home directory
            dirs::home_dir()
                .map(|p| p.join(".wsrelay").join("config.toml"))
                .unwrap_or_default(),
            // System config (Linux)
            PathBuf::from("/etc/wsrelay/config.toml"),
        ];

        for path in &search_paths {
            if path.exists() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // Relay settings
        if let Ok(val) = std::env::var("WSRELAY_NAME") {
            self.relay.name = Some(val);
        }

        // Upstream settings (historical unprefixed names)
        if let Ok(val) = std::env::var("WEBSOCKET_SERVER_URL") {
            self.upstream.url = val;
        }
        if let Ok(val) = std::env::var("MAX_CONNECTION_RETRY_COUNT") {
            if let Ok(n) = val.parse() {
                self.upstream.max_retry_count = n;
            }
        }
        if let Ok(val) = std::env::var("CONNECTION_RETRY_DEBOUNCE") {
            if let Ok(n) = val.parse() {
                self.upstream.retry_debounce_ms = n;
            }
        }

        // Upstream settings (prefixed)
        if let Ok(val) = std::env::var("WSRELAY_CONNECT_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                self.upstream.connect_timeout_ms = n;
            }
        }
        if let Ok(val) = std::env::var("WSRELAY_PING_INTERVAL_MS") {
            if let Ok(n) = val.parse() {
                self.upstream.ping_interval_ms = n;
            }
        }
        if let Ok(val) = std::env::var("WSRELAY_LATENCY_MARGIN_MS") {
            if let Ok(n) = val.parse() {
                self.upstream.latency_margin_ms = n;
            }
        }
        if let Ok(val) = std::env::var("WSRELAY_KEEPALIVE_INTERVAL_MS") {
            if let Ok(n) = val.parse() {
                self.upstream.keepalive_interval_ms = n;
            }
        }
        if let Ok(val) = std::env::var("WSRELAY_HELLO_MESSAGE") {
            self.upstream.hello_message = Some(val);
        }

        // HTTP settings
        if let Ok(val) = std::env::var("WSRELAY_HTTP_ENABLED") {
            self.http.enabled = val.to_lowercase() == "true" || val == "1";
        }
        if let Ok(val) = std::env::var("WSRELAY_HTTP_BIND") {
            self.http.bind = val;
        }
        if let Ok(val) = std::env::var("WSRELAY_HTTP_PORT") {
            if let Ok(n) = val.parse() {
                self.http.port = n;
            }
        }

        // Logging settings
        if let Ok(val) = std::env::var("WSRELAY_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("WSRELAY_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("WSRELAY_LOG_JSON") {
            self.logging.json_format = val.to_lowercase() == "true" || val == "1";
        }
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        // Validate upstream URL
        if self.upstream.url.is_empty() {
            return Err(Error::config_field_invalid(
                "upstream.url",
                "Upstream URL cannot be empty (set WEBSOCKET_SERVER_URL)",
            ));
        }
        if !self.upstream.url.starts_with("ws://") && !self.upstream.url.starts_with("wss://") {
            return Err(Error::config_field_invalid(
                "upstream.url",
                "Upstream URL must start with ws:// or wss://",
            ));
        }
        if url::Url::parse(&self.upstream.url).is_err() {
            return Err(Error::config_field_invalid(
                "upstream.url",
                "Upstream URL is not a valid URL",
            ));
        }

        // Validate retry count sentinel
        if self.upstream.max_retry_count < UNLIMITED_RETRIES {
            return Err(Error::config_field_invalid(
                "upstream.max_retry_count",
                "max_retry_count must be >= -1 (-1 = unlimited)",
            ));
        }

        // A zero deadline would terminate every connection immediately
        if self.upstream.ping_interval_ms + self.upstream.latency_margin_ms == 0 {
            return Err(Error::config_field_invalid(
                "upstream.ping_interval_ms",
                "ping_interval_ms + latency_margin_ms must be greater than 0",
            ));
        }

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        Ok(())
    }
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Initialize a new configuration file
pub fn init_config(path: Option<&str>, force: bool) -> Result<()> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".wsrelay")
                .join("config.toml")
        });

    // Check if file exists
    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    // Create parent directories
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::Config(format!("Failed to create config directory: {}", e)))?;
    }

    // Generate default config with comments
    let config_content = generate_default_config();

    // Write the file
    fs::write(&config_path, config_content)
        .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

    println!("Configuration file created: {}", config_path.display());
    Ok(())
}

/// Generate default configuration content with comments
fn generate_default_config() -> String {
    r#"# wsrelay configuration
# https://github.com/wsrelay/wsrelay

[relay]
# Human-readable relay name (defaults to the hostname)
# name = "my-relay"

[upstream]
# Upstream WebSocket URL (also: WEBSOCKET_SERVER_URL)
url = ""

# Maximum connection attempts before giving up
# (-1 = unlimited; also: MAX_CONNECTION_RETRY_COUNT)
max_retry_count = -1

# Fixed wait between failed connection attempts, in milliseconds
# (also: CONNECTION_RETRY_DEBOUNCE)
retry_debounce_ms = 5000

# Connection timeout in milliseconds
connect_timeout_ms = 30000

# Interval at which the upstream sends ping frames, in milliseconds
ping_interval_ms = 30000

# Latency allowance added on top of the ping interval, in milliseconds
latency_margin_ms = 1000

# Outbound keepalive probe period in milliseconds (0 disables probing)
keepalive_interval_ms = 540000

# Payload sent once after each successful open, as a connectivity probe
# hello_message = "ping"

[http]
# Enable the local HTTP send endpoint
enabled = true

# Bind address
bind = "127.0.0.1"

# Listen port
port = 3000

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.wsrelay/logs/wsrelay.log"

# Maximum log file size in MB before rotation
max_file_size_mb = 100

# Number of rotated log files to keep
max_files = 5

# Enable JSON formatted logging
json_format = false
"#.to_string()
}
