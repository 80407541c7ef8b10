//! Configuration types for lbsync
//!
//! The configuration is built once at startup (the daemon reads it from the
//! environment) and handed to each component. Nothing in the core looks up
//! ambient settings on its own.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main lbsync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LbSyncConfig {
    /// Discovery service settings
    pub discovery: DiscoveryConfig,

    /// Proxy process and config file settings
    pub proxy: ProxyConfig,

    /// Backend section rendering settings
    #[serde(default)]
    pub patcher: PatcherConfig,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl LbSyncConfig {
    /// Create a configuration with defaults for everything but the credential
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            discovery: DiscoveryConfig::new(api_key),
            proxy: ProxyConfig::default(),
            patcher: PatcherConfig::default(),
            engine: EngineConfig::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.discovery.validate()?;
        self.proxy.validate()?;
        self.patcher.validate()?;

        if self.engine.interval_secs == 0 {
            return Err(crate::Error::config("Poll interval must be > 0"));
        }
        if self.engine.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }

        Ok(())
    }
}

/// Discovery service configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Base URL; nodes are fetched from `{base_url}/nodes`
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Credential sent as `X-API-Key`
    pub api_key: String,

    /// Request timeout (in seconds)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl DiscoveryConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: default_base_url(),
            api_key: api_key.into(),
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.base_url.is_empty() {
            return Err(crate::Error::config("Discovery base URL cannot be empty"));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(crate::Error::config(format!(
                "Discovery base URL must use http or https: {}",
                self.base_url
            )));
        }
        if self.api_key.is_empty() {
            return Err(crate::Error::config("Discovery API key cannot be empty"));
        }
        if self.timeout_secs == 0 {
            return Err(crate::Error::config("Discovery timeout must be > 0"));
        }
        Ok(())
    }

    /// URL of the active-node listing
    pub fn nodes_url(&self) -> String {
        format!("{}/nodes", self.base_url.trim_end_matches('/'))
    }
}

// The API key must never reach the logs
impl std::fmt::Debug for DiscoveryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<REDACTED>")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Configuration file that is patched in place
    #[serde(default = "default_config_path")]
    pub config_path: PathBuf,

    /// Name of the backend section owned by lbsync
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Proxy executable used for `-c` checks and reloads
    #[serde(default = "default_binary")]
    pub binary: PathBuf,

    /// Pid file of the running proxy; `None` falls back to `pidof`
    #[serde(default = "default_pid_file")]
    pub pid_file: Option<PathBuf>,

    /// Stage and validate only, never install or reload
    #[serde(default)]
    pub dry_run: bool,
}

impl ProxyConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.config_path.as_os_str().is_empty() {
            return Err(crate::Error::config("Proxy config path cannot be empty"));
        }
        if self.binary.as_os_str().is_empty() {
            return Err(crate::Error::config("Proxy binary cannot be empty"));
        }
        if self.backend.is_empty() || self.backend.chars().any(char::is_whitespace) {
            return Err(crate::Error::config(format!(
                "Backend name must be a single non-empty word: '{}'",
                self.backend
            )));
        }
        Ok(())
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            config_path: default_config_path(),
            backend: default_backend(),
            binary: default_binary(),
            pid_file: default_pid_file(),
            dry_run: false,
        }
    }
}

/// Backend section rendering configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatcherConfig {
    /// Static directive lines emitted after the section header, before servers
    #[serde(default = "default_directives")]
    pub directives: Vec<String>,

    /// Options appended to every server line
    #[serde(default = "default_server_options")]
    pub server_options: String,

    /// Indentation used for every line inside the section
    #[serde(default = "default_indent")]
    pub indent: String,
}

impl PatcherConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self
            .directives
            .iter()
            .any(|d| d.trim().starts_with("backend") || d.contains('\n'))
        {
            return Err(crate::Error::config(
                "Directives must be single lines and cannot open a new backend",
            ));
        }
        if self.indent.is_empty() || !self.indent.chars().all(|c| c == ' ' || c == '\t') {
            return Err(crate::Error::config("Indent must be non-empty whitespace"));
        }
        Ok(())
    }
}

impl Default for PatcherConfig {
    fn default() -> Self {
        Self {
            directives: default_directives(),
            server_options: default_server_options(),
            indent: default_indent(),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Time between reconcile cycles (in seconds)
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Capacity of the engine event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_base_url() -> String {
    "http://wsupdates.example.com".to_string()
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_config_path() -> PathBuf {
    PathBuf::from("/usr/local/etc/haproxy/haproxy.cfg")
}

fn default_backend() -> String {
    "ws_nodes".to_string()
}

fn default_binary() -> PathBuf {
    PathBuf::from("haproxy")
}

fn default_pid_file() -> Option<PathBuf> {
    Some(PathBuf::from("/var/run/haproxy.pid"))
}

fn default_directives() -> Vec<String> {
    [
        "balance roundrobin",
        "option forwardfor",
        "option http-server-close",
        "option forceclose",
        "stick-table type ip size 200k expire 30m",
        "stick on src",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_server_options() -> String {
    "check".to_string()
}

fn default_indent() -> String {
    "    ".to_string()
}

fn default_interval_secs() -> u64 {
    60
}

fn default_event_channel_capacity() -> usize {
    100
}
