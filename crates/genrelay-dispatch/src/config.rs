//! Dispatcher configuration.
//!
//! Settings are layered: built-in defaults, then an optional YAML file, then
//! `GENRELAY_*` environment variables. Every field has a default, so an empty
//! file or an empty environment yields a working configuration that talks to
//! the built-in server registry with no remote store.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use url::Url;
use zeroize::Zeroizing;

/// Built-in proxy registry, used when nothing else is configured.
pub const DEFAULT_SERVERS: &[&str] = &[
    "https://proxy-1.genrelay.dev",
    "https://proxy-2.genrelay.dev",
    "https://proxy-3.genrelay.dev",
    "https://proxy-m1.genrelay.dev",
];

/// Subset of [`DEFAULT_SERVERS`] reserved for the designated device class.
pub const DEFAULT_DESIGNATED_SERVERS: &[&str] = &["https://proxy-m1.genrelay.dev"];

/// Endpoint every request goes to when running under local development.
pub const DEFAULT_LOCAL_ENDPOINT: &str = "http://127.0.0.1:3001";

/// Cap on server×token combinations for generation requests.
pub const DEFAULT_MAX_COMBINATIONS: u32 = 10;

/// Slot reservation cooldown.
pub const DEFAULT_SLOT_COOLDOWN_SECS: u64 = 10;

/// Retry policy for the combination loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Upper bound on combinations tried for generation requests.
    pub max_combinations: u32,
    /// Case-insensitive substrings of `log_context` that mark generation work.
    pub generation_markers: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_combinations: DEFAULT_MAX_COMBINATIONS,
            generation_markers: vec!["generat".into(), "recipe".into()],
        }
    }
}

impl RetryPolicy {
    /// Whether a log context marks generation work (as opposed to a status poll).
    pub fn is_generation(&self, log_context: &str) -> bool {
        let lower = log_context.to_lowercase();
        self.generation_markers
            .iter()
            .any(|m| !m.is_empty() && lower.contains(&m.to_lowercase()))
    }

    /// Number of combinations to try.
    ///
    /// Generation work gets `min(servers × tokens, max_combinations)`;
    /// everything else gets exactly one attempt.
    pub fn budget(&self, servers: usize, tokens: usize, generation: bool) -> u32 {
        self.budget_for(servers.saturating_mul(tokens), generation)
    }

    /// Budget over a number of distinct combinations.
    pub fn budget_for(&self, combinations: usize, generation: bool) -> u32 {
        let combinations = u32::try_from(combinations).unwrap_or(u32::MAX);
        if generation {
            combinations.min(self.max_combinations.max(1))
        } else {
            combinations.min(1)
        }
    }
}

/// Policy for remote personal-token lookups on a cache miss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupPolicy {
    /// Total lookup rounds.
    pub attempts: u32,
    /// Fixed part of the delay between rounds.
    pub base_delay: Duration,
    /// Upper bound of the random extra delay added to `base_delay`.
    pub jitter: Duration,
}

impl Default for LookupPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(1000),
            jitter: Duration::from_millis(500),
        }
    }
}

impl LookupPolicy {
    /// No waiting between rounds.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            base_delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }
}

/// How the promoted user-selected server interacts with load shuffling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShuffleMode {
    /// Shuffle the whole list after promotion. Promotion only biases the
    /// pre-shuffle arrangement.
    #[default]
    Uniform,
    /// Keep a promoted server first and shuffle the remainder.
    PreferSelected,
}

impl std::str::FromStr for ShuffleMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uniform" => Ok(Self::Uniform),
            "prefer-selected" | "prefer_selected" => Ok(Self::PreferSelected),
            other => Err(ConfigError::InvalidValue {
                key: "shuffle".into(),
                value: other.into(),
            }),
        }
    }
}

/// Complete dispatcher configuration.
///
/// Custom `Debug` implementation redacts `store_api_key`.
#[derive(Clone)]
pub struct RelayConfig {
    /// Static proxy registry.
    pub servers: Vec<Url>,
    /// Registry subset reserved for the designated device class.
    pub designated_servers: Vec<Url>,
    /// Whether this runtime belongs to the designated device class.
    pub designated_device: bool,
    /// Endpoint forced under local development.
    pub local_endpoint: String,
    /// Hostnames that mark local development.
    pub dev_hostnames: Vec<String>,
    /// Ports that mark a local dev server.
    pub dev_ports: Vec<u16>,
    /// Per-request HTTP timeout in seconds.
    pub timeout_secs: u64,
    /// Combination loop policy.
    pub retry: RetryPolicy,
    /// Personal-token lookup policy.
    pub lookup: LookupPolicy,
    /// Number of shared tokens fetched when populating the pool.
    pub pool_size: usize,
    /// Slot reservation cooldown in seconds.
    pub slot_cooldown_secs: u64,
    /// Promotion/shuffle interaction.
    pub shuffle: ShuffleMode,
    /// Base URL of the remote profile/token store, if any.
    pub store_url: Option<Url>,
    /// API key for the remote store.
    pub store_api_key: Option<Zeroizing<String>>,
}

impl std::fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConfig")
            .field("servers", &self.servers)
            .field("designated_servers", &self.designated_servers)
            .field("designated_device", &self.designated_device)
            .field("local_endpoint", &self.local_endpoint)
            .field("dev_hostnames", &self.dev_hostnames)
            .field("dev_ports", &self.dev_ports)
            .field("timeout_secs", &self.timeout_secs)
            .field("retry", &self.retry)
            .field("lookup", &self.lookup)
            .field("pool_size", &self.pool_size)
            .field("slot_cooldown_secs", &self.slot_cooldown_secs)
            .field("shuffle", &self.shuffle)
            .field("store_url", &self.store_url)
            .field(
                "store_api_key",
                &self.store_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            servers: parse_static(DEFAULT_SERVERS),
            designated_servers: parse_static(DEFAULT_DESIGNATED_SERVERS),
            designated_device: false,
            local_endpoint: DEFAULT_LOCAL_ENDPOINT.to_string(),
            dev_hostnames: vec![
                "localhost".into(),
                "127.0.0.1".into(),
                "0.0.0.0".into(),
                "::1".into(),
            ],
            dev_ports: vec![5173, 3000],
            timeout_secs: 120,
            retry: RetryPolicy::default(),
            lookup: LookupPolicy::default(),
            pool_size: 20,
            slot_cooldown_secs: DEFAULT_SLOT_COOLDOWN_SECS,
            shuffle: ShuffleMode::Uniform,
            store_url: None,
            store_api_key: None,
        }
    }
}

/// On-disk shape of the YAML configuration. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    servers: Option<Vec<Url>>,
    designated_servers: Option<Vec<Url>>,
    designated_device: Option<bool>,
    local_endpoint: Option<Url>,
    dev_hostnames: Option<Vec<String>>,
    dev_ports: Option<Vec<u16>>,
    timeout_secs: Option<u64>,
    max_combinations: Option<u32>,
    generation_markers: Option<Vec<String>>,
    lookup_attempts: Option<u32>,
    lookup_delay_ms: Option<u64>,
    lookup_jitter_ms: Option<u64>,
    pool_size: Option<usize>,
    slot_cooldown_secs: Option<u64>,
    shuffle: Option<ShuffleMode>,
    store_url: Option<Url>,
    store_api_key: Option<String>,
}

impl RelayConfig {
    /// Load defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_yaml_file(p)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Defaults overridden by the process environment.
    ///
    /// Variables:
    /// - `GENRELAY_SERVERS` (comma-separated URLs)
    /// - `GENRELAY_DESIGNATED_SERVERS` (comma-separated URLs)
    /// - `GENRELAY_DESIGNATED_DEVICE` (`true`/`false`)
    /// - `GENRELAY_LOCAL_ENDPOINT` (default: `http://127.0.0.1:3001`)
    /// - `GENRELAY_DEV_PORTS` (comma-separated ports)
    /// - `GENRELAY_TIMEOUT_SECS` (default: 120)
    /// - `GENRELAY_MAX_COMBINATIONS` (default: 10)
    /// - `GENRELAY_POOL_SIZE` (default: 20)
    /// - `GENRELAY_SHUFFLE` (`uniform` or `prefer-selected`)
    /// - `GENRELAY_STORE_URL`, `GENRELAY_STORE_API_KEY`
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Defaults overridden by a YAML file.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_yaml_str(&raw).map_err(|e| match e {
            ConfigError::Yaml { reason, .. } => ConfigError::Yaml {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    /// Defaults overridden by YAML text.
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = if raw.trim().is_empty() {
            FileConfig::default()
        } else {
            serde_yaml::from_str(raw).map_err(|e| ConfigError::Yaml {
                path: "<inline>".into(),
                reason: e.to_string(),
            })?
        };
        let mut config = Self::default();
        config.merge_file(file);
        Ok(config)
    }

    fn merge_file(&mut self, file: FileConfig) {
        if let Some(v) = file.servers {
            self.servers = v;
        }
        if let Some(v) = file.designated_servers {
            self.designated_servers = v;
        }
        if let Some(v) = file.designated_device {
            self.designated_device = v;
        }
        if let Some(v) = file.local_endpoint {
            self.local_endpoint = v.to_string();
        }
        if let Some(v) = file.dev_hostnames {
            self.dev_hostnames = v;
        }
        if let Some(v) = file.dev_ports {
            self.dev_ports = v;
        }
        if let Some(v) = file.timeout_secs {
            self.timeout_secs = v;
        }
        if let Some(v) = file.max_combinations {
            self.retry.max_combinations = v;
        }
        if let Some(v) = file.generation_markers {
            self.retry.generation_markers = v;
        }
        if let Some(v) = file.lookup_attempts {
            self.lookup.attempts = v;
        }
        if let Some(v) = file.lookup_delay_ms {
            self.lookup.base_delay = Duration::from_millis(v);
        }
        if let Some(v) = file.lookup_jitter_ms {
            self.lookup.jitter = Duration::from_millis(v);
        }
        if let Some(v) = file.pool_size {
            self.pool_size = v;
        }
        if let Some(v) = file.slot_cooldown_secs {
            self.slot_cooldown_secs = v;
        }
        if let Some(v) = file.shuffle {
            self.shuffle = v;
        }
        if let Some(v) = file.store_url {
            self.store_url = Some(v);
        }
        if let Some(v) = file.store_api_key {
            self.store_api_key = Some(Zeroizing::new(v));
        }
    }

    /// Apply `GENRELAY_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("GENRELAY_SERVERS") {
            self.servers = url_list("GENRELAY_SERVERS", &v)?;
        }
        if let Some(v) = get("GENRELAY_DESIGNATED_SERVERS") {
            self.designated_servers = url_list("GENRELAY_DESIGNATED_SERVERS", &v)?;
        }
        if let Some(v) = get("GENRELAY_DESIGNATED_DEVICE") {
            self.designated_device = parse_value("GENRELAY_DESIGNATED_DEVICE", &v)?;
        }
        if let Some(v) = get("GENRELAY_LOCAL_ENDPOINT") {
            self.local_endpoint = parse_url("GENRELAY_LOCAL_ENDPOINT", &v)?.to_string();
        }
        if let Some(v) = get("GENRELAY_DEV_PORTS") {
            self.dev_ports = v
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| parse_value("GENRELAY_DEV_PORTS", p))
                .collect::<Result<_, _>>()?;
        }
        if let Some(v) = get("GENRELAY_TIMEOUT_SECS") {
            self.timeout_secs = parse_value("GENRELAY_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("GENRELAY_MAX_COMBINATIONS") {
            self.retry.max_combinations = parse_value("GENRELAY_MAX_COMBINATIONS", &v)?;
        }
        if let Some(v) = get("GENRELAY_POOL_SIZE") {
            self.pool_size = parse_value("GENRELAY_POOL_SIZE", &v)?;
        }
        if let Some(v) = get("GENRELAY_SHUFFLE") {
            self.shuffle = v.parse()?;
        }
        if let Some(v) = get("GENRELAY_STORE_URL") {
            self.store_url = Some(parse_url("GENRELAY_STORE_URL", &v)?);
        }
        if let Some(v) = get("GENRELAY_STORE_API_KEY") {
            self.store_api_key = Some(Zeroizing::new(v));
        }
        Ok(())
    }

    /// HTTP timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Slot cooldown as a `Duration`.
    pub fn slot_cooldown(&self) -> Duration {
        Duration::from_secs(self.slot_cooldown_secs)
    }

    /// Store URL and key, when both are configured.
    pub fn store_credentials(&self) -> Option<(&Url, &str)> {
        match (&self.store_url, &self.store_api_key) {
            (Some(url), Some(key)) if !key.is_empty() => Some((url, key.as_str())),
            _ => None,
        }
    }
}

fn parse_static(urls: &[&str]) -> Vec<Url> {
    urls.iter().filter_map(|u| Url::parse(u).ok()).collect()
}

fn parse_url(var: &str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::InvalidUrl(var.to_string(), e.to_string()))
}

fn url_list(var: &str, raw: &str) -> Result<Vec<Url>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse_url(var, s))
        .collect()
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid URL for {0}: {1}")]
    InvalidUrl(String, String),
    #[error("invalid value for {key}: \"{value}\"")]
    InvalidValue { key: String, value: String },
    #[error("cannot read config file {path}: {reason}")]
    Io { path: String, reason: String },
    #[error("invalid YAML in {path}: {reason}")]
    Yaml { path: String, reason: String },
}
