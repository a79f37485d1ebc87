//! Harvester configuration.
//!
//! Loaded from a TOML file; every section is optional and falls back to the
//! defaults below. CLI flags override file values.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, Result};
use crate::proxy::ProxyType;

const DEFAULT_DATABASE_URL: &str = "sqlite://proxies.db";

/// Highest score an entry can hold; restored on every rediscovery.
pub const MAX_SCORE: i64 = 50;

/// Score given to a newly inserted entry.
pub const DEFAULT_INITIAL_SCORE: i64 = 50;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Collector identifiers to run, in order.
    #[serde(default = "default_collectors")]
    pub collectors: Vec<String>,

    #[serde(default)]
    pub score: ScoreConfig,

    #[serde(default)]
    pub validator: ValidatorConfig,

    #[serde(default)]
    pub collector: CollectorConfig,

    /// Extra list sources, each registered under its `name`.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            collectors: default_collectors(),
            score: ScoreConfig::default(),
            validator: ValidatorConfig::default(),
            collector: CollectorConfig::default(),
            sources: Vec::new(),
        }
    }
}

impl HarvestConfig {
    /// Load from `path`, or return defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    HarvestError::configuration(format!("cannot read {}: {}", path.display(), e))
                })?;
                Self::from_toml(&content)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.score.initial > self.score.max {
            return Err(HarvestError::configuration(format!(
                "score.initial ({}) exceeds score.max ({})",
                self.score.initial, self.score.max
            )));
        }
        self.database.validate()?;
        for source in &self.sources {
            if source.urls.is_empty() {
                return Err(HarvestError::configuration(format!(
                    "source `{}` has no urls",
                    source.name
                )));
            }
            if source.protocol == ProxyType::Socks4 {
                return Err(HarvestError::configuration(format!(
                    "source `{}`: socks4 proxies cannot be validated, use socks5",
                    source.name
                )));
            }
        }
        Ok(())
    }
}

fn default_collectors() -> Vec<String> {
    ["free-proxy-list", "sslproxies", "us-proxy", "socks-proxy"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// `[database]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Pool size. Must be 1: a second connection upgrading its deferred
    /// transaction to a write lock fails with SQLITE_BUSY.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_connections != 1 {
            return Err(HarvestError::configuration(format!(
                "database.max_connections must be 1 for SQLite, got {}",
                self.max_connections
            )));
        }
        Ok(())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_database_url() -> String {
    DEFAULT_DATABASE_URL.into()
}
fn default_max_connections() -> u32 {
    1
}

/// `[score]` section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreConfig {
    #[serde(default = "default_max_score")]
    pub max: i64,

    #[serde(default = "default_initial_score")]
    pub initial: i64,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            max: MAX_SCORE,
            initial: DEFAULT_INITIAL_SCORE,
        }
    }
}

fn default_max_score() -> i64 {
    MAX_SCORE
}
fn default_initial_score() -> i64 {
    DEFAULT_INITIAL_SCORE
}

/// `[validator]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    #[serde(default = "default_validator_timeout")]
    pub timeout_secs: u64,

    /// Echo endpoint probed over plain HTTP
    #[serde(default = "default_http_url")]
    pub http_url: String,

    /// Echo endpoint probed through a CONNECT tunnel
    #[serde(default = "default_https_url")]
    pub https_url: String,

    /// Endpoint reporting this host's public address
    #[serde(default = "default_ip_url")]
    pub ip_url: String,

    /// Optional MaxMind City database for area lookup
    #[serde(default)]
    pub mmdb_path: Option<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_validator_timeout(),
            http_url: default_http_url(),
            https_url: default_https_url(),
            ip_url: default_ip_url(),
            mmdb_path: None,
        }
    }
}

impl ValidatorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_validator_timeout() -> u64 {
    10
}
fn default_http_url() -> String {
    "http://httpbin.org/get".into()
}
fn default_https_url() -> String {
    "https://httpbin.org/get".into()
}
fn default_ip_url() -> String {
    "http://httpbin.org/ip".into()
}

/// `[collector]` section, shared by all web list collectors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    #[serde(default = "default_collector_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_collector_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl CollectorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_collector_timeout() -> u64 {
    30
}
fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.into()
}

/// One `[[sources]]` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,

    #[serde(default)]
    pub protocol: ProxyType,

    /// Pages to fetch in order; `file://` paths are read from disk.
    pub urls: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HarvestConfig::default();
        assert_eq!(config.database.url, DEFAULT_DATABASE_URL);
        assert_eq!(config.database.max_connections, 1);
        assert_eq!(config.score.max, MAX_SCORE);
        assert_eq!(config.score.initial, DEFAULT_INITIAL_SCORE);
        assert_eq!(config.collectors.len(), 4);
        assert_eq!(config.validator.timeout(), Duration::from_secs(10));
        assert!(config.sources.is_empty());
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        let config = HarvestConfig::from_toml("").unwrap();
        assert_eq!(config.collector.timeout_secs, 30);
        assert_eq!(config.validator.http_url, "http://httpbin.org/get");
    }

    #[test]
    fn test_parse_full_file() {
        let config = HarvestConfig::from_toml(
            r#"
collectors = ["mirror", "sslproxies"]

[database]
url = "sqlite::memory:"

[score]
max = 100
initial = 10

[validator]
timeout_secs = 3
mmdb_path = "/var/lib/GeoLite2-City.mmdb"

[[sources]]
name = "mirror"
protocol = "socks5"
urls = ["https://example.com/socks.txt", "file:///tmp/list.txt"]
"#,
        )
        .unwrap();

        assert_eq!(config.collectors, vec!["mirror", "sslproxies"]);
        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.score, ScoreConfig { max: 100, initial: 10 });
        assert_eq!(config.validator.timeout_secs, 3);
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].protocol, ProxyType::Socks5);
        assert_eq!(config.sources[0].urls.len(), 2);
    }

    #[test]
    fn test_initial_above_max_rejected() {
        let err = HarvestConfig::from_toml("[score]\nmax = 10\ninitial = 20\n").unwrap_err();
        assert!(matches!(err, HarvestError::Configuration { .. }));
    }

    #[test]
    fn test_source_without_urls_rejected() {
        let err = HarvestConfig::from_toml("[[sources]]\nname = \"empty\"\nurls = []\n").unwrap_err();
        assert!(matches!(err, HarvestError::Configuration { .. }));
    }

    #[test]
    fn test_concurrent_sqlite_writers_rejected() {
        for max_connections in [0, 4] {
            let toml = format!("[database]\nmax_connections = {}\n", max_connections);
            let err = HarvestConfig::from_toml(&toml).unwrap_err();
            assert!(matches!(err, HarvestError::Configuration { .. }));
        }
        assert!(HarvestConfig::from_toml("[database]\nmax_connections = 1\n").is_ok());
    }

    #[test]
    fn test_socks4_source_rejected() {
        let err = HarvestConfig::from_toml(
            "[[sources]]\nname = \"old\"\nprotocol = \"socks4\"\nurls = [\"https://example.com\"]\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("socks4"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harvest.toml");
        std::fs::write(&path, "collectors = [\"us-proxy\"]\n").unwrap();

        let config = HarvestConfig::load(Some(&path)).unwrap();
        assert_eq!(config.collectors, vec!["us-proxy"]);

        let missing = HarvestConfig::load(Some(&dir.path().join("missing.toml")));
        assert!(matches!(missing, Err(HarvestError::Configuration { .. })));
    }
}
