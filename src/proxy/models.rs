//! Proxy data models

use crate::error::HarvestError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Speed value marking a candidate as unreachable or invalid.
pub const INVALID_SPEED: f64 = -1.0;

/// Proxy type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    #[default]
    Http,
    Https,
    Socks4,
    Socks5,
}

impl ProxyType {
    pub fn is_socks(&self) -> bool {
        matches!(self, ProxyType::Socks4 | ProxyType::Socks5)
    }
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyType::Http => write!(f, "http"),
            ProxyType::Https => write!(f, "https"),
            ProxyType::Socks4 => write!(f, "socks4"),
            ProxyType::Socks5 => write!(f, "socks5"),
        }
    }
}

impl FromStr for ProxyType {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" => Ok(ProxyType::Http),
            "https" => Ok(ProxyType::Https),
            "socks4" => Ok(ProxyType::Socks4),
            "socks5" => Ok(ProxyType::Socks5),
            _ => Err(HarvestError::configuration(format!(
                "invalid proxy type: {}. Use: http, https, socks4, socks5",
                s
            ))),
        }
    }
}

/// How much of the client a proxy reveals to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Anonymity {
    /// Neither the client address nor the presence of a proxy is visible
    Elite,
    /// The proxy announces itself but hides the client address
    Anonymous,
    /// The client address is forwarded
    Transparent,
    #[default]
    Unknown,
}

impl fmt::Display for Anonymity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anonymity::Elite => write!(f, "elite"),
            Anonymity::Anonymous => write!(f, "anonymous"),
            Anonymity::Transparent => write!(f, "transparent"),
            Anonymity::Unknown => write!(f, "unknown"),
        }
    }
}

impl FromStr for Anonymity {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "elite" => Ok(Anonymity::Elite),
            "anonymous" => Ok(Anonymity::Anonymous),
            "transparent" => Ok(Anonymity::Transparent),
            "unknown" => Ok(Anonymity::Unknown),
            _ => Err(HarvestError::configuration(format!(
                "invalid anonymity level: {}",
                s
            ))),
        }
    }
}

/// Raw, unvalidated proxy descriptor produced by a collector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub address: String,
    pub port: u16,
    /// Protocol as guessed by the source
    pub protocol: ProxyType,
    /// Identifier of the collector that produced it
    pub origin: String,
}

impl Candidate {
    pub fn new(address: impl Into<String>, port: u16, protocol: ProxyType, origin: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port,
            protocol,
            origin: origin.into(),
        }
    }

    /// Get the proxy URL string
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.address, self.port)
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Composite freshness metric. `power` counts decay steps since the last
/// rediscovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub score: i64,
    pub power: i64,
}

impl Score {
    pub fn new(score: i64) -> Self {
        Self { score, power: 0 }
    }
}

/// A candidate annotated with its validation outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub address: String,
    pub port: u16,
    pub protocol: ProxyType,
    pub anonymity: Anonymity,
    /// Response time in seconds, or [`INVALID_SPEED`]
    pub speed: f64,
    pub area: Option<String>,
    pub score: Score,
    /// Domains on which this proxy is known to fail
    pub disabled_domains: BTreeSet<String>,
    pub origin: String,
    pub discovered_at: DateTime<Utc>,
}

impl EnrichedRecord {
    /// Wrap a candidate with a measured speed and neutral defaults.
    pub fn from_candidate(candidate: Candidate, speed: f64) -> Self {
        Self {
            address: candidate.address,
            port: candidate.port,
            protocol: candidate.protocol,
            anonymity: Anonymity::Unknown,
            speed,
            area: None,
            score: Score::new(0),
            disabled_domains: BTreeSet::new(),
            origin: candidate.origin,
            discovered_at: Utc::now(),
        }
    }

    /// A record for a candidate that failed validation.
    pub fn invalid(candidate: Candidate) -> Self {
        Self::from_candidate(candidate, INVALID_SPEED)
    }

    pub fn with_anonymity(mut self, anonymity: Anonymity) -> Self {
        self.anonymity = anonymity;
        self
    }

    pub fn with_protocol(mut self, protocol: ProxyType) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_area(mut self, area: Option<String>) -> Self {
        self.area = area;
        self
    }

    pub fn is_valid(&self) -> bool {
        self.speed != INVALID_SPEED
    }
}

/// Persisted form of a proxy, unique per `(address, port)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: i64,
    pub address: String,
    pub port: u16,
    pub protocol: ProxyType,
    pub anonymity: Anonymity,
    pub speed: f64,
    pub area: Option<String>,
    pub score: Score,
    pub disabled_domains: BTreeSet<String>,
    pub origin: String,
    /// Last time the proxy was seen by a collector
    pub discovered_at: DateTime<Utc>,
    /// Set once on insert
    pub created_at: DateTime<Utc>,
}

impl CatalogEntry {
    /// Build a not-yet-persisted entry from a validated record.
    pub fn from_record(record: &EnrichedRecord, score: Score, created_at: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            address: record.address.clone(),
            port: record.port,
            protocol: record.protocol,
            anonymity: record.anonymity,
            speed: record.speed,
            area: record.area.clone(),
            score,
            disabled_domains: record.disabled_domains.clone(),
            origin: record.origin.clone(),
            discovered_at: record.discovered_at,
            created_at,
        }
    }

    /// Overwrite the mutable fields from a rediscovered record.
    pub fn refresh_from(&mut self, record: &EnrichedRecord, score: Score) {
        self.protocol = record.protocol;
        self.anonymity = record.anonymity;
        self.speed = record.speed;
        self.area = record.area.clone();
        self.disabled_domains = record.disabled_domains.clone();
        self.origin = record.origin.clone();
        self.discovered_at = record.discovered_at;
        self.score = score;
    }
}

impl fmt::Display for CatalogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol, self.address, self.port)
    }
}
