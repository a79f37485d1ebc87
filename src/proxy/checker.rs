//! Proxy validation: probes a candidate and enriches it with speed,
//! anonymity, protocol and area

use crate::config::ValidatorConfig;
use crate::error::{HarvestError, Result};
use crate::proxy::geo::GeoLocator;
use crate::proxy::models::{Anonymity, Candidate, EnrichedRecord, ProxyType};
use async_trait::async_trait;
use reqwest::{Client, Proxy as ReqwestProxy};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;

/// Headers a proxy adds when it announces itself
const PROXY_REVEALING_HEADERS: &[&str] = &[
    "via",
    "proxy-connection",
    "x-forwarded-for",
    "x-real-ip",
    "forwarded",
];

/// Turns a candidate into an enriched record.
///
/// Unreachable proxies are not errors: they come back with
/// [`INVALID_SPEED`](crate::proxy::INVALID_SPEED). An `Err` means the
/// probing infrastructure itself failed.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, candidate: Candidate) -> Result<EnrichedRecord>;
}

/// Body returned by httpbin-style echo endpoints
#[derive(Debug, Clone, Deserialize)]
struct Echo {
    origin: String,
    #[serde(default)]
    headers: HashMap<String, String>,
}

struct ProbeResult {
    elapsed: Duration,
    echo: Echo,
}

/// Validator that sends real requests through the candidate
pub struct HttpValidator {
    config: ValidatorConfig,
    direct: Client,
    geo_locator: Option<GeoLocator>,
    public_ip: OnceCell<String>,
}

impl HttpValidator {
    pub fn new(config: ValidatorConfig) -> Result<Self> {
        let geo_locator = config
            .mmdb_path
            .as_ref()
            .map(GeoLocator::from_path)
            .transpose()?;

        let direct = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            config,
            direct,
            geo_locator,
            public_ip: OnceCell::new(),
        })
    }

    /// This host's public address, looked up once.
    async fn public_ip(&self) -> Result<&str> {
        let ip = self
            .public_ip
            .get_or_try_init(|| async {
                let echo: Echo = self
                    .direct
                    .get(&self.config.ip_url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| HarvestError::Probe(format!("cannot determine public address: {}", e)))?
                    .json()
                    .await
                    .map_err(|e| HarvestError::Probe(format!("unexpected address response: {}", e)))?;
                tracing::debug!(public_ip = %echo.origin, "resolved public address");
                Ok::<_, HarvestError>(echo.origin)
            })
            .await?;
        Ok(ip.as_str())
    }

    async fn probe(&self, client: &Client, candidate: &Candidate, url: &str) -> Option<ProbeResult> {
        let start = Instant::now();
        let response = match tokio::time::timeout(self.config.timeout(), client.get(url).send()).await {
            Ok(Ok(response)) if response.status().is_success() => response,
            Ok(Ok(response)) => {
                tracing::trace!(proxy = %candidate, status = %response.status(), "probe rejected");
                return None;
            }
            Ok(Err(e)) => {
                tracing::trace!(proxy = %candidate, error = %e, "probe failed");
                return None;
            }
            Err(_) => {
                tracing::trace!(proxy = %candidate, "probe timed out");
                return None;
            }
        };

        let echo = response.json::<Echo>().await.ok()?;
        Some(ProbeResult {
            elapsed: start.elapsed(),
            echo,
        })
    }

    /// Create a reqwest client routed through the candidate.
    ///
    /// The HTTP client only speaks SOCKS5, so a SOCKS4 candidate cannot be
    /// probed at all; that is a `Probe` error, not an unreachable proxy.
    fn create_client(&self, candidate: &Candidate, scheme: ProxyType) -> Result<Client> {
        let reqwest_proxy = match candidate.protocol {
            ProxyType::Socks4 => {
                return Err(HarvestError::Probe(format!(
                    "cannot probe {}: socks4 is not supported",
                    candidate
                )))
            }
            ProxyType::Socks5 => ReqwestProxy::all(candidate.url()),
            ProxyType::Http | ProxyType::Https => {
                let proxy_url = format!("http://{}:{}", candidate.address, candidate.port);
                match scheme {
                    ProxyType::Https => ReqwestProxy::https(proxy_url),
                    _ => ReqwestProxy::http(proxy_url),
                }
            }
        }
        .map_err(|e| HarvestError::Probe(format!("cannot route through {}: {}", candidate, e)))?;

        Client::builder()
            .proxy(reqwest_proxy)
            .timeout(self.config.timeout())
            .build()
            .map_err(|e| HarvestError::Probe(format!("cannot build client for {}: {}", candidate, e)))
    }
}

#[async_trait]
impl Validator for HttpValidator {
    async fn validate(&self, candidate: Candidate) -> Result<EnrichedRecord> {
        let public_ip = self.public_ip().await?.to_string();

        let http_client = self.create_client(&candidate, ProxyType::Http)?;
        let https_client = self.create_client(&candidate, ProxyType::Https)?;

        let http = self.probe(&http_client, &candidate, &self.config.http_url).await;
        let https = self.probe(&https_client, &candidate, &self.config.https_url).await;

        let protocol = resolve_protocol(candidate.protocol, http.is_some(), https.is_some());
        let Some(probe) = http.or(https) else {
            return Ok(EnrichedRecord::invalid(candidate));
        };

        let anonymity = classify_anonymity(&probe.echo.origin, &probe.echo.headers, &public_ip);
        let area = self
            .geo_locator
            .as_ref()
            .and_then(|geo| geo.area(&candidate.address));

        Ok(EnrichedRecord::from_candidate(candidate, round_speed(probe.elapsed))
            .with_protocol(protocol)
            .with_anonymity(anonymity)
            .with_area(area))
    }
}

/// Protocol after probing. SOCKS guesses are kept as-is.
pub fn resolve_protocol(guess: ProxyType, http_ok: bool, https_ok: bool) -> ProxyType {
    if guess.is_socks() {
        return guess;
    }
    match (http_ok, https_ok) {
        (_, true) => ProxyType::Https,
        (true, false) => ProxyType::Http,
        (false, false) => guess,
    }
}

/// Classify what a target sees through the proxy.
pub fn classify_anonymity(origin: &str, headers: &HashMap<String, String>, public_ip: &str) -> Anonymity {
    if !public_ip.is_empty() && origin.contains(public_ip) {
        return Anonymity::Transparent;
    }
    let announces_proxy = headers
        .keys()
        .any(|name| PROXY_REVEALING_HEADERS.contains(&name.to_lowercase().as_str()));
    if announces_proxy {
        Anonymity::Anonymous
    } else {
        Anonymity::Elite
    }
}

/// Seconds with two decimals.
pub fn round_speed(elapsed: Duration) -> f64 {
    let speed = (elapsed.as_secs_f64() * 100.0).round() / 100.0;
    // A sub-5ms probe must not read as zero.
    if speed <= 0.0 {
        0.01
    } else {
        speed
    }
}
