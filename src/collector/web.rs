//! Collector for proxy list pages on the web
//!
//! Pages are fetched one at a time as the candidate stream is polled, so a
//! slow or broken page only delays or ends this collector.

use crate::collector::{CandidateStream, Collector};
use crate::config::{CollectorConfig, SourceConfig};
use crate::error::{HarvestError, Result};
use crate::proxy::{Candidate, ProxyParser, ProxyType};
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::Client;

/// A website (or local file) that publishes proxy lists
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySource {
    /// Collector identifier
    pub name: String,
    /// Pages to fetch, in order
    pub urls: Vec<String>,
    /// Protocol guessed for every candidate on these pages
    pub protocol: ProxyType,
}

impl ProxySource {
    pub fn new(name: &str, urls: &[&str], protocol: ProxyType) -> Self {
        Self {
            name: name.to_string(),
            urls: urls.iter().map(|u| u.to_string()).collect(),
            protocol,
        }
    }

    /// Common free proxy list sites
    pub fn common_sources() -> Vec<ProxySource> {
        vec![
            ProxySource::new(
                "free-proxy-list",
                &["https://free-proxy-list.net/"],
                ProxyType::Http,
            ),
            ProxySource::new("sslproxies", &["https://www.sslproxies.org/"], ProxyType::Https),
            ProxySource::new("us-proxy", &["https://www.us-proxy.org/"], ProxyType::Http),
            // Lists both versions; only SOCKS5 entries can be probed.
            ProxySource::new(
                "socks-proxy",
                &["https://www.socks-proxy.net/"],
                ProxyType::Socks5,
            ),
        ]
    }
}

impl From<&SourceConfig> for ProxySource {
    fn from(config: &SourceConfig) -> Self {
        Self {
            name: config.name.clone(),
            urls: config.urls.clone(),
            protocol: config.protocol,
        }
    }
}

/// Collector that walks the pages of one [`ProxySource`]
pub struct WebListCollector {
    source: ProxySource,
    client: Client,
}

impl WebListCollector {
    pub fn new(source: ProxySource, config: &CollectorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self { source, client })
    }

    pub fn source(&self) -> &ProxySource {
        &self.source
    }
}

impl Collector for WebListCollector {
    fn name(&self) -> &str {
        &self.source.name
    }

    fn produce(&self) -> CandidateStream {
        let client = self.client.clone();
        let origin = self.source.name.clone();
        let protocol = self.source.protocol;

        stream::iter(self.source.urls.clone())
            .then(move |url| {
                let client = client.clone();
                let origin = origin.clone();
                async move {
                    fetch_page(&client, &url, protocol, &origin)
                        .await
                        .map_err(|e| HarvestError::collector(&origin, format!("{}: {}", url, e)))
                }
            })
            .map_ok(|candidates| stream::iter(candidates.into_iter().map(Ok::<_, HarvestError>)))
            .try_flatten()
            .boxed()
    }
}

/// Fetch one page and parse its candidates. `file://` URLs are read from disk.
async fn fetch_page(client: &Client, url: &str, protocol: ProxyType, origin: &str) -> Result<Vec<Candidate>> {
    let content = match url.strip_prefix("file://") {
        Some(path) => tokio::fs::read_to_string(path).await?,
        None => {
            client
                .get(url)
                .send()
                .await?
                .error_for_status()?
                .text()
                .await?
        }
    };

    let candidates = ProxyParser::parse_page(&content, protocol, origin);
    tracing::debug!(collector = origin, url, found = candidates.len(), "fetched proxy list page");
    Ok(candidates)
}
