//! Collector registry and factory
//!
//! A collector is any source of proxy candidates. Collectors are looked up by
//! identifier in a [`CollectorRegistry`], which maps each identifier to a
//! constructor. Unknown identifiers are rejected before anything runs.

pub mod web;

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::stream::BoxStream;

use crate::config::HarvestConfig;
use crate::error::{HarvestError, Result};
use crate::proxy::Candidate;

pub use web::{ProxySource, WebListCollector};

/// Lazy, finite sequence of candidates. An `Err` item ends the sequence.
pub type CandidateStream = BoxStream<'static, Result<Candidate>>;

/// A source of proxy candidates
pub trait Collector: Send + Sync {
    /// Identifier stamped on every candidate as its origin
    fn name(&self) -> &str;

    fn produce(&self) -> CandidateStream;
}

/// Constructor registered under a collector identifier
pub type CollectorFactory = Box<dyn Fn() -> Result<Arc<dyn Collector>> + Send + Sync>;

/// Compile-time and config-time mapping from identifier to collector
#[derive(Default)]
pub struct CollectorRegistry {
    factories: BTreeMap<String, CollectorFactory>,
}

impl CollectorRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in sources plus every `[[sources]]` entry of `config`.
    pub fn with_config(config: &HarvestConfig) -> Self {
        let mut registry = Self::new();
        let sources = ProxySource::common_sources()
            .into_iter()
            .chain(config.sources.iter().map(ProxySource::from));

        for source in sources {
            let settings = config.collector.clone();
            let name = source.name.clone();
            registry.register(name, move || {
                let collector = WebListCollector::new(source.clone(), &settings)?;
                Ok(Arc::new(collector) as Arc<dyn Collector>)
            });
        }
        registry
    }

    /// Register `factory` under `name`, replacing any earlier registration.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<Arc<dyn Collector>> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.factories.insert(name.clone(), Box::new(factory)).is_some() {
            tracing::debug!(collector = %name, "collector registration replaced");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered identifiers, sorted
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Instantiate one collector per identifier, in order.
    ///
    /// Every identifier is checked before any collector is built, so an
    /// unknown one fails the whole resolution.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<Arc<dyn Collector>>> {
        if let Some(unknown) = names.iter().find(|name| !self.contains(name)) {
            return Err(HarvestError::configuration(format!(
                "unknown collector `{}` (known: {})",
                unknown,
                self.names().join(", ")
            )));
        }

        names
            .iter()
            .map(|name| {
                let factory = self
                    .factories
                    .get(name)
                    .ok_or_else(|| HarvestError::configuration(format!("unknown collector `{}`", name)))?;
                factory().map_err(|e| {
                    HarvestError::configuration(format!("cannot build collector `{}`: {}", name, e))
                })
            })
            .collect()
    }
}
