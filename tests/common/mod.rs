//! Fakes shared by the integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use proxy_harvest::config::ScoreConfig;
use proxy_harvest::{
    Candidate, CandidateStream, Catalog, Collector, CollectorRegistry, EnrichedRecord, HarvestError,
    Harvester, Orchestrator, ProxyDatabase, ProxyType, Result, Validator,
};

pub const SCORES: ScoreConfig = ScoreConfig { max: 50, initial: 30 };

/// One item a scripted collector yields
#[derive(Debug, Clone)]
pub enum Step {
    Yield(&'static str, u16),
    Fault(&'static str),
}

/// Collector that yields a fixed script of candidates and faults
#[derive(Debug, Clone)]
pub struct ScriptedCollector {
    pub name: String,
    pub steps: Vec<Step>,
}

impl ScriptedCollector {
    pub fn new(name: &str, steps: Vec<Step>) -> Self {
        Self {
            name: name.to_string(),
            steps,
        }
    }
}

impl Collector for ScriptedCollector {
    fn name(&self) -> &str {
        &self.name
    }

    fn produce(&self) -> CandidateStream {
        let origin = self.name.clone();
        let items: Vec<Result<Candidate>> = self
            .steps
            .iter()
            .map(|step| match step {
                Step::Yield(address, port) => Ok(Candidate::new(*address, *port, ProxyType::Http, &origin)),
                Step::Fault(message) => Err(HarvestError::collector(&origin, *message)),
            })
            .collect();
        Box::pin(stream::iter(items))
    }
}

/// Collector whose `produce` panics
pub struct PanickingCollector;

impl Collector for PanickingCollector {
    fn name(&self) -> &str {
        "panicking"
    }

    fn produce(&self) -> CandidateStream {
        panic!("source layout changed");
    }
}

/// Validator answering from a table keyed by `(address, port, origin)`.
/// Unlisted candidates are invalid; listed addresses in `broken` error out.
#[derive(Default)]
pub struct TableValidator {
    speeds: HashMap<(String, u16, String), f64>,
    broken: HashSet<String>,
}

impl TableValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn speed(mut self, address: &str, port: u16, origin: &str, speed: f64) -> Self {
        self.speeds
            .insert((address.to_string(), port, origin.to_string()), speed);
        self
    }

    /// Same speed for every origin in `origins`
    pub fn speeds(mut self, address: &str, port: u16, origins: &[&str], speed: f64) -> Self {
        for origin in origins {
            self = self.speed(address, port, origin, speed);
        }
        self
    }

    pub fn broken(mut self, address: &str) -> Self {
        self.broken.insert(address.to_string());
        self
    }
}

#[async_trait]
impl Validator for TableValidator {
    async fn validate(&self, candidate: Candidate) -> Result<EnrichedRecord> {
        if self.broken.contains(&candidate.address) {
            return Err(HarvestError::Probe(format!("probe crashed on {}", candidate)));
        }
        let key = (candidate.address.clone(), candidate.port, candidate.origin.clone());
        Ok(match self.speeds.get(&key) {
            Some(speed) => EnrichedRecord::from_candidate(candidate, *speed),
            None => EnrichedRecord::invalid(candidate),
        })
    }
}

/// A catalog on a fresh in-memory database
pub async fn catalog() -> Catalog {
    Catalog::new(ProxyDatabase::in_memory().await.unwrap(), SCORES)
}

/// A harvester running `collectors` (in order) against `catalog`.
pub fn harvester(catalog: &Catalog, validator: TableValidator, collectors: Vec<ScriptedCollector>) -> Harvester {
    let mut registry = CollectorRegistry::new();
    let names = collectors.iter().map(|c| c.name.clone()).collect();
    for collector in collectors {
        registry.register(collector.name.clone(), move || {
            Ok(Arc::new(collector.clone()) as Arc<dyn Collector>)
        });
    }
    let orchestrator = Orchestrator::new(Arc::new(validator), catalog.clone());
    Harvester::new(registry, names, orchestrator)
}

/// Sorted `address:port` keys currently in the catalog
pub async fn keys(catalog: &Catalog) -> Vec<String> {
    let mut keys: Vec<String> = catalog
        .database()
        .list_proxies(i64::MAX)
        .await
        .unwrap()
        .iter()
        .map(|e| format!("{}:{}", e.address, e.port))
        .collect();
    keys.sort();
    keys
}
