//! Harvest pipeline: one task per collector, each candidate validated and
//! merged inline on its collector's task.
//!
//! Failures are contained at the smallest scope:
//! - a candidate that fails validation or merge is logged and skipped
//! - a collector whose sequence faults (or whose task panics) stops, and
//!   only that collector stops
//!
//! [`Orchestrator::run`] waits for every task. There is no cancellation and
//! no global timeout; a collector that never ends stalls the run.

use std::sync::Arc;

use futures::future::join_all;
use futures::StreamExt;
use tracing::{error, info, warn};

use crate::catalog::{Catalog, MergeOutcome};
use crate::collector::{Collector, CollectorRegistry};
use crate::config::HarvestConfig;
use crate::database::ProxyDatabase;
use crate::error::Result;
use crate::proxy::{Candidate, HttpValidator, Validator};

/// Per-collector tally of one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectorReport {
    pub collector: String,
    pub inserted: usize,
    pub updated: usize,
    pub rejected: usize,
    /// Candidates skipped because validation or merge failed
    pub failed: usize,
    /// Why the collector stopped early, if it did
    pub fault: Option<String>,
}

impl CollectorReport {
    fn new(collector: &str) -> Self {
        Self {
            collector: collector.to_string(),
            ..Default::default()
        }
    }

    fn record(&mut self, outcome: MergeOutcome) {
        match outcome {
            MergeOutcome::Inserted => self.inserted += 1,
            MergeOutcome::Updated => self.updated += 1,
            MergeOutcome::Rejected => self.rejected += 1,
        }
    }

    /// Candidates this collector handed over, whatever became of them
    pub fn processed(&self) -> usize {
        self.inserted + self.updated + self.rejected + self.failed
    }
}

/// Outcome of one orchestrator run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub collectors: Vec<CollectorReport>,
}

impl RunReport {
    /// New entries across all collectors
    pub fn inserted(&self) -> usize {
        self.collectors.iter().map(|c| c.inserted).sum()
    }

    pub fn updated(&self) -> usize {
        self.collectors.iter().map(|c| c.updated).sum()
    }

    pub fn rejected(&self) -> usize {
        self.collectors.iter().map(|c| c.rejected).sum()
    }

    pub fn failed(&self) -> usize {
        self.collectors.iter().map(|c| c.failed).sum()
    }

    /// Collectors that stopped early
    pub fn faulted(&self) -> impl Iterator<Item = &CollectorReport> {
        self.collectors.iter().filter(|c| c.fault.is_some())
    }
}

/// Fans collectors out onto tasks and joins them
#[derive(Clone)]
pub struct Orchestrator {
    validator: Arc<dyn Validator>,
    catalog: Catalog,
}

impl Orchestrator {
    /// Validate with `validator` and merge into `catalog`
    pub fn new(validator: Arc<dyn Validator>, catalog: Catalog) -> Self {
        Self { validator, catalog }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Run every collector to completion. Reports come back in collector order.
    pub async fn run(&self, collectors: Vec<Arc<dyn Collector>>) -> RunReport {
        let names: Vec<String> = collectors.iter().map(|c| c.name().to_string()).collect();

        let handles: Vec<_> = collectors
            .into_iter()
            .map(|collector| {
                let validator = Arc::clone(&self.validator);
                let catalog = self.catalog.clone();
                tokio::spawn(async move { harvest_collector(collector, validator, catalog).await })
            })
            .collect();

        let results = join_all(handles).await;

        let collectors = names
            .iter()
            .zip(results)
            .map(|(name, result)| match result {
                Ok(report) => report,
                Err(join_error) => {
                    error!(collector = %name, error = %join_error, "collector task aborted");
                    CollectorReport {
                        fault: Some(format!("task aborted: {}", join_error)),
                        ..CollectorReport::new(name)
                    }
                }
            })
            .collect();

        RunReport { collectors }
    }
}

async fn harvest_collector(
    collector: Arc<dyn Collector>,
    validator: Arc<dyn Validator>,
    catalog: Catalog,
) -> CollectorReport {
    let mut report = CollectorReport::new(collector.name());
    info!(collector = %report.collector, "collector started");

    let mut candidates = collector.produce();
    while let Some(item) = candidates.next().await {
        let candidate = match item {
            Ok(candidate) => candidate,
            Err(e) => {
                error!(collector = %report.collector, error = %e, "collector failed");
                report.fault = Some(e.to_string());
                break;
            }
        };

        let proxy = candidate.to_string();
        match process_candidate(validator.as_ref(), &catalog, candidate).await {
            Ok(outcome) => report.record(outcome),
            Err(e) => {
                warn!(collector = %report.collector, proxy = %proxy, error = %e, "candidate skipped");
                report.failed += 1;
            }
        }
    }

    info!(
        collector = %report.collector,
        inserted = report.inserted,
        updated = report.updated,
        rejected = report.rejected,
        failed = report.failed,
        "collector finished"
    );
    report
}

async fn process_candidate(
    validator: &dyn Validator,
    catalog: &Catalog,
    candidate: Candidate,
) -> Result<MergeOutcome> {
    let record = validator.validate(candidate).await?;
    catalog.merge(&record).await
}

/// Configured collectors plus the orchestrator: one "run once" unit
pub struct Harvester {
    registry: CollectorRegistry,
    collectors: Vec<String>,
    orchestrator: Orchestrator,
}

impl Harvester {
    /// Run `collectors`, looked up in `registry`, through `orchestrator`
    pub fn new(registry: CollectorRegistry, collectors: Vec<String>, orchestrator: Orchestrator) -> Self {
        Self {
            registry,
            collectors,
            orchestrator,
        }
    }

    /// Wire up the real database, validator and registry from configuration.
    pub async fn from_config(config: &HarvestConfig) -> Result<Self> {
        let db = ProxyDatabase::connect(&config.database).await?;
        let catalog = Catalog::new(db, config.score);
        let validator = Arc::new(HttpValidator::new(config.validator.clone())?);

        Ok(Self::new(
            CollectorRegistry::with_config(config),
            config.collectors.clone(),
            Orchestrator::new(validator, catalog),
        ))
    }

    pub fn catalog(&self) -> &Catalog {
        self.orchestrator.catalog()
    }

    /// Every collector this harvester can resolve
    pub fn registry(&self) -> &CollectorRegistry {
        &self.registry
    }

    /// Resolve the configured collectors and run them. Only an unknown or
    /// unbuildable collector makes this fail; nothing runs in that case.
    pub async fn run_once(&self) -> Result<RunReport> {
        let collectors = self.registry.resolve(&self.collectors)?;
        if collectors.is_empty() {
            warn!("no collectors configured");
        }
        info!(collectors = collectors.len(), "harvest started");

        let report = self.orchestrator.run(collectors).await;
        info!(
            inserted = report.inserted(),
            updated = report.updated(),
            rejected = report.rejected(),
            failed = report.failed(),
            "harvest finished"
        );
        Ok(report)
    }
}
