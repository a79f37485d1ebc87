//! Proxy Harvest - concurrent proxy harvester
//!
//! Collects proxy candidates from many independent sources, validates each
//! one and keeps a de-duplicated, scored catalog of working proxies. Runs can
//! be tracked as jobs with a persisted outcome.

pub mod catalog;
pub mod collector;
pub mod config;
pub mod database;
pub mod error;
pub mod harvest;
pub mod jobs;
pub mod proxy;

pub use catalog::{Catalog, MergeOutcome};
pub use collector::{CandidateStream, Collector, CollectorRegistry};
pub use config::HarvestConfig;
pub use database::ProxyDatabase;
pub use error::{HarvestError, Result};
pub use harvest::{CollectorReport, Harvester, Orchestrator, RunReport};
pub use jobs::{JobHandle, JobRecord, JobStatus, JobTracker};
pub use proxy::*;
