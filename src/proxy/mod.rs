//! Proxy module for parsing and validating proxies
//!
//! This module provides functionality for:
//! - The candidate, enriched record and catalog entry models
//! - Parsing proxy list pages into candidates
//! - Validating candidates through real requests
//! - Looking up the area of a proxy address

pub mod checker;
pub mod geo;
pub mod models;
pub mod parser;

pub use checker::{HttpValidator, Validator};
pub use geo::GeoLocator;
pub use models::{
    Anonymity, Candidate, CatalogEntry, EnrichedRecord, ProxyType, Score, INVALID_SPEED,
};
pub use parser::ProxyParser;
