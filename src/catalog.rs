//! Merge/upsert of validated records into the persisted catalog.
//!
//! Every merge runs in its own unit of work. Two collectors racing on the
//! same `(address, port)` can both see no entry; the store's unique key
//! rejects the second insert, which is then applied as an update.

use chrono::Utc;
use tracing::{debug, info};

use crate::config::ScoreConfig;
use crate::database::{ProxyDatabase, UnitOfWork};
use crate::error::{HarvestError, Result};
use crate::proxy::{CatalogEntry, EnrichedRecord, Score};

/// What a merge did to the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Updated,
    /// The record carried the invalid speed; nothing was written
    Rejected,
}

/// Owner of catalog identity and mutation rules. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Catalog {
    db: ProxyDatabase,
    score: ScoreConfig,
}

impl Catalog {
    /// A catalog over `db`, scoring entries with `score`
    pub fn new(db: ProxyDatabase, score: ScoreConfig) -> Self {
        Self { db, score }
    }

    /// The underlying store, for read-only listings
    pub fn database(&self) -> &ProxyDatabase {
        &self.db
    }

    /// Number of entries in the catalog
    pub async fn count(&self) -> Result<i64> {
        self.db.count_proxies().await
    }

    /// Fold one validated record into the catalog.
    ///
    /// Invalid records are rejected untouched, unknown keys are inserted at
    /// the initial score, and known keys are refreshed with their score
    /// reset to the maximum. `created_at` of an existing entry never changes.
    pub async fn merge(&self, record: &EnrichedRecord) -> Result<MergeOutcome> {
        if !record.is_valid() {
            debug!(address = %record.address, port = record.port, origin = %record.origin, "invalid proxy rejected");
            return Ok(MergeOutcome::Rejected);
        }

        let mut uow = self.db.begin().await?;
        let existing = uow.find_proxy(&record.address, record.port).await?;
        match existing {
            Some(existing) => self.refresh(uow, existing, record).await,
            None => self.insert(uow, record).await,
        }
    }

    async fn insert(&self, uow: UnitOfWork, record: &EnrichedRecord) -> Result<MergeOutcome> {
        let entry = CatalogEntry::from_record(record, Score::new(self.score.initial), Utc::now());

        match insert_and_commit(uow, &entry).await {
            Ok(()) => {
                info!(address = %record.address, port = record.port, origin = %record.origin, "inserted");
                Ok(MergeOutcome::Inserted)
            }
            Err(e) if e.is_unique_violation() => {
                debug!(address = %record.address, port = record.port, "lost insert race, applying as update");
                self.update_existing(record).await
            }
            Err(e) => Err(e),
        }
    }

    async fn update_existing(&self, record: &EnrichedRecord) -> Result<MergeOutcome> {
        let mut uow = self.db.begin().await?;
        let existing = uow
            .find_proxy(&record.address, record.port)
            .await?
            .ok_or(HarvestError::Database(sqlx::Error::RowNotFound))?;
        self.refresh(uow, existing, record).await
    }

    /// Rediscovery: overwrite mutable fields and reset decay.
    async fn refresh(
        &self,
        mut uow: UnitOfWork,
        mut existing: CatalogEntry,
        record: &EnrichedRecord,
    ) -> Result<MergeOutcome> {
        existing.refresh_from(record, Score::new(self.score.max));
        uow.update_proxy(&existing).await?;
        uow.commit().await?;

        info!(address = %record.address, port = record.port, origin = %record.origin, "already known, updated");
        Ok(MergeOutcome::Updated)
    }
}

async fn insert_and_commit(mut uow: UnitOfWork, entry: &CatalogEntry) -> Result<()> {
    uow.insert_proxy(entry).await?;
    uow.commit().await
}
