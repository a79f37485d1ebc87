//! SQLite persistence for the proxy catalog and harvest job records.
//!
//! Every write goes through a [`UnitOfWork`], a thin wrapper over a sqlx
//! transaction. Dropping a unit of work without calling
//! [`UnitOfWork::commit`] rolls it back and returns the connection to the
//! pool, so release happens on every exit path.

use std::collections::BTreeSet;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::jobs::{JobRecord, JobStatus};
use crate::proxy::{CatalogEntry, Score};

const SCHEMA: &[&str] = &[
    r#"
CREATE TABLE IF NOT EXISTS proxies (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    address          TEXT NOT NULL,
    port             INTEGER NOT NULL,
    protocol         TEXT NOT NULL,
    anonymity        TEXT NOT NULL,
    speed            REAL NOT NULL,
    area             TEXT,
    score            INTEGER NOT NULL,
    power            INTEGER NOT NULL,
    disabled_domains TEXT NOT NULL DEFAULT '[]',
    origin           TEXT NOT NULL,
    discovered_at    TEXT NOT NULL,
    created_at       TEXT NOT NULL,
    UNIQUE(address, port)
)"#,
    r#"
CREATE TABLE IF NOT EXISTS harvest_jobs (
    id           TEXT PRIMARY KEY,
    name         TEXT NOT NULL,
    harvest      INTEGER NOT NULL,
    status       TEXT NOT NULL,
    submitted_at TEXT NOT NULL,
    end_time     TEXT,
    error        TEXT
)"#,
    "CREATE INDEX IF NOT EXISTS idx_proxies_score ON proxies(score DESC, speed ASC)",
    "CREATE INDEX IF NOT EXISTS idx_harvest_jobs_submitted ON harvest_jobs(submitted_at DESC)",
];

const PROXY_COLUMNS: &str = "id, address, port, protocol, anonymity, speed, area, score, power, \
     disabled_domains, origin, discovered_at, created_at";

const JOB_COLUMNS: &str = "id, name, harvest, status, submitted_at, end_time, error";

/// Handle onto the harvester database. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ProxyDatabase {
    pool: SqlitePool,
}

impl ProxyDatabase {
    /// Open (creating if needed) the database at `url` with one connection.
    pub async fn new(url: &str) -> Result<Self> {
        Self::connect(&DatabaseConfig {
            url: url.to_string(),
            max_connections: 1,
        })
        .await
    }

    /// Open the configured database and apply the schema.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        config.validate()?;
        let options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);

        let pool = if is_memory_url(&config.url) {
            // Each in-memory connection is its own database; pin exactly one.
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(config.max_connections)
                .connect_with(options)
                .await?
        };

        let db = Self { pool };
        db.migrate().await?;
        tracing::debug!(url = %config.url, "database ready");
        Ok(db)
    }

    /// A private in-memory database.
    pub async fn in_memory() -> Result<Self> {
        Self::new("sqlite::memory:").await
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Acquire a scoped unit of work.
    pub async fn begin(&self) -> Result<UnitOfWork> {
        Ok(UnitOfWork {
            tx: self.pool.begin().await?,
        })
    }

    /// Number of catalog entries
    pub async fn count_proxies(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM proxies")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Catalog entries, best score then fastest first.
    pub async fn list_proxies(&self, limit: i64) -> Result<Vec<CatalogEntry>> {
        let sql = format!(
            "SELECT {} FROM proxies ORDER BY score DESC, speed ASC, id ASC LIMIT ?",
            PROXY_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?;
        rows.iter().map(entry_from_row).collect()
    }

    /// Job records, newest first.
    pub async fn list_jobs(&self, limit: i64) -> Result<Vec<JobRecord>> {
        let sql = format!(
            "SELECT {} FROM harvest_jobs ORDER BY submitted_at DESC LIMIT ?",
            JOB_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?;
        rows.iter().map(job_from_row).collect()
    }

    /// Look up a job by id outside any unit of work
    pub async fn find_job(&self, id: &str) -> Result<Option<JobRecord>> {
        let mut uow = self.begin().await?;
        uow.find_job(id).await
    }
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// One short-lived transaction against the store
pub struct UnitOfWork {
    tx: Transaction<'static, Sqlite>,
}

impl UnitOfWork {
    /// The entry keyed by `(address, port)`, if any
    pub async fn find_proxy(&mut self, address: &str, port: u16) -> Result<Option<CatalogEntry>> {
        let sql = format!(
            "SELECT {} FROM proxies WHERE address = ? AND port = ?",
            PROXY_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(address)
            .bind(port)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(entry_from_row).transpose()
    }

    /// Insert a new entry and return its row id. Fails with a unique
    /// violation if `(address, port)` already exists.
    pub async fn insert_proxy(&mut self, entry: &CatalogEntry) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO proxies (address, port, protocol, anonymity, speed, area, score, power,
                                 disabled_domains, origin, discovered_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.address)
        .bind(entry.port)
        .bind(entry.protocol.to_string())
        .bind(entry.anonymity.to_string())
        .bind(entry.speed)
        .bind(&entry.area)
        .bind(entry.score.score)
        .bind(entry.score.power)
        .bind(serde_json::to_string(&entry.disabled_domains)?)
        .bind(&entry.origin)
        .bind(entry.discovered_at)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Overwrite every mutable column of the entry keyed by `(address, port)`.
    /// `created_at` is never touched.
    pub async fn update_proxy(&mut self, entry: &CatalogEntry) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE proxies
            SET protocol = ?, anonymity = ?, speed = ?, area = ?, score = ?, power = ?,
                disabled_domains = ?, origin = ?, discovered_at = ?
            WHERE address = ? AND port = ?
            "#,
        )
        .bind(entry.protocol.to_string())
        .bind(entry.anonymity.to_string())
        .bind(entry.speed)
        .bind(&entry.area)
        .bind(entry.score.score)
        .bind(entry.score.power)
        .bind(serde_json::to_string(&entry.disabled_domains)?)
        .bind(&entry.origin)
        .bind(entry.discovered_at)
        .bind(&entry.address)
        .bind(entry.port)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    /// Catalog size as seen inside this transaction
    pub async fn count_proxies(&mut self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM proxies")
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(count)
    }

    /// Record a new job row
    pub async fn insert_job(&mut self, job: &JobRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO harvest_jobs (id, name, harvest, status, submitted_at, end_time, error)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.name)
        .bind(job.harvest)
        .bind(job.status.as_str())
        .bind(job.submitted_at)
        .bind(job.end_time)
        .bind(&job.error)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    /// Look up a job by id
    pub async fn find_job(&mut self, id: &str) -> Result<Option<JobRecord>> {
        let sql = format!("SELECT {} FROM harvest_jobs WHERE id = ?", JOB_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    /// Persist status, harvest, end time and error of a job
    pub async fn update_job(&mut self, job: &JobRecord) -> Result<()> {
        sqlx::query(
            "UPDATE harvest_jobs SET harvest = ?, status = ?, end_time = ?, error = ? WHERE id = ?",
        )
        .bind(job.harvest)
        .bind(job.status.as_str())
        .bind(job.end_time)
        .bind(&job.error)
        .bind(&job.id)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    /// Make every write of this unit of work visible
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

fn entry_from_row(row: &SqliteRow) -> Result<CatalogEntry> {
    let protocol: String = row.try_get("protocol")?;
    let anonymity: String = row.try_get("anonymity")?;
    let disabled_domains: String = row.try_get("disabled_domains")?;

    Ok(CatalogEntry {
        id: row.try_get("id")?,
        address: row.try_get("address")?,
        port: row.try_get("port")?,
        protocol: protocol.parse()?,
        anonymity: anonymity.parse()?,
        speed: row.try_get("speed")?,
        area: row.try_get("area")?,
        score: Score {
            score: row.try_get("score")?,
            power: row.try_get("power")?,
        },
        disabled_domains: serde_json::from_str::<BTreeSet<String>>(&disabled_domains)?,
        origin: row.try_get("origin")?,
        discovered_at: row.try_get("discovered_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn job_from_row(row: &SqliteRow) -> Result<JobRecord> {
    let status: String = row.try_get("status")?;

    Ok(JobRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        harvest: row.try_get("harvest")?,
        status: status.parse::<JobStatus>()?,
        submitted_at: row.try_get("submitted_at")?,
        end_time: row.try_get("end_time")?,
        error: row.try_get("error")?,
    })
}
