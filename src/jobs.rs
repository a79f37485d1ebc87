//! Tracked harvest jobs.
//!
//! A job moves `pending → success | failure` exactly once. [`JobTracker`] is
//! the only writer of job status: [`JobTracker::submit`] records the pending
//! job and starts the run, and the completion task calls
//! [`JobTracker::on_success`] or [`JobTracker::on_failure`] when the run ends.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::database::ProxyDatabase;
use crate::error::{HarvestError, Result};
use crate::harvest::Harvester;

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Success,
    Failure,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Success => "success",
            JobStatus::Failure => "failure",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "success" => Ok(JobStatus::Success),
            "failure" => Ok(JobStatus::Failure),
            _ => Err(HarvestError::configuration(format!("invalid job status: {}", s))),
        }
    }
}

/// One row per harvest run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub name: String,
    /// Catalog size at submission while pending; net entries gained once
    /// finished.
    pub harvest: i64,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Failure message of a failed run
    pub error: Option<String>,
}

impl JobRecord {
    pub fn pending(name: &str, baseline: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            harvest: baseline,
            status: JobStatus::Pending,
            submitted_at: Utc::now(),
            end_time: None,
            error: None,
        }
    }
}

/// A submitted job. Dropping the handle does not stop the job.
pub struct JobHandle {
    id: String,
    completion: JoinHandle<Result<JobRecord>>,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the job to be finalized and return its final record.
    pub async fn wait(self) -> Result<JobRecord> {
        self.completion
            .await
            .map_err(|e| HarvestError::RunInfrastructure(e.to_string()))?
    }
}

/// Runs harvests as tracked jobs
#[derive(Clone)]
pub struct JobTracker {
    db: ProxyDatabase,
    harvester: Arc<Harvester>,
}

impl JobTracker {
    pub fn new(harvester: Arc<Harvester>) -> Self {
        let db = harvester.catalog().database().clone();
        Self { db, harvester }
    }

    /// Record a pending job and start the harvest without waiting for it.
    ///
    /// The record is committed before the run starts, so the completion
    /// callback always finds it.
    pub async fn submit(&self, name: &str) -> Result<JobHandle> {
        let baseline = self.harvester.catalog().count().await?;
        let job = JobRecord::pending(name, baseline);

        let mut uow = self.db.begin().await?;
        uow.insert_job(&job).await?;
        uow.commit().await?;
        info!(job_id = %job.id, name, baseline, "job submitted");

        let harvester = Arc::clone(&self.harvester);
        let run = tokio::spawn(async move { harvester.run_once().await });

        let tracker = self.clone();
        let job_id = job.id.clone();
        let completion = tokio::spawn(async move {
            let finalized = match run.await {
                Ok(Ok(_report)) => tracker.on_success(&job_id).await,
                Ok(Err(e)) => tracker.on_failure(&job_id, &e).await,
                Err(join_error) => {
                    let e = HarvestError::RunInfrastructure(join_error.to_string());
                    tracker.on_failure(&job_id, &e).await
                }
            };
            if let Err(e) = &finalized {
                error!(job_id = %job_id, error = %e, "cannot finalize job");
            }
            finalized
        });

        Ok(JobHandle {
            id: job.id,
            completion,
        })
    }

    /// Submit a job every `period` until `shutdown` resolves, handing each
    /// finished record to `on_finished`.
    ///
    /// A job that cannot be submitted or finalized is logged and the schedule
    /// carries on. `shutdown` is honoured while a job is still running; that
    /// job is left pending.
    pub async fn schedule<S, F>(&self, name: &str, period: Duration, shutdown: S, mut on_finished: F)
    where
        S: Future,
        F: FnMut(&JobRecord),
    {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }

            let handle = match self.submit(name).await {
                Ok(handle) => handle,
                Err(e) => {
                    error!(job_name = name, error = %e, "cannot submit scheduled job");
                    continue;
                }
            };
            let job_id = handle.id().to_string();

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    warn!(job_id = %job_id, "schedule stopped with a job still running");
                    break;
                }
                finished = handle.wait() => match finished {
                    Ok(job) => on_finished(&job),
                    Err(e) => error!(job_id = %job_id, error = %e, "scheduled job not finalized"),
                },
            }
        }
        info!(job_name = name, "schedule stopped");
    }

    /// The run finished without an unrecovered error.
    pub async fn on_success(&self, job_id: &str) -> Result<JobRecord> {
        self.finalize(job_id, JobStatus::Success, None).await
    }

    /// The run itself failed.
    pub async fn on_failure(&self, job_id: &str, error: &HarvestError) -> Result<JobRecord> {
        self.finalize(job_id, JobStatus::Failure, Some(error.to_string()))
            .await
    }

    pub async fn find(&self, job_id: &str) -> Result<Option<JobRecord>> {
        self.db.find_job(job_id).await
    }

    async fn finalize(&self, job_id: &str, status: JobStatus, failure: Option<String>) -> Result<JobRecord> {
        let mut uow = self.db.begin().await?;
        let mut job = uow
            .find_job(job_id)
            .await?
            .ok_or_else(|| HarvestError::JobNotFound(job_id.to_string()))?;

        if job.status.is_terminal() {
            warn!(job_id, status = %job.status, "job already finalized");
            return Ok(job);
        }

        let count = uow.count_proxies().await?;
        job.harvest = count - job.harvest;
        job.status = status;
        job.end_time = Some(Utc::now());
        job.error = failure;

        uow.update_job(&job).await?;
        uow.commit().await?;

        match status {
            JobStatus::Failure => error!(
                job_id,
                harvest = job.harvest,
                error = job.error.as_deref().unwrap_or_default(),
                "job failed"
            ),
            _ => info!(job_id, harvest = job.harvest, "job succeeded"),
        }
        Ok(job)
    }
}
