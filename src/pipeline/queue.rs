//! Durable processing queue and its worker pool.
//!
//! Jobs live in the `processing_jobs` table so a restart loses nothing: jobs
//! left `running` by a dead worker are requeued when the pool starts. Each
//! worker thread owns its own connection and polls for work.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use rusqlite::Connection;
use thiserror::Error;
use uuid::Uuid;

use crate::config::WorkerSettings;
use crate::db::{
    claim_next_job, enqueue_job, finish_job, open_database, record_failure, requeue_stale_jobs, DatabaseError,
};
use crate::models::enums::{FailureClass, JobStatus, SelectionPolicy};
use crate::pipeline::generation::{GenerationOutcome, SummaryOrchestrator};

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Failed to start worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Worker pool needs at least one worker")]
    NoWorkers,
}

const STORE_FAILURE_HINT: &str = "storage error";

/// Claim and run one queued job. Returns `false` when the queue was empty.
pub fn run_next_job(conn: &Connection, orchestrator: &SummaryOrchestrator) -> Result<bool, QueueError> {
    let Some(job) = claim_next_job(conn)? else {
        return Ok(false);
    };

    match orchestrator.generate(conn, &job.patient_id, job.policy) {
        Ok(GenerationOutcome::Processed(_)) => finish_job(conn, job.id, JobStatus::Done, None)?,
        Ok(GenerationOutcome::Failed { class, .. }) => {
            finish_job(conn, job.id, JobStatus::Failed, Some(class.as_str()))?
        }
        Err(e) => {
            tracing::error!(job_id = job.id, error = %e, "Job aborted on a store error");
            // The record must not stay pending with no failure class.
            if let Err(mark) = record_failure(conn, &job.patient_id, FailureClass::Transient, STORE_FAILURE_HINT) {
                tracing::warn!(job_id = job.id, error = %mark, "Could not mark patient as failed");
            }
            finish_job(conn, job.id, JobStatus::Failed, Some(&e.to_string()))?;
        }
    }
    Ok(true)
}

/// A fixed set of worker threads draining the job table.
///
/// Shutdown is cooperative: workers finish their current job and exit.
/// Dropping the pool requests shutdown and joins every worker.
pub struct WorkerPool {
    shutdown: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(
        database_path: &Path,
        orchestrator: Arc<SummaryOrchestrator>,
        settings: &WorkerSettings,
    ) -> Result<Self, QueueError> {
        if settings.workers == 0 {
            return Err(QueueError::NoWorkers);
        }

        let conn = open_database(database_path)?;
        let requeued = requeue_stale_jobs(&conn)?;
        if requeued > 0 {
            tracing::info!(requeued, "Requeued jobs interrupted by a previous shutdown");
        }
        drop(conn);

        let shutdown = Arc::new(AtomicBool::new(false));
        let mut pool = Self {
            shutdown: shutdown.clone(),
            handles: Vec::with_capacity(settings.workers),
        };

        for worker in 0..settings.workers {
            let flag = shutdown.clone();
            let orchestrator = orchestrator.clone();
            let path = database_path.to_path_buf();
            let poll_interval = settings.poll_interval;
            // On error `pool` drops here and joins the workers already started.
            let handle = std::thread::Builder::new()
                .name(format!("vaultmind-worker-{worker}"))
                .spawn(move || worker_loop(worker, &path, &orchestrator, poll_interval, &flag))?;
            pool.handles.push(handle);
        }

        tracing::info!(workers = settings.workers, "Worker pool started");
        Ok(pool)
    }

    /// Request shutdown without waiting.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.load(Ordering::Relaxed) && self.handles.iter().any(|h| !h.is_finished())
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    worker: usize,
    path: &Path,
    orchestrator: &SummaryOrchestrator,
    poll_interval: Duration,
    shutdown: &AtomicBool,
) {
    let conn = match open_database(path) {
        Ok(conn) => conn,
        Err(e) => {
            tracing::error!(worker, error = %e, "Worker could not open the database");
            return;
        }
    };

    while !shutdown.load(Ordering::Relaxed) {
        match run_next_job(&conn, orchestrator) {
            Ok(true) => continue,
            Ok(false) => std::thread::sleep(poll_interval),
            Err(e) => {
                tracing::warn!(worker, error = %e, "Worker iteration failed");
                std::thread::sleep(poll_interval);
            }
        }
    }
    tracing::debug!(worker, "Worker stopped");
}

// ═══════════════════════════════════════════
// Dispatcher
// ═══════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Queued { job_id: i64 },
    Completed(GenerationOutcome),
}

/// Routes a stored record to the worker pool when one is running, otherwise
/// runs generation on the caller's thread.
pub struct Dispatcher {
    orchestrator: Arc<SummaryOrchestrator>,
    pool: Option<WorkerPool>,
}

impl Dispatcher {
    pub fn inline(orchestrator: Arc<SummaryOrchestrator>) -> Self {
        Self {
            orchestrator,
            pool: None,
        }
    }

    pub fn with_pool(orchestrator: Arc<SummaryOrchestrator>, pool: WorkerPool) -> Self {
        Self {
            orchestrator,
            pool: Some(pool),
        }
    }

    pub fn is_queued(&self) -> bool {
        self.pool.as_ref().is_some_and(WorkerPool::is_running)
    }

    pub fn dispatch(
        &self,
        conn: &Connection,
        patient_id: &Uuid,
        policy: Option<SelectionPolicy>,
    ) -> Result<Dispatch, DatabaseError> {
        if self.is_queued() {
            match enqueue_job(conn, patient_id, policy) {
                Ok(job_id) => {
                    tracing::debug!(patient_id = %patient_id, job_id, "Summary generation queued");
                    return Ok(Dispatch::Queued { job_id });
                }
                Err(e) => tracing::warn!(error = %e, "Enqueue failed, generating inline"),
            }
        }
        self.orchestrator.generate(conn, patient_id, policy).map(Dispatch::Completed)
    }

    /// Stop the pool, if any. Later dispatches run inline.
    pub fn shutdown(&mut self) {
        if let Some(pool) = self.pool.take() {
            drop(pool);
            tracing::info!("Worker pool stopped");
        }
    }
}
