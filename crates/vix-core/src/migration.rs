//! Batched copy of one collection into another.
//!
//! A job streams pages from the source session and writes each page to the
//! target as one batch. Per-item write failures are counted and the job
//! continues; a failed read or write, or either connection leaving
//! `Connected`, fails the job. There is no rollback: batches already written
//! stay in the target.
//!
//! ```text
//! Pending ──worker starts──▶ Running ──▶ Completed | Failed | Cancelled
//!    │
//!    └──cancel──▶ Cancelled
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use uuid::Uuid;

use vix_db::{CollectionDescriptor, Cursor, ItemFailure, QueryError, WriteMode};

use crate::config::MigrationConfig;
use crate::connection::{ConnectionId, ConnectionState, InstanceError};
use crate::constants::{MAX_BATCH_SIZE, MAX_RECORDED_FAILURES};
use crate::errors::{lock_poisoned, VixError, VixResult};
use crate::events::{Event, EventBus};
use crate::manager::{ConnectionManager, ManagedSession};
use crate::worker::{TaskHandle, WorkerPool};

// ============================================================================
// Types
// ============================================================================

/// Migration job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    fn generate() -> Self {
        JobId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for compact display.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        JobId(s.to_string())
    }
}

/// Lifecycle state of a migration job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl MigrationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationState::Pending => "pending",
            MigrationState::Running => "running",
            MigrationState::Completed => "completed",
            MigrationState::Failed => "failed",
            MigrationState::Cancelled => "cancelled",
        }
    }

    /// Whether the job has finished.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MigrationState::Completed | MigrationState::Failed | MigrationState::Cancelled
        )
    }
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What to copy and how. Unset options take the configured defaults.
#[derive(Debug, Clone)]
pub struct MigrationRequest {
    pub source: ConnectionId,
    pub source_collection: String,
    pub target: ConnectionId,
    pub target_collection: String,
    pub batch_size: Option<usize>,
    pub include_vectors: Option<bool>,
    pub write_mode: Option<WriteMode>,
    pub create_missing_target: Option<bool>,
}

impl MigrationRequest {
    pub fn new(
        source: ConnectionId,
        source_collection: impl Into<String>,
        target: ConnectionId,
        target_collection: impl Into<String>,
    ) -> Self {
        Self {
            source,
            source_collection: source_collection.into(),
            target,
            target_collection: target_collection.into(),
            batch_size: None,
            include_vectors: None,
            write_mode: None,
            create_missing_target: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_vectors(mut self, include: bool) -> Self {
        self.include_vectors = Some(include);
        self
    }

    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.write_mode = Some(mode);
        self
    }

    pub fn with_create_missing_target(mut self, create: bool) -> Self {
        self.create_missing_target = Some(create);
        self
    }
}

/// Snapshot of a tracked job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationJob {
    pub id: JobId,
    pub source: ConnectionId,
    pub source_collection: String,
    pub target: ConnectionId,
    pub target_collection: String,
    pub batch_size: usize,
    pub include_vectors: bool,
    pub write_mode: WriteMode,
    pub create_missing_target: bool,
    pub state: MigrationState,
    pub items_read: u64,
    pub items_copied: u64,
    pub items_failed: u64,
    pub batches: u64,
    pub cancel_requested: bool,
    pub first_error: Option<InstanceError>,
    /// First per-item failures, capped.
    pub failures: Vec<ItemFailure>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Final report of a job.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationSummary {
    pub job: JobId,
    pub state: MigrationState,
    pub items_read: u64,
    pub items_copied: u64,
    pub items_failed: u64,
    pub batches: u64,
    pub first_error: Option<InstanceError>,
    pub failures: Vec<ItemFailure>,
    pub elapsed: Duration,
}

impl MigrationSummary {
    fn from_job(job: &MigrationJob, elapsed: Duration) -> Self {
        Self {
            job: job.id.clone(),
            state: job.state,
            items_read: job.items_read,
            items_copied: job.items_copied,
            items_failed: job.items_failed,
            batches: job.batches,
            first_error: job.first_error.clone(),
            failures: job.failures.clone(),
            elapsed,
        }
    }
}

// ============================================================================
// MigrationHandle
// ============================================================================

/// Handle to a started job.
#[derive(Debug)]
pub struct MigrationHandle {
    id: JobId,
    task: TaskHandle<MigrationSummary>,
    engine: MigrationEngine,
}

impl MigrationHandle {
    pub fn id(&self) -> &JobId {
        &self.id
    }

    /// Current snapshot of the job.
    pub fn job(&self) -> VixResult<MigrationJob> {
        self.engine.job(&self.id)
    }

    /// Request cancellation.
    pub fn cancel(&self) -> VixResult<bool> {
        self.engine.cancel_migration(&self.id)
    }

    /// Block until the job is terminal.
    pub fn wait(self) -> VixResult<MigrationSummary> {
        self.task.wait()
    }
}

// ============================================================================
// MigrationEngine
// ============================================================================

struct JobSlot {
    job: MigrationJob,
    cancel: Arc<AtomicBool>,
}

struct EngineInner {
    manager: ConnectionManager,
    workers: WorkerPool,
    events: EventBus,
    defaults: MigrationConfig,
    jobs: RwLock<HashMap<JobId, JobSlot>>,
}

/// Runs migration jobs between managed connections.
#[derive(Clone)]
pub struct MigrationEngine {
    inner: Arc<EngineInner>,
}

impl fmt::Debug for MigrationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationEngine")
            .field("defaults", &self.inner.defaults)
            .finish()
    }
}

impl MigrationEngine {
    pub fn new(
        manager: ConnectionManager,
        workers: WorkerPool,
        events: EventBus,
        defaults: MigrationConfig,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                manager,
                workers,
                events,
                defaults,
                jobs: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Validate `request` and queue the job on a worker.
    ///
    /// Both connections must be `Connected` now; the remaining checks run on
    /// the worker and fail the job instead of this call.
    pub fn start_migration(&self, request: MigrationRequest) -> VixResult<MigrationHandle> {
        let defaults = &self.inner.defaults;
        let batch_size = request.batch_size.unwrap_or(defaults.batch_size);
        if batch_size == 0 || batch_size > MAX_BATCH_SIZE {
            return Err(VixError::InvalidArgument(format!(
                "Batch size must be between 1 and {}",
                MAX_BATCH_SIZE
            )));
        }
        if request.source_collection.trim().is_empty() || request.target_collection.trim().is_empty()
        {
            return Err(VixError::InvalidArgument(
                "Source and target collections must be named".to_string(),
            ));
        }
        if request.source == request.target && request.source_collection == request.target_collection
        {
            return Err(VixError::InvalidArgument(
                "Source and target are the same collection".to_string(),
            ));
        }
        for id in [&request.source, &request.target] {
            let state = self.inner.manager.state_of(id)?;
            if state != ConnectionState::Connected {
                return Err(VixError::NotConnected {
                    id: id.to_string(),
                    state,
                });
            }
        }

        let job = MigrationJob {
            id: JobId::generate(),
            source: request.source,
            source_collection: request.source_collection,
            target: request.target,
            target_collection: request.target_collection,
            batch_size,
            include_vectors: request.include_vectors.unwrap_or(defaults.include_vectors),
            write_mode: request.write_mode.unwrap_or(defaults.write_mode),
            create_missing_target: request
                .create_missing_target
                .unwrap_or(defaults.create_missing_target),
            state: MigrationState::Pending,
            items_read: 0,
            items_copied: 0,
            items_failed: 0,
            batches: 0,
            cancel_requested: false,
            first_error: None,
            failures: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        let id = job.id.clone();
        debug!(
            "Queued migration {} ({} -> {})",
            id, job.source_collection, job.target_collection
        );

        self.inner.write_jobs()?.insert(
            id.clone(),
            JobSlot {
                job,
                cancel: Arc::new(AtomicBool::new(false)),
            },
        );

        let inner = Arc::clone(&self.inner);
        let job_id = id.clone();
        let task = self
            .inner
            .workers
            .submit(format!("migrate {}", id.short()), move || inner.run(&job_id));

        Ok(MigrationHandle {
            id,
            task,
            engine: self.clone(),
        })
    }

    /// Request cancellation. Returns `false` if the job already finished.
    ///
    /// A pending job is cancelled at once; a running one finishes the batch
    /// in flight, if any, and writes no further batch.
    pub fn cancel_migration(&self, id: &JobId) -> VixResult<bool> {
        let finished = {
            let mut jobs = self.inner.write_jobs()?;
            let slot = jobs
                .get_mut(id)
                .ok_or_else(|| VixError::MigrationNotFound(id.to_string()))?;
            match slot.job.state {
                MigrationState::Pending => {
                    slot.job.state = MigrationState::Cancelled;
                    slot.job.cancel_requested = true;
                    slot.job.finished_at = Some(Utc::now());
                    true
                }
                MigrationState::Running => {
                    slot.job.cancel_requested = true;
                    slot.cancel.store(true, Ordering::SeqCst);
                    false
                }
                _ => return Ok(false),
            }
        };

        info!("Cancellation requested for migration {}", id);
        if finished {
            self.inner.events.publish(Event::MigrationFinished {
                job: id.clone(),
                state: MigrationState::Cancelled,
            });
        }
        Ok(true)
    }

    /// Snapshot of a job.
    pub fn job(&self, id: &JobId) -> VixResult<MigrationJob> {
        self.inner
            .read_jobs()?
            .get(id)
            .map(|slot| slot.job.clone())
            .ok_or_else(|| VixError::MigrationNotFound(id.to_string()))
    }

    /// Snapshots of every tracked job, oldest first.
    pub fn jobs(&self) -> VixResult<Vec<MigrationJob>> {
        let mut jobs: Vec<MigrationJob> = self
            .inner
            .read_jobs()?
            .values()
            .map(|slot| slot.job.clone())
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }

    /// Stop tracking a finished job.
    pub fn acknowledge(&self, id: &JobId) -> VixResult<()> {
        let mut jobs = self.inner.write_jobs()?;
        let slot = jobs
            .get(id)
            .ok_or_else(|| VixError::MigrationNotFound(id.to_string()))?;
        if !slot.job.state.is_terminal() {
            return Err(VixError::InvalidArgument(format!(
                "Migration {} is still {}",
                id, slot.job.state
            )));
        }
        jobs.remove(id);
        Ok(())
    }
}

// ============================================================================
// Job execution
// ============================================================================

/// Why a running job stopped early.
enum Stop {
    Cancelled,
    Failed(VixError),
}

impl From<VixError> for Stop {
    fn from(err: VixError) -> Self {
        Stop::Failed(err)
    }
}

impl EngineInner {
    fn read_jobs(&self) -> VixResult<std::sync::RwLockReadGuard<'_, HashMap<JobId, JobSlot>>> {
        self.jobs.read().map_err(lock_poisoned)
    }

    fn write_jobs(&self) -> VixResult<std::sync::RwLockWriteGuard<'_, HashMap<JobId, JobSlot>>> {
        self.jobs.write().map_err(lock_poisoned)
    }

    fn with_job<T>(&self, id: &JobId, f: impl FnOnce(&mut JobSlot) -> T) -> VixResult<T> {
        let mut jobs = self.write_jobs()?;
        let slot = jobs
            .get_mut(id)
            .ok_or_else(|| VixError::MigrationNotFound(id.to_string()))?;
        Ok(f(slot))
    }

    fn run(&self, id: &JobId) -> VixResult<MigrationSummary> {
        let started = Instant::now();

        // Pending -> Running, unless cancelled while queued.
        let (job, cancel) = self.with_job(id, |slot| {
            if slot.job.state == MigrationState::Pending {
                slot.job.state = MigrationState::Running;
                slot.job.started_at = Some(Utc::now());
            }
            (slot.job.clone(), Arc::clone(&slot.cancel))
        })?;
        if job.state != MigrationState::Running {
            debug!("Migration {} was {} before it started", id, job.state);
            return Ok(MigrationSummary::from_job(&job, started.elapsed()));
        }

        info!(
            "Migration {} started: {} -> {}",
            id, job.source_collection, job.target_collection
        );
        self.events.publish(Event::MigrationStarted { job: id.clone() });

        let outcome = self.execute(&job, &cancel);
        let (state, error) = match outcome {
            Ok(()) => (MigrationState::Completed, None),
            Err(Stop::Cancelled) => (MigrationState::Cancelled, None),
            Err(Stop::Failed(err)) => (MigrationState::Failed, Some(InstanceError::from(&err))),
        };

        let finished = self.with_job(id, |slot| {
            slot.job.state = state;
            slot.job.finished_at = Some(Utc::now());
            if slot.job.first_error.is_none() {
                slot.job.first_error = error;
            }
            slot.job.clone()
        })?;

        match &finished.first_error {
            Some(err) => warn!("Migration {} {}: {}", id, state, err),
            None => info!(
                "Migration {} {}: {} copied, {} failed",
                id, state, finished.items_copied, finished.items_failed
            ),
        }
        self.events.publish(Event::MigrationFinished {
            job: id.clone(),
            state,
        });
        Ok(MigrationSummary::from_job(&finished, started.elapsed()))
    }

    fn execute(&self, job: &MigrationJob, cancel: &AtomicBool) -> Result<(), Stop> {
        let source = self.manager.session(&job.source)?;
        let target = self.manager.session(&job.target)?;
        self.preflight(job, &source, &target)?;

        let mut cursor: Option<Cursor> = None;
        let mut batch: u64 = 0;
        loop {
            // Before the first batch too: a cancel during preflight writes nothing.
            if cancel.load(Ordering::SeqCst) {
                return Err(Stop::Cancelled);
            }
            self.ensure_connected(job)?;

            let page = source.read_page(
                &job.source_collection,
                cursor.as_ref(),
                job.batch_size,
                job.include_vectors,
            )?;
            let read = page.items.len();

            let (copied, failures) = if read == 0 {
                (0, Vec::new())
            } else {
                let outcome = target.write_batch(&job.target_collection, &page.items, job.write_mode)?;
                let mut failures = outcome.failures;
                failures.truncate(read);
                let copied = outcome.written.min(read - failures.len());
                (copied, failures)
            };
            batch += 1;

            let progress = self.with_job(&job.id, |slot| {
                let j = &mut slot.job;
                j.batches = batch;
                j.items_read += read as u64;
                j.items_copied += copied as u64;
                j.items_failed += failures.len() as u64;
                let room = MAX_RECORDED_FAILURES.saturating_sub(j.failures.len());
                j.failures.extend(failures.iter().take(room).cloned());
                Event::MigrationProgress {
                    job: j.id.clone(),
                    batch,
                    items_read: j.items_read,
                    items_copied: j.items_copied,
                    items_failed: j.items_failed,
                }
            })?;
            if !failures.is_empty() {
                debug!(
                    "Migration {} batch {}: {} items rejected",
                    job.id,
                    batch,
                    failures.len()
                );
            }
            self.events.publish(progress);

            if cancel.load(Ordering::SeqCst) {
                return Err(Stop::Cancelled);
            }
            let next = match page.next_cursor {
                Some(next) if !page.end_of_data => next,
                _ => return Ok(()),
            };
            if read == 0 && cursor.as_ref() == Some(&next) {
                warn!("Migration {}: source returned an empty page without advancing", job.id);
                return Ok(());
            }
            cursor = Some(next);
        }
    }

    fn ensure_connected(&self, job: &MigrationJob) -> VixResult<()> {
        for (role, id) in [("source", &job.source), ("target", &job.target)] {
            let state = self
                .manager
                .state_of(id)
                .unwrap_or(ConnectionState::Disconnected);
            if state != ConnectionState::Connected {
                return Err(VixError::NotConnected {
                    id: format!("{} {}", role, id),
                    state,
                });
            }
        }
        Ok(())
    }

    /// Check that the target can take the source's items, creating it when
    /// allowed.
    fn preflight(
        &self,
        job: &MigrationJob,
        source: &ManagedSession,
        target: &ManagedSession,
    ) -> VixResult<()> {
        let from = source.describe_collection(&job.source_collection)?;
        let to = match target.describe_collection(&job.target_collection) {
            Ok(descriptor) => descriptor,
            Err(VixError::Query(QueryError::CollectionNotFound { .. }))
                if job.create_missing_target =>
            {
                if !target.capabilities().create_collection {
                    return Err(VixError::InvalidArgument(format!(
                        "Target collection '{}' does not exist and {} cannot create collections",
                        job.target_collection,
                        target.provider()
                    )));
                }
                info!(
                    "Creating target collection '{}' (dimension {:?}, {})",
                    job.target_collection, from.dimension, from.metric
                );
                target.create_collection(&job.target_collection, from.dimension, from.metric)?
            }
            Err(e) => return Err(e),
        };

        if job.write_mode == WriteMode::InsertOnly && !target.capabilities().insert_only_writes {
            return Err(VixError::InvalidArgument(format!(
                "{} does not support insert-only writes; use upsert",
                target.provider()
            )));
        }
        check_schema(job, &from, &to)
    }
}

fn check_schema(
    job: &MigrationJob,
    from: &CollectionDescriptor,
    to: &CollectionDescriptor,
) -> VixResult<()> {
    if job.include_vectors {
        if let (Some(a), Some(b)) = (from.dimension, to.dimension) {
            if a != b {
                return Err(VixError::InvalidArgument(format!(
                    "Dimension mismatch: '{}' has {}, '{}' has {}",
                    from.name, a, to.name, b
                )));
            }
        }
    }
    if from.metric != to.metric {
        warn!(
            "Distance metric differs: '{}' uses {}, '{}' uses {}",
            from.name, from.metric, to.name, to.metric
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vix_db::DistanceMetric;

    fn job(include_vectors: bool) -> MigrationJob {
        MigrationJob {
            id: JobId::from("j"),
            source: ConnectionId::from("s"),
            source_collection: "a".into(),
            target: ConnectionId::from("t"),
            target_collection: "b".into(),
            batch_size: 10,
            include_vectors,
            write_mode: WriteMode::Upsert,
            create_missing_target: true,
            state: MigrationState::Running,
            items_read: 0,
            items_copied: 0,
            items_failed: 0,
            batches: 0,
            cancel_requested: false,
            first_error: None,
            failures: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(!MigrationState::Pending.is_terminal());
        assert!(!MigrationState::Running.is_terminal());
        assert!(MigrationState::Completed.is_terminal());
        assert!(MigrationState::Failed.is_terminal());
        assert!(MigrationState::Cancelled.is_terminal());
    }

    #[test]
    fn test_schema_dimension_check() {
        let from = CollectionDescriptor::new("a").with_dimension(3);
        let to = CollectionDescriptor::new("b").with_dimension(4);
        assert!(check_schema(&job(true), &from, &to).is_err());
        // Without vectors the dimension does not matter.
        assert!(check_schema(&job(false), &from, &to).is_ok());
    }

    #[test]
    fn test_schema_metric_mismatch_only_warns() {
        let from = CollectionDescriptor::new("a").with_metric(DistanceMetric::Cosine);
        let to = CollectionDescriptor::new("b").with_metric(DistanceMetric::L2);
        assert!(check_schema(&job(true), &from, &to).is_ok());
    }
}
