//! Collection backups as JSON Lines files.
//!
//! The first line of a backup is a [`BackupHeader`]; every following line is
//! one [`Record`]. A backup pages through a live session and a restore writes
//! through `create_collection` and `write_batch`, so a collection backed up
//! from one provider can be restored into any other.
//!
//! ```text
//! docs_backup_20260101_120000.jsonl
//!   {"formatVersion":1,"collection":{"name":"docs",...},"itemCount":2,...}
//!   {"id":"a","vector":[0.1,0.2],"metadata":{}}
//!   {"id":"b","vector":[0.3,0.4],"metadata":{}}
//! ```

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use vix_db::{
    BatchOutcome, CollectionDescriptor, Cursor, DistanceMetric, ItemFailure, ProviderKind,
    QueryError, Record, WriteMode,
};

use crate::config::MigrationConfig;
use crate::connection::ConnectionId;
use crate::constants::{
    BACKUP_FILE_EXTENSION, BACKUP_FORMAT_VERSION, MAX_BATCH_SIZE, MAX_RECORDED_FAILURES,
};
use crate::errors::{VixError, VixResult};
use crate::manager::{ConnectionManager, ManagedSession};
use crate::worker::{TaskHandle, WorkerPool};

// ============================================================================
// Types
// ============================================================================

/// First line of a backup file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupHeader {
    pub format_version: u32,
    /// The collection as it was described at backup time, with the number of
    /// items actually written.
    pub collection: CollectionDescriptor,
    pub provider: ProviderKind,
    pub created_at: DateTime<Utc>,
    pub item_count: u64,
    pub include_vectors: bool,
}

/// A backup file found by [`list_backups`].
#[derive(Debug, Clone, PartialEq)]
pub struct BackupEntry {
    pub path: PathBuf,
    pub header: BackupHeader,
    pub size_bytes: u64,
}

/// What to back up and where.
#[derive(Debug, Clone)]
pub struct BackupRequest {
    pub connection: ConnectionId,
    pub collection: String,
    /// Directory receiving the file; created if missing.
    pub directory: PathBuf,
    pub include_vectors: bool,
    pub batch_size: Option<usize>,
}

impl BackupRequest {
    pub fn new(
        connection: ConnectionId,
        collection: impl Into<String>,
        directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            connection,
            collection: collection.into(),
            directory: directory.into(),
            include_vectors: true,
            batch_size: None,
        }
    }

    pub fn with_vectors(mut self, include: bool) -> Self {
        self.include_vectors = include;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }
}

/// Which backup to restore, into which collection.
#[derive(Debug, Clone)]
pub struct RestoreRequest {
    pub connection: ConnectionId,
    pub path: PathBuf,
    /// Target name; the backed-up collection's name when `None`.
    pub collection: Option<String>,
    /// Replace an existing collection of the same name.
    pub overwrite: bool,
    pub include_vectors: bool,
    pub batch_size: Option<usize>,
    pub write_mode: Option<WriteMode>,
}

impl RestoreRequest {
    pub fn new(connection: ConnectionId, path: impl Into<PathBuf>) -> Self {
        Self {
            connection,
            path: path.into(),
            collection: None,
            overwrite: false,
            include_vectors: true,
            batch_size: None,
            write_mode: None,
        }
    }

    pub fn with_collection(mut self, name: impl Into<String>) -> Self {
        self.collection = Some(name.into());
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_vectors(mut self, include: bool) -> Self {
        self.include_vectors = include;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.write_mode = Some(mode);
        self
    }
}

/// Result of a finished backup.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupSummary {
    pub path: PathBuf,
    pub header: BackupHeader,
    pub batches: u64,
    pub elapsed: Duration,
}

/// Result of a finished restore.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestoreSummary {
    pub collection: String,
    /// An existing collection was deleted first.
    pub replaced: bool,
    pub items_read: u64,
    pub items_restored: u64,
    pub items_failed: u64,
    /// First per-item failures, capped.
    pub failures: Vec<ItemFailure>,
    pub batches: u64,
    pub elapsed: Duration,
}

impl RestoreSummary {
    /// Count one written batch of `read` records.
    ///
    /// Failures beyond the batch size are dropped, and `written` is capped so
    /// that restored plus failed never exceeds read.
    fn absorb(&mut self, read: usize, outcome: BatchOutcome) {
        let mut failures = outcome.failures;
        failures.truncate(read);
        let restored = outcome.written.min(read - failures.len());

        self.batches += 1;
        self.items_read += read as u64;
        self.items_restored += restored as u64;
        self.items_failed += failures.len() as u64;
        let room = MAX_RECORDED_FAILURES.saturating_sub(self.failures.len());
        self.failures.extend(failures.into_iter().take(room));
    }
}

// ============================================================================
// BackupService
// ============================================================================

/// Runs backups and restores on the worker pool.
#[derive(Clone)]
pub struct BackupService {
    manager: ConnectionManager,
    workers: WorkerPool,
    defaults: MigrationConfig,
}

impl std::fmt::Debug for BackupService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupService")
            .field("defaults", &self.defaults)
            .finish()
    }
}

impl BackupService {
    /// Batch size and write mode default to the migration settings.
    pub fn new(manager: ConnectionManager, workers: WorkerPool, defaults: MigrationConfig) -> Self {
        Self {
            manager,
            workers,
            defaults,
        }
    }

    /// Queue a backup of one collection.
    ///
    /// The connection must be `Connected` now. An empty collection fails the
    /// task without leaving a file behind.
    pub fn backup(&self, request: BackupRequest) -> VixResult<TaskHandle<BackupSummary>> {
        let batch_size = self.batch_size(request.batch_size)?;
        if request.collection.trim().is_empty() {
            return Err(VixError::InvalidArgument(
                "Collection to back up must be named".to_string(),
            ));
        }
        let session = self.manager.session(&request.connection)?;
        let name = format!("backup {}", request.collection);
        Ok(self
            .workers
            .submit(name, move || write_backup(&session, &request, batch_size)))
    }

    /// Queue a restore of a backup file.
    ///
    /// The whole file is checked before the target is touched; a malformed
    /// line fails the task with nothing written.
    pub fn restore(&self, request: RestoreRequest) -> VixResult<TaskHandle<RestoreSummary>> {
        let batch_size = self.batch_size(request.batch_size)?;
        let write_mode = request.write_mode.unwrap_or(self.defaults.write_mode);
        let session = self.manager.session(&request.connection)?;
        let name = format!("restore {}", request.path.display());
        Ok(self.workers.submit(name, move || {
            restore_backup(&session, &request, batch_size, write_mode)
        }))
    }

    fn batch_size(&self, requested: Option<usize>) -> VixResult<usize> {
        let batch_size = requested.unwrap_or(self.defaults.batch_size);
        if batch_size == 0 || batch_size > MAX_BATCH_SIZE {
            return Err(VixError::InvalidArgument(format!(
                "Batch size must be between 1 and {}",
                MAX_BATCH_SIZE
            )));
        }
        Ok(batch_size)
    }
}

// ============================================================================
// Reading backups
// ============================================================================

/// Read and check the header line of a backup file.
pub fn read_header(path: &Path) -> VixResult<BackupHeader> {
    open_backup(path).map(|(header, _)| header)
}

/// Backup files in `dir`, newest first.
///
/// Files whose header cannot be read are skipped; a missing directory holds
/// no backups.
pub fn list_backups(dir: &Path) -> VixResult<Vec<BackupEntry>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(dir).map_err(|e| backup_io(dir, e))?;

    let mut backups = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| backup_io(dir, e))?.path();
        if !is_backup_file(&path) {
            continue;
        }
        match read_header(&path) {
            Ok(header) => {
                let size_bytes = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                backups.push(BackupEntry {
                    path,
                    header,
                    size_bytes,
                });
            }
            Err(e) => debug!("Skipping {}: {}", path.display(), e),
        }
    }
    backups.sort_by(|a, b| b.header.created_at.cmp(&a.header.created_at));
    Ok(backups)
}

fn is_backup_file(path: &Path) -> bool {
    let named = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.contains("_backup_"));
    named && path.extension().and_then(|e| e.to_str()) == Some(BACKUP_FILE_EXTENSION)
}

/// Record lines following the header, parsed lazily.
struct RecordLines {
    path: PathBuf,
    lines: io::Lines<BufReader<File>>,
    line: usize,
}

impl Iterator for RecordLines {
    type Item = VixResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = self.lines.next()?;
            self.line += 1;
            let line = match line {
                Ok(line) => line,
                Err(e) => return Some(Err(backup_io(&self.path, e))),
            };
            if line.trim().is_empty() {
                continue;
            }
            return Some(serde_json::from_str(&line).map_err(|e| {
                invalid_backup(&self.path, format!("line {}: {}", self.line, e))
            }));
        }
    }
}

fn open_backup(path: &Path) -> VixResult<(BackupHeader, RecordLines)> {
    let file = File::open(path).map_err(|e| backup_io(path, e))?;
    let mut lines = BufReader::new(file).lines();

    let first = match lines.next() {
        Some(line) => line.map_err(|e| backup_io(path, e))?,
        None => return Err(invalid_backup(path, "file is empty")),
    };
    let header: BackupHeader = serde_json::from_str(&first)
        .map_err(|e| invalid_backup(path, format!("bad header: {}", e)))?;
    if header.format_version != BACKUP_FORMAT_VERSION {
        return Err(invalid_backup(
            path,
            format!(
                "format version {} is not supported (expected {})",
                header.format_version, BACKUP_FORMAT_VERSION
            ),
        ));
    }

    let records = RecordLines {
        path: path.to_path_buf(),
        lines,
        line: 1,
    };
    Ok((header, records))
}

// ============================================================================
// Backup
// ============================================================================

fn write_backup(
    session: &ManagedSession,
    request: &BackupRequest,
    batch_size: usize,
) -> VixResult<BackupSummary> {
    let started = Instant::now();
    let descriptor = session.describe_collection(&request.collection)?;
    fs::create_dir_all(&request.directory).map_err(|e| backup_io(&request.directory, e))?;

    let created_at = Utc::now();
    let path = backup_path(&request.directory, &request.collection, created_at);
    // Records are staged first: the header carries the final count.
    let staging = path.with_extension("partial");

    let streamed = stream_records(session, request, batch_size, &staging);
    let (count, batches, seen_dimension) = match streamed {
        Ok(totals) => totals,
        Err(e) => {
            remove_quietly(&staging);
            return Err(e);
        }
    };
    if count == 0 {
        remove_quietly(&staging);
        return Err(VixError::InvalidArgument(format!(
            "Collection '{}' is empty; nothing to back up",
            request.collection
        )));
    }

    let mut collection = descriptor.with_count(count);
    if collection.dimension.is_none() {
        collection.dimension = seen_dimension;
    }
    let header = BackupHeader {
        format_version: BACKUP_FORMAT_VERSION,
        collection,
        provider: session.provider(),
        created_at,
        item_count: count,
        include_vectors: request.include_vectors,
    };

    let assembled = assemble(&path, &header, &staging);
    remove_quietly(&staging);
    if let Err(e) = assembled {
        remove_quietly(&path);
        return Err(e);
    }

    info!(
        "Backed up {} items of '{}' to {}",
        count,
        request.collection,
        path.display()
    );
    Ok(BackupSummary {
        path,
        header,
        batches,
        elapsed: started.elapsed(),
    })
}

/// Page through the collection into `staging`. Returns the item count, the
/// number of pages and the first vector dimension seen.
fn stream_records(
    session: &ManagedSession,
    request: &BackupRequest,
    batch_size: usize,
    staging: &Path,
) -> VixResult<(u64, u64, Option<usize>)> {
    let file = File::create(staging).map_err(|e| backup_io(staging, e))?;
    let mut out = BufWriter::new(file);

    let mut cursor: Option<Cursor> = None;
    let mut count: u64 = 0;
    let mut batches: u64 = 0;
    let mut dimension = None;
    loop {
        let page = session.read_page(
            &request.collection,
            cursor.as_ref(),
            batch_size,
            request.include_vectors,
        )?;
        batches += 1;

        for record in &page.items {
            if dimension.is_none() {
                dimension = record.vector.as_ref().map(Vec::len);
            }
            let line = serde_json::to_string(record)?;
            writeln!(out, "{}", line).map_err(|e| backup_io(staging, e))?;
        }
        count += page.items.len() as u64;

        let next = match page.next_cursor {
            Some(next) if !page.end_of_data => next,
            _ => break,
        };
        if page.items.is_empty() && cursor.as_ref() == Some(&next) {
            warn!(
                "Backup of '{}': source returned an empty page without advancing",
                request.collection
            );
            break;
        }
        cursor = Some(next);
    }

    out.flush().map_err(|e| backup_io(staging, e))?;
    Ok((count, batches, dimension))
}

fn assemble(path: &Path, header: &BackupHeader, staging: &Path) -> VixResult<()> {
    let file = File::create(path).map_err(|e| backup_io(path, e))?;
    let mut out = BufWriter::new(file);
    let line = serde_json::to_string(header)?;
    writeln!(out, "{}", line).map_err(|e| backup_io(path, e))?;

    let mut records = File::open(staging).map_err(|e| backup_io(staging, e))?;
    io::copy(&mut records, &mut out).map_err(|e| backup_io(path, e))?;
    out.flush().map_err(|e| backup_io(path, e))
}

/// `<collection>_backup_<utc timestamp>.jsonl`, suffixed when taken.
fn backup_path(dir: &Path, collection: &str, at: DateTime<Utc>) -> PathBuf {
    let stem = format!(
        "{}_backup_{}",
        file_safe(collection),
        at.format("%Y%m%d_%H%M%S")
    );
    let mut path = dir.join(format!("{}.{}", stem, BACKUP_FILE_EXTENSION));
    let mut n = 1;
    while path.exists() {
        path = dir.join(format!("{}_{}.{}", stem, n, BACKUP_FILE_EXTENSION));
        n += 1;
    }
    path
}

fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// ============================================================================
// Restore
// ============================================================================

fn restore_backup(
    session: &ManagedSession,
    request: &RestoreRequest,
    batch_size: usize,
    write_mode: WriteMode,
) -> VixResult<RestoreSummary> {
    let started = Instant::now();
    let (header, records) = open_backup(&request.path)?;

    // Validate every line before the target is touched.
    let mut count: u64 = 0;
    let mut dimension = header.collection.dimension;
    for record in records {
        let record = record?;
        if let Some(vector) = record.vector.as_ref().filter(|_| request.include_vectors) {
            match dimension {
                Some(expected) if expected != vector.len() => {
                    return Err(invalid_backup(
                        &request.path,
                        format!(
                            "item '{}' has dimension {}, expected {}",
                            record.id,
                            vector.len(),
                            expected
                        ),
                    ));
                }
                Some(_) => {}
                None => dimension = Some(vector.len()),
            }
        }
        count += 1;
    }
    if count != header.item_count {
        warn!(
            "Backup {} declares {} items but holds {}",
            request.path.display(),
            header.item_count,
            count
        );
    }

    let name = request
        .collection
        .clone()
        .unwrap_or_else(|| header.collection.name.clone());
    if name.trim().is_empty() {
        return Err(VixError::InvalidArgument(
            "Restore target collection must be named".to_string(),
        ));
    }
    if write_mode == WriteMode::InsertOnly && !session.capabilities().insert_only_writes {
        return Err(VixError::InvalidArgument(format!(
            "{} does not support insert-only writes; use upsert",
            session.provider()
        )));
    }

    let replaced = prepare_target(
        session,
        &name,
        request.overwrite,
        dimension,
        header.collection.metric,
    )?;

    let mut summary = RestoreSummary {
        collection: name.clone(),
        replaced,
        ..RestoreSummary::default()
    };
    let (_, records) = open_backup(&request.path)?;
    let mut batch = Vec::with_capacity(batch_size);
    for record in records {
        let record = record?;
        batch.push(if request.include_vectors {
            record
        } else {
            record.without_vector()
        });
        if batch.len() == batch_size {
            write_chunk(session, &name, &batch, write_mode, &mut summary)?;
            batch.clear();
        }
    }
    if !batch.is_empty() {
        write_chunk(session, &name, &batch, write_mode, &mut summary)?;
    }

    summary.elapsed = started.elapsed();
    info!(
        "Restored {} of {} items into '{}' ({} failed)",
        summary.items_restored, summary.items_read, name, summary.items_failed
    );
    Ok(summary)
}

/// Leave an empty `name` collection ready for writes. Returns whether an
/// existing collection was deleted.
fn prepare_target(
    session: &ManagedSession,
    name: &str,
    overwrite: bool,
    dimension: Option<usize>,
    metric: DistanceMetric,
) -> VixResult<bool> {
    if !session.capabilities().create_collection {
        return Err(VixError::InvalidArgument(format!(
            "{} cannot create collections; restore needs to create '{}'",
            session.provider(),
            name
        )));
    }

    let replaced = match session.describe_collection(name) {
        Ok(_) if !overwrite => {
            return Err(VixError::CollectionExists {
                name: name.to_string(),
            })
        }
        Ok(_) => {
            info!("Replacing collection '{}'", name);
            session.delete_collection(name)?;
            true
        }
        Err(VixError::Query(QueryError::CollectionNotFound { .. })) => false,
        Err(e) => return Err(e),
    };

    debug!(
        "Creating collection '{}' (dimension {:?}, {})",
        name, dimension, metric
    );
    session.create_collection(name, dimension, metric)?;
    Ok(replaced)
}

fn write_chunk(
    session: &ManagedSession,
    name: &str,
    batch: &[Record],
    mode: WriteMode,
    summary: &mut RestoreSummary,
) -> VixResult<()> {
    let outcome = session.write_batch(name, batch, mode)?;
    if !outcome.failures.is_empty() {
        debug!(
            "Restore into '{}' batch {}: {} items rejected",
            name,
            summary.batches + 1,
            outcome.failures.len()
        );
    }
    summary.absorb(batch.len(), outcome);
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn backup_io(path: &Path, err: io::Error) -> VixError {
    VixError::BackupIo {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn invalid_backup(path: &Path, message: impl Into<String>) -> VixError {
    VixError::InvalidBackup {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("Could not remove {}: {}", path.display(), e);
        }
    }
}
