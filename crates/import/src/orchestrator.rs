//! Queue orchestrator: claims queued uploads and drives each one through
//! extraction, building, dispatch and bulk persistence.
//!
//! Items move `InQueue` → `Loading` → `DataLoadCompleted` /
//! `DataLoadCompletedPartially`, or `DataLoadFailed` when the job as a
//! whole cannot run. A separate sweep returns items stuck in `Loading`
//! (crashed worker) to the queue.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use statreg_core::context::{ImportContext, ImportSettings};
use statreg_core::error::{MappingError, StoreError};
use statreg_core::extraction::{extract_file, fold_continuation_rows, CsvOptions, FileFormat};
use statreg_core::mapping::{record_link_keys, record_stat_id};
use statreg_core::queue::{QueueItem, QueueStatus};
use statreg_core::reference::CodeTable;
use statreg_core::store::{PermissionService, QueueStore, SearchIndex, UnitStore, UploadLogSink};
use statreg_core::types::DbId;
use statreg_core::upload_log::UploadLogEntry;
use tokio_util::sync::CancellationToken;

use crate::builder::{effective_mapping, UnitBuilder};
use crate::bulk::BulkBuffer;
use crate::dispatcher::{Dispatcher, SaveOutcome};
use crate::error::JobError;
use crate::log_buffer::LogBuffer;
use crate::resolver::LookupCache;
use crate::search::IndexSync;

/// Collaborators of the pipeline.
#[derive(Clone)]
pub struct ImportServices {
    pub units: Arc<dyn UnitStore>,
    pub queue: Arc<dyn QueueStore>,
    pub log: Arc<dyn UploadLogSink>,
    pub index: Arc<dyn SearchIndex>,
    pub permissions: Arc<dyn PermissionService>,
}

/// Summary of one processed queue item.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub queue_id: DbId,
    pub status: QueueStatus,
    /// Records skipped by the resume cursor.
    pub skipped: usize,
    pub processed: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
    /// Stopped by cancellation; the item went back to the queue.
    pub cancelled: bool,
    pub note: Option<String>,
}

impl JobReport {
    fn new(queue_id: DbId) -> Self {
        Self {
            queue_id,
            status: QueueStatus::Loading,
            skipped: 0,
            processed: 0,
            created: 0,
            updated: 0,
            unchanged: 0,
            failed: 0,
            cancelled: false,
            note: None,
        }
    }

    fn count(&mut self, outcome: SaveOutcome) {
        match outcome {
            SaveOutcome::Created => self.created += 1,
            SaveOutcome::Updated => self.updated += 1,
            SaveOutcome::Unchanged => self.unchanged += 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Queue processor
// ---------------------------------------------------------------------------

pub struct QueueProcessor {
    services: ImportServices,
    settings: ImportSettings,
}

impl QueueProcessor {
    pub fn new(services: ImportServices, settings: ImportSettings) -> Self {
        Self { services, settings }
    }

    /// Poll the queue every `interval` until `cancel` fires. Each tick
    /// drains the queue one item at a time.
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        tracing::info!(
            interval_ms = interval.as_millis() as u64,
            bulk_buffer_size = self.settings.bulk_buffer_size,
            "Import queue processor started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Import queue processor shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    loop {
                        match self.process_next(&cancel).await {
                            Ok(Some(report)) if !report.cancelled => continue,
                            Ok(_) => break,
                            Err(e) => {
                                tracing::error!(error = %e, "Import queue cycle failed");
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Claim and process the oldest queued item, if any.
    pub async fn process_next(&self, cancel: &CancellationToken) -> Result<Option<JobReport>, StoreError> {
        match self.services.queue.dequeue(Utc::now()).await? {
            Some(item) => self.process_item(item, cancel).await.map(Some),
            None => Ok(None),
        }
    }

    /// Process one claimed item and record its final status.
    pub async fn process_item(
        &self,
        item: QueueItem,
        cancel: &CancellationToken,
    ) -> Result<JobReport, StoreError> {
        let queue_id = item.id;
        tracing::info!(
            queue_id,
            file = %item.file_name,
            skip = item.skip_lines_count,
            "Import started",
        );

        let log = LogBuffer::new(self.services.log.clone(), self.settings.log_buffer_size);
        let result = self.run_job(&item, &log, cancel).await;
        if let Err(e) = log.flush().await {
            tracing::error!(queue_id, error = %e, "Upload log flush failed");
        }

        match result {
            Ok(report) if report.cancelled => {
                self.services.queue.release(queue_id).await?;
                tracing::info!(queue_id, processed = report.processed, "Import interrupted, item released");
                Ok(report)
            }
            Ok(report) => {
                self.services
                    .queue
                    .finish(queue_id, report.status, report.note.as_deref(), Utc::now())
                    .await?;
                tracing::info!(
                    queue_id,
                    status = %report.status,
                    processed = report.processed,
                    created = report.created,
                    updated = report.updated,
                    unchanged = report.unchanged,
                    failed = report.failed,
                    "Import finished",
                );
                Ok(report)
            }
            Err(e) => {
                tracing::error!(queue_id, error = %e, "Import failed");
                let note = e.to_string();
                self.services
                    .queue
                    .finish(queue_id, QueueStatus::DataLoadFailed, Some(&note), Utc::now())
                    .await?;
                let mut report = JobReport::new(queue_id);
                report.status = QueueStatus::DataLoadFailed;
                report.note = Some(note);
                Ok(report)
            }
        }
    }

    async fn run_job(
        &self,
        item: &QueueItem,
        log: &LogBuffer,
        cancel: &CancellationToken,
    ) -> Result<JobReport, JobError> {
        let units = self.services.units.as_ref();
        let source = self.services.queue.load_data_source(item.data_source_id).await?;
        if source.mapping.is_empty() {
            return Err(MappingError::MalformedMapping(format!("data source `{}` has no mapping", source.name)).into());
        }
        self.services
            .index
            .ping()
            .await
            .map_err(JobError::IndexUnavailable)?;

        let format = FileFormat::from_file_name(&item.file_name)?;
        let options = CsvOptions {
            delimiter: source.csv_delimiter,
            skip_count: source.csv_skip_count,
        };
        let mut records = extract_file(Path::new(&item.file_path), format, &options)?;
        if format == FileFormat::Csv {
            records = fold_continuation_rows(records, &source.mapping);
        }
        tracing::debug!(queue_id = item.id, records = records.len(), "File extracted");

        let mapping = effective_mapping(&source);
        let cache = LookupCache::load(units).await?;
        let liquidated = cache
            .by_code(CodeTable::UnitStatus, &self.settings.liquidated_status_code)
            .unwrap_or_default();
        if liquidated.id == 0 {
            tracing::warn!(
                code = %self.settings.liquidated_status_code,
                "Liquidated unit status not found, liquidation rules disabled",
            );
        }

        let builder = UnitBuilder::new(units, self.services.permissions.as_ref(), &cache, &source, &mapping);
        let dispatcher = Dispatcher::new(units, &source, &liquidated);
        let index = IndexSync::new(self.services.index.clone(), self.settings.index_pending_limit);
        let mut buffer = BulkBuffer::new(self.settings.bulk_buffer_size);
        let mut report = JobReport::new(item.id);
        let user_id = match item.user_id.trim() {
            "" => self.settings.default_user_id.as_str(),
            user => user,
        };
        let mut ctx = ImportContext::new(user_id);

        let skip = usize::try_from(item.skip_lines_count).unwrap_or(0);
        report.skipped = skip.min(records.len());

        for (line, record) in records.iter().enumerate().skip(skip) {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            ctx = ctx.tick();

            // A record touching a unit that is still buffered must see it
            // persisted first.
            let stat_id = record_stat_id(record, &mapping);
            let touches_buffer = stat_id.is_some_and(|s| buffer.mentions(s))
                || record_link_keys(record, &mapping)
                    .into_iter()
                    .any(|k| buffer.mentions(k));
            if touches_buffer {
                self.flush(&mut buffer, &index, log, item.id, &mut report).await?;
            }

            let mut entry = UploadLogEntry::new(item.id, ctx.now);
            entry.target_stat_id = stat_id.map(str::to_string);
            entry.serialized_raw_unit = serde_json::to_string(record).ok();

            let saved = match builder.build(record, &ctx).await {
                Ok(built) => {
                    entry.stat_unit_name = built.unit.name.clone();
                    entry.serialized_unit = serde_json::to_string(&built.unit).ok();
                    for warning in &built.warnings {
                        entry.warn(warning.clone());
                    }
                    dispatcher.save(built, &mut buffer, &ctx).await
                }
                Err(e) => Err(e),
            };
            entry.end_import_date = Utc::now();

            match saved {
                Ok(outcome) => {
                    if outcome == SaveOutcome::Unchanged {
                        entry.note = Some("No changes".into());
                    }
                    report.count(outcome);
                    buffer.record_done(entry);
                }
                Err(e) => {
                    tracing::debug!(queue_id = item.id, line, kind = e.kind(), error = %e, "Record rejected");
                    e.record_into(&mut entry);
                    report.failed += 1;
                    log.push(entry).await?;
                }
            }
            buffer.count_record();
            report.processed += 1;

            if buffer.should_flush() {
                self.flush(&mut buffer, &index, log, item.id, &mut report).await?;
            }
        }

        self.flush(&mut buffer, &index, log, item.id, &mut report).await?;
        if let Err(e) = index.flush().await {
            tracing::warn!(queue_id = item.id, error = %e, "Search index out of date after import");
        }

        report.status = if report.failed > 0 {
            QueueStatus::DataLoadCompletedPartially
        } else {
            QueueStatus::DataLoadCompleted
        };
        Ok(report)
    }

    /// Flush with retries. When every attempt fails the batch is dropped
    /// and each of its records is logged as a save error.
    async fn flush(
        &self,
        buffer: &mut BulkBuffer,
        index: &IndexSync,
        log: &LogBuffer,
        queue_id: DbId,
        report: &mut JobReport,
    ) -> Result<(), JobError> {
        let attempts = self.settings.flush_max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match buffer.flush(self.services.units.as_ref(), index, queue_id).await {
                Ok(flushed) => {
                    log.push_all(flushed.log).await?;
                    return Ok(());
                }
                Err(e) if attempt < attempts => {
                    tracing::warn!(queue_id, attempt, error = %e, "Bulk flush failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(self.settings.flush_retry_delay).await;
                }
                Err(e) => {
                    let dropped = buffer.drain_failed(&e.to_string());
                    tracing::error!(
                        queue_id,
                        attempts,
                        records = dropped.len(),
                        error = %e,
                        "Bulk flush failed, batch dropped",
                    );
                    report.failed += dropped.len();
                    log.push_all(dropped).await?;
                    return Ok(());
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Stuck-item sweep
// ---------------------------------------------------------------------------

/// Return items that have been `Loading` for longer than `timeout`.
pub async fn sweep_stuck_once(queue: &dyn QueueStore, timeout: Duration) -> Result<u64, StoreError> {
    let timeout = chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::hours(1));
    queue.reset_stuck(Utc::now() - timeout).await
}

/// Run the stuck-item sweep every `interval` until `cancel` fires.
pub async fn run_stuck_sweep(
    queue: Arc<dyn QueueStore>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        interval_secs = interval.as_secs(),
        timeout_secs = timeout.as_secs(),
        "Stuck import sweep started"
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Stuck import sweep stopping");
                break;
            }
            _ = ticker.tick() => {
                match sweep_stuck_once(queue.as_ref(), timeout).await {
                    Ok(reset) if reset > 0 => {
                        tracing::warn!(reset, "Stuck imports returned to the queue");
                    }
                    Ok(_) => tracing::debug!("Stuck import sweep: nothing to reset"),
                    Err(e) => tracing::error!(error = %e, "Stuck import sweep failed"),
                }
            }
        }
    }
}
