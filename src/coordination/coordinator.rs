use anyhow::{Context, Result};
use chrono::Utc;
use derive_builder::Builder;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use super::key_store::KeyStore;
use super::manifest::{ChunkInfo, ChunkResultFile, ManifestFile, ManifestStorage};
use super::partitioner::partition;
use super::pool::{WorkerPool, flatten_join};
use super::reconciler::{KeyReconciler, ReconciledResult};
use super::scheduler::{BatchScheduler, ScheduleOutcome};
use super::worker::ChunkWorker;
use crate::config::{
    DEFAULT_CHUNK_SIZE, DEFAULT_WAVE_SIZE, DEFAULT_WORKER_COUNT, RECONCILE_IN_FLIGHT_FACTOR,
    RESULT_CHANNEL_CAPACITY,
};
use crate::error::Error;
use crate::formats::{Chunk, FileMetadata, FileReader, ResultSink};
use crate::telemetry::{ProgressStats, TelemetryEvent};

/// Configuration for a reconciliation run
#[derive(Debug, Clone, Builder)]
pub struct ReconcileConfig {
    #[builder(setter(into))]
    pub source_path: String,
    /// Table line count including the header; read from the file when unset
    #[builder(default, setter(strip_option))]
    pub total_lines: Option<u64>,
    #[builder(default = "DEFAULT_CHUNK_SIZE")]
    pub chunk_size: u64,
    #[builder(default = "DEFAULT_WORKER_COUNT")]
    pub worker_count: usize,
    #[builder(default = "DEFAULT_WAVE_SIZE")]
    pub wave_size: usize,
    /// Leave every key's accumulation file in place after reconciliation
    #[builder(default)]
    pub keep_key_stores: bool,
    #[builder(default)]
    pub quiet: bool,
}

impl ReconcileConfig {
    /// Reject degenerate settings before any work is scheduled
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::invalid_input("chunk size must be at least 1"));
        }
        if self.worker_count == 0 {
            return Err(Error::invalid_input("worker count must be at least 1"));
        }
        if self.wave_size == 0 {
            return Err(Error::invalid_input("wave size must be at least 1"));
        }
        Ok(())
    }
}

/// Result of a completed reconciliation run
#[derive(Debug)]
pub struct ReconcileResult {
    pub job_id: String,
    pub chunks_processed: usize,
    pub waves: usize,
    pub records_read: u64,
    pub keys_reconciled: u64,
    pub duration: Duration,
    /// Detailed results for each chunk (accessed in integration tests)
    #[cfg_attr(not(test), allow(dead_code))]
    pub chunk_results: Vec<ChunkResultFile>,
}

/// The Coordinator drives the partition, map and reduce phases of a run.
pub struct Coordinator {
    manifest_storage: Arc<dyn ManifestStorage>,
    file_reader: Arc<dyn FileReader>,
    key_store: Arc<dyn KeyStore>,
}

impl Coordinator {
    pub fn new(
        manifest_storage: Arc<dyn ManifestStorage>,
        file_reader: Arc<dyn FileReader>,
        key_store: Arc<dyn KeyStore>,
    ) -> Self {
        Self {
            manifest_storage,
            file_reader,
            key_store,
        }
    }

    /// Run the complete reconciliation
    ///
    /// 1. Validate the configuration and generate a job ID
    /// 2. Partition the table's data lines into chunks
    /// 3. Write the manifest
    /// 4. Map: run chunks through the worker pool wave by wave
    /// 5. Reduce: reconcile every discovered key and stream results to `sink`
    /// 6. Aggregate the chunk result files
    pub async fn run_reconcile(
        &self,
        config: &ReconcileConfig,
        sink: Box<dyn ResultSink>,
    ) -> Result<ReconcileResult> {
        let start_time = Instant::now();
        config.validate()?;

        let job_id = Uuid::new_v4().to_string();
        info!("Starting reconcile job: {}", job_id);

        let file_metadata = self
            .file_reader
            .metadata()
            .await
            .context("Failed to get file metadata")?;
        let total_lines = config.total_lines.unwrap_or(file_metadata.total_lines);
        let chunks = partition(total_lines, config.chunk_size)?;
        info!(
            "Created {} chunks of up to {} lines for {} data rows ({} lines, {} bytes in file)",
            chunks.len(),
            config.chunk_size,
            total_lines - 1,
            file_metadata.total_lines,
            file_metadata.file_size_bytes
        );

        self.create_and_write_manifest(&job_id, config, total_lines, &chunks)
            .await?;

        let (telemetry_tx, telemetry_rx) = mpsc::unbounded_channel::<TelemetryEvent>();
        let prog_jh = Self::setup_progress_tracking(
            config,
            &file_metadata,
            total_lines,
            &chunks,
            telemetry_rx,
        );

        let pool = WorkerPool::new(config.worker_count)?;
        let outcome = self
            .map_and_reduce(&job_id, config, &pool, &chunks, sink, telemetry_tx)
            .await;

        // Every sender is gone once map_and_reduce returns, so the progress task ends
        pool.close();
        if let Some(jh) = prog_jh {
            let _ = jh.await;
        }

        let (schedule, keys_reconciled) = outcome?;

        self.aggregate_final_results(&job_id, &chunks, schedule, keys_reconciled, start_time)
            .await
    }

    /// Create and write the manifest file
    async fn create_and_write_manifest(
        &self,
        job_id: &str,
        config: &ReconcileConfig,
        total_lines: u64,
        chunks: &[Chunk],
    ) -> Result<()> {
        let chunk_infos: Vec<ChunkInfo> = chunks
            .iter()
            .enumerate()
            .map(|(idx, chunk)| ChunkInfo::new(chunk, idx / config.wave_size))
            .collect();

        let manifest = ManifestFile {
            job_id: job_id.to_string(),
            created_at: Utc::now().to_rfc3339(),
            source_path: config.source_path.clone(),
            total_lines,
            chunk_size: config.chunk_size,
            wave_size: config.wave_size,
            worker_count: config.worker_count,
            chunks: chunk_infos,
        };

        self.manifest_storage
            .write_manifest(job_id, &manifest)
            .await
            .context("Failed to write manifest")?;

        info!("Manifest written for job: {}", job_id);
        Ok(())
    }

    /// Map phase followed by reduce phase, sharing one pool
    async fn map_and_reduce(
        &self,
        job_id: &str,
        config: &ReconcileConfig,
        pool: &WorkerPool,
        chunks: &[Chunk],
        sink: Box<dyn ResultSink>,
        telemetry_tx: mpsc::UnboundedSender<TelemetryEvent>,
    ) -> Result<(ScheduleOutcome, u64)> {
        let worker = ChunkWorker::new(
            job_id,
            Arc::clone(&self.file_reader),
            Arc::clone(&self.key_store),
            Arc::clone(&self.manifest_storage),
            telemetry_tx.clone(),
        );

        let scheduler = BatchScheduler::new(pool.clone(), config.wave_size, telemetry_tx.clone())?;
        let mut schedule = scheduler
            .run(&worker, chunks)
            .await
            .context("Map phase failed")?;
        drop(worker);

        let _ = telemetry_tx.send(TelemetryEvent::ReconcileStarted {
            keys: schedule.keys.len() as u64,
        });

        let keys_reconciled = self
            .reconcile_keys(
                pool,
                std::mem::take(&mut schedule.keys),
                sink,
                config.keep_key_stores,
                telemetry_tx,
            )
            .await
            .context("Reconciliation failed")?;

        Ok((schedule, keys_reconciled))
    }

    /// Reconcile every key on the pool and stream results to the sink
    ///
    /// At most `capacity * RECONCILE_IN_FLIGHT_FACTOR` keys are in flight. The
    /// first failure aborts every remaining task.
    async fn reconcile_keys(
        &self,
        pool: &WorkerPool,
        keys: Vec<String>,
        sink: Box<dyn ResultSink>,
        keep_key_stores: bool,
        telemetry_tx: mpsc::UnboundedSender<TelemetryEvent>,
    ) -> crate::error::Result<u64> {
        let (result_tx, mut result_rx) = mpsc::channel::<ReconciledResult>(RESULT_CHANNEL_CAPACITY);

        // The sink does blocking file I/O, so it gets a dedicated blocking thread
        let writer = tokio::task::spawn_blocking(move || {
            let mut sink = sink;
            while let Some(result) = result_rx.blocking_recv() {
                sink.write(&result)?;
            }
            sink.finish()
        });

        let reconciler = KeyReconciler::new(Arc::clone(&self.key_store));
        let max_in_flight = pool.capacity() * RECONCILE_IN_FLIGHT_FACTOR;
        let mut pending = keys.into_iter();
        let mut join_set = JoinSet::new();
        let mut failure: Option<Error> = None;

        loop {
            while join_set.len() < max_in_flight
                && let Some(key) = pending.next()
            {
                let reconciler = reconciler.clone();
                let key_store = Arc::clone(&self.key_store);
                let result_tx = result_tx.clone();
                let telemetry_tx = telemetry_tx.clone();

                pool.spawn(&mut join_set, async move {
                    let result = reconciler.reconcile(&key).await?;
                    result_tx
                        .send(result)
                        .await
                        .map_err(|_| Error::TaskFailed {
                            context: "result writer stopped".to_string(),
                        })?;
                    if !keep_key_stores {
                        key_store.discard(&key).await?;
                    }
                    let _ = telemetry_tx.send(TelemetryEvent::KeyReconciled);
                    Ok(())
                });
            }

            match join_set.join_next().await {
                None => break,
                Some(joined) => {
                    if let Err(e) = flatten_join(joined) {
                        warn!("Aborting reconciliation: {}", e);
                        failure = Some(e);
                        join_set.abort_all();
                        break;
                    }
                }
            }
        }

        // Aborted tasks drop their senders as they unwind
        while join_set.join_next().await.is_some() {}
        drop(result_tx);

        let written = flatten_join(writer.await);
        match (failure, written) {
            // A writer failure surfaces in the tasks as a closed channel; report the cause
            (Some(Error::TaskFailed { .. }), Err(sink_err)) => Err(sink_err),
            (Some(e), _) => Err(e),
            (None, written) => written,
        }
    }

    /// Setup progress tracking with progress bars
    fn setup_progress_tracking(
        config: &ReconcileConfig,
        file_metadata: &FileMetadata,
        total_lines: u64,
        chunks: &[Chunk],
        mut telemetry_rx: mpsc::UnboundedReceiver<TelemetryEvent>,
    ) -> Option<tokio::task::JoinHandle<()>> {
        if config.quiet {
            return None;
        }

        let multi_progress = MultiProgress::new();

        let chunk_bar = multi_progress.add(ProgressBar::new(chunks.len() as u64));
        chunk_bar.set_style(bar_style(
            "[{elapsed_precise}] Chunks:    [{bar:30.cyan/blue}] {pos}/{len} ({percent}%)",
        ));

        let rows_bar = multi_progress.add(ProgressBar::new(total_lines.saturating_sub(1)));
        rows_bar.set_style(bar_style(
            "[{elapsed_precise}] Rows:      [{bar:30.green/blue}] {human_pos}/{human_len} ({percent}%) | {per_sec}",
        ));

        let bytes_bar = multi_progress.add(ProgressBar::new(file_metadata.file_size_bytes));
        bytes_bar.set_style(bar_style(
            "[{elapsed_precise}] Bytes:     [{bar:30.magenta/blue}] {bytes}/{total_bytes} ({percent}%) | {bytes_per_sec}",
        ));

        let keys_bar = multi_progress.add(ProgressBar::new(0));
        keys_bar.set_style(bar_style(
            "[{elapsed_precise}] Keys:      [{bar:30.yellow/blue}] {human_pos}/{human_len} ({percent}%) | {per_sec}",
        ));

        let stats_bar = multi_progress.add(ProgressBar::new(0));
        stats_bar.set_style(bar_style("[{elapsed_precise}] Chunk Time: {msg}"));

        Some(tokio::spawn(async move {
            let mut stats = ProgressStats::new();

            while let Some(event) = telemetry_rx.recv().await {
                stats.update(&event);

                chunk_bar.set_position(stats.chunks_completed as u64);
                rows_bar.set_position(stats.records_read);
                bytes_bar.set_position(stats.bytes_processed);
                keys_bar.set_length(stats.keys_discovered);
                keys_bar.set_position(stats.keys_reconciled);

                if let (Some(p50), Some(p90), Some(p99)) = stats.get_percentiles() {
                    stats_bar.set_message(format!(
                        "p50: {}ms, p90: {}ms, p99: {}ms | waves: {} | in flight: {} | key appends: {}",
                        p50,
                        p90,
                        p99,
                        stats.waves_completed,
                        stats.chunks_in_flight(),
                        stats.keys_touched
                    ));
                }
            }

            chunk_bar.finish_with_message("All chunks completed");
            rows_bar.finish();
            bytes_bar.finish();
            keys_bar.finish();

            if let (Some(p50), Some(p90), Some(p99)) = stats.get_percentiles() {
                stats_bar
                    .finish_with_message(format!("p50: {}ms, p90: {}ms, p99: {}ms", p50, p90, p99));
            } else {
                stats_bar.finish();
            }
        }))
    }

    /// Collect all chunk results listed in the job manifest
    async fn collect_results(&self, job_id: &str) -> Result<Vec<ChunkResultFile>> {
        let manifest = self
            .manifest_storage
            .read_manifest(job_id)
            .await
            .context("Failed to read manifest")?;
        let mut results = Vec::with_capacity(manifest.chunks.len());

        for chunk in &manifest.chunks {
            match self
                .manifest_storage
                .read_result(job_id, chunk.chunk_id)
                .await
            {
                Ok(result) => results.push(result),
                Err(e) => warn!("Chunk {} result missing: {}", chunk.chunk_id, e),
            }
        }

        Ok(results)
    }

    /// Aggregate the final results from all chunk result files
    async fn aggregate_final_results(
        &self,
        job_id: &str,
        chunks: &[Chunk],
        schedule: ScheduleOutcome,
        keys_reconciled: u64,
        start_time: Instant,
    ) -> Result<ReconcileResult> {
        info!("Aggregating results...");
        let chunk_results = self.collect_results(job_id).await?;

        let records_read = if chunk_results.len() == chunks.len() {
            chunk_results.iter().map(|r| r.records_read).sum()
        } else {
            schedule.chunk_outcomes.iter().map(|o| o.records_read).sum()
        };
        let duration = start_time.elapsed();

        info!(
            "Reconcile complete: {} chunks in {} waves, {} records read, {} keys reconciled in {:.2}s",
            schedule.chunk_outcomes.len(),
            schedule.waves,
            records_read,
            keys_reconciled,
            duration.as_secs_f64()
        );

        Ok(ReconcileResult {
            job_id: job_id.to_string(),
            chunks_processed: schedule.chunk_outcomes.len(),
            waves: schedule.waves,
            records_read,
            keys_reconciled,
            duration,
            chunk_results,
        })
    }
}

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}
