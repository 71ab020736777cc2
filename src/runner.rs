//! High-level runner API for the activation reconciler.
//!
//! This module provides a simplified public interface that encapsulates the
//! setup of readers, stores and the coordinator.
//!
//! This is the primary API for external users and for the CLI.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing::{info, warn};

use crate::config::{DEFAULT_CHUNK_SIZE, DEFAULT_WAVE_SIZE, DEFAULT_WORKER_COUNT};
use crate::coordination::key_store::LocalKeyStore;
use crate::coordination::manifest::LocalManifestStorage;
use crate::coordination::{Coordinator, ReconcileConfigBuilder};
use crate::formats::{CsvResultWriter, DelimitedConfig, GenericDelimitedReader};
use crate::io::LocalFileByteReader;

/// Arguments for running a reconciliation
#[derive(Debug, Clone)]
pub struct RunArgs {
    /// Source table: a header line, then `key,start[,end]` rows
    pub input: PathBuf,
    /// Line count including the header; counted from the file when `None`
    pub total_lines: Option<u64>,
    /// Result file; `<tmp>/Result_<millis>.csv` when `None`
    pub output: Option<PathBuf>,

    // Performance tuning
    pub chunk_size: u64,
    pub worker_count: usize,
    pub wave_size: usize,

    /// Directory for key stores and the job manifest (default: a temp directory)
    pub work_dir: Option<PathBuf>,
    /// Keep key stores, and the temp work directory if one is used
    pub keep_work_dir: bool,
    pub quiet: bool,
}

impl RunArgs {
    /// Arguments for `input` with every tunable at its default
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            total_lines: None,
            output: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            worker_count: DEFAULT_WORKER_COUNT,
            wave_size: DEFAULT_WAVE_SIZE,
            work_dir: None,
            keep_work_dir: false,
            quiet: true,
        }
    }
}

/// Result of a completed reconciliation
#[derive(Debug)]
pub struct RunResult {
    pub job_id: String,
    pub result_path: PathBuf,
    pub chunks_processed: usize,
    pub waves: usize,
    pub records_read: u64,
    pub keys_reconciled: u64,
    pub duration: Duration,
    /// Temp work directory left in place because `keep_work_dir` was set
    pub preserved_work_dir: Option<PathBuf>,
}

/// Run a reconciliation with the specified arguments
///
/// # Example
///
/// ```no_run
/// use activation_reconciler::runner::{RunArgs, run_reconcile};
///
/// # async fn example() -> anyhow::Result<()> {
/// let mut args = RunArgs::new("phones.csv");
/// args.worker_count = 4;
///
/// let result = run_reconcile(args).await?;
/// println!("{} keys written to {}", result.keys_reconciled, result.result_path.display());
/// # Ok(())
/// # }
/// ```
///
/// When the run fails and a temp work directory was used, the directory is
/// persisted for debugging and its path is added to the error context.
pub async fn run_reconcile(args: RunArgs) -> Result<RunResult> {
    // Set up work directory (use temp dir if not provided)
    let (mut temp_dir, work_dir_path) = if let Some(dir) = args.work_dir.clone() {
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create work directory {}", dir.display()))?;
        (None, dir)
    } else {
        let temp_dir = TempDir::new().context("Failed to create temp work directory")?;
        let path = temp_dir.path().to_path_buf();
        (Some(temp_dir), path)
    };

    let result_path = args.output.clone().unwrap_or_else(default_result_path);
    info!("Work directory: {}", work_dir_path.display());

    let file_reader = Arc::new(GenericDelimitedReader::new(
        LocalFileByteReader::new(&args.input),
        DelimitedConfig::csv(),
    ));
    let key_store = Arc::new(LocalKeyStore::open(&work_dir_path).await?);
    let manifest_storage = Arc::new(LocalManifestStorage::new(work_dir_path.clone()));
    let coordinator = Coordinator::new(manifest_storage, file_reader, key_store);

    let mut builder = ReconcileConfigBuilder::default();
    builder
        .source_path(args.input.display().to_string())
        .chunk_size(args.chunk_size)
        .worker_count(args.worker_count)
        .wave_size(args.wave_size)
        .keep_key_stores(args.keep_work_dir)
        .quiet(args.quiet);
    if let Some(total_lines) = args.total_lines {
        builder.total_lines(total_lines);
    }
    let config = builder.build()?;

    let sink = Box::new(CsvResultWriter::create(&result_path)?);

    let result = match coordinator.run_reconcile(&config, sink).await {
        Ok(result) => result,
        Err(e) => {
            // Leave partial key stores and chunk results behind for inspection
            if let Some(temp) = temp_dir.take() {
                let persisted = temp.keep();
                warn!("Work directory preserved at {}", persisted.display());
                return Err(e.context(format!(
                    "Work directory preserved at {}",
                    persisted.display()
                )));
            }
            return Err(e);
        }
    };

    let preserved_work_dir = match temp_dir.take() {
        Some(temp) if args.keep_work_dir => Some(temp.keep()),
        _ => None,
    };

    Ok(RunResult {
        job_id: result.job_id,
        result_path,
        chunks_processed: result.chunks_processed,
        waves: result.waves,
        records_read: result.records_read,
        keys_reconciled: result.keys_reconciled,
        duration: result.duration,
        preserved_work_dir,
    })
}

/// `<tmp>/Result_<epoch millis>.csv`
fn default_result_path() -> PathBuf {
    std::env::temp_dir().join(format!("Result_{}.csv", Utc::now().timestamp_millis()))
}
