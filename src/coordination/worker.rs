use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::key_store::KeyStore;
use super::manifest::{ChunkResultFile, ChunkStatus, ManifestStorage};
use crate::error::{Error, Result};
use crate::formats::{Chunk, FileReader, Interval};
use crate::telemetry::TelemetryEvent;

/// What a chunk contributed to the key stores
#[derive(Debug, Clone, Default)]
pub struct ChunkOutcome {
    pub chunk_id: u32,
    pub keys: HashSet<String>,
    pub records_read: u64,
    pub bytes_read: u64,
    pub intervals_appended: u64,
}

/// Worker that maps one chunk of the table into the per-key stores
///
/// Cheap to clone; every chunk task gets its own handle.
#[derive(Clone)]
pub struct ChunkWorker {
    job_id: String,
    file_reader: Arc<dyn FileReader>,
    key_store: Arc<dyn KeyStore>,
    manifest_storage: Arc<dyn ManifestStorage>,
    telemetry_tx: mpsc::UnboundedSender<TelemetryEvent>,
}

impl ChunkWorker {
    pub fn new(
        job_id: impl Into<String>,
        file_reader: Arc<dyn FileReader>,
        key_store: Arc<dyn KeyStore>,
        manifest_storage: Arc<dyn ManifestStorage>,
        telemetry_tx: mpsc::UnboundedSender<TelemetryEvent>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            file_reader,
            key_store,
            manifest_storage,
            telemetry_tx,
        }
    }

    /// Process a single chunk and record its result file
    ///
    /// Errors are wrapped in `ChunkFailed` so the caller knows which lines failed.
    pub async fn process_chunk(&self, chunk: Chunk, wave: usize) -> Result<ChunkOutcome> {
        let _ = self.telemetry_tx.send(TelemetryEvent::ChunkStarted);

        let started_at = Utc::now();
        let start_instant = Instant::now();

        let outcome = self.map_chunk(&chunk).await;
        let duration_ms = start_instant.elapsed().as_millis() as u64;

        let (status, error) = match &outcome {
            Ok(_) => (ChunkStatus::Success, None),
            Err(e) => (ChunkStatus::Failed, Some(e.to_string())),
        };
        let counts = outcome.as_ref().ok();

        let result = ChunkResultFile {
            chunk_id: chunk.chunk_id,
            wave,
            status,
            records_read: counts.map(|o| o.records_read).unwrap_or(0),
            keys_touched: counts.map(|o| o.keys.len() as u64).unwrap_or(0),
            intervals_appended: counts.map(|o| o.intervals_appended).unwrap_or(0),
            started_at: started_at.to_rfc3339(),
            completed_at: Utc::now().to_rfc3339(),
            duration_ms,
            error,
        };

        let recorded = self
            .manifest_storage
            .write_result(&self.job_id, chunk.chunk_id, &result)
            .await;

        let wrap = |source: Error| Error::ChunkFailed {
            chunk_id: chunk.chunk_id,
            start_pos: chunk.start_pos,
            end_pos: chunk.end_pos,
            source: Box::new(source),
        };

        match (outcome, recorded) {
            (Ok(outcome), Ok(())) => {
                let _ = self.telemetry_tx.send(TelemetryEvent::ChunkCompleted {
                    records_read: outcome.records_read,
                    bytes_read: outcome.bytes_read,
                    keys_touched: outcome.keys.len() as u64,
                    duration_ms,
                });
                Ok(outcome)
            }
            (Ok(_), Err(e)) => Err(wrap(e)),
            (Err(e), recorded) => {
                if let Err(record_err) = recorded {
                    warn!(
                        "Chunk {} result could not be recorded: {}",
                        chunk.chunk_id, record_err
                    );
                }
                Err(wrap(e))
            }
        }
    }

    /// Read, decode, group and locally merge a chunk, then append per key
    async fn map_chunk(&self, chunk: &Chunk) -> Result<ChunkOutcome> {
        let data = self.file_reader.read_chunk(chunk).await?;
        let records_read = data.records.len() as u64;

        let intervals = data
            .records
            .iter()
            .map(Interval::decode)
            .collect::<Result<Vec<_>>>()?;

        let mut outcome = ChunkOutcome {
            chunk_id: chunk.chunk_id,
            records_read,
            bytes_read: data.bytes_read,
            ..Default::default()
        };

        for (key, group) in group_by_key(intervals) {
            let merged = merge_touching(group);
            self.key_store.append(&key, &merged).await?;
            outcome.intervals_appended += merged.len() as u64;
            outcome.keys.insert(key);
        }

        debug!(
            "Chunk {} [{}, {}): {} records, {} keys, {} intervals appended",
            chunk.chunk_id,
            chunk.start_pos,
            chunk.end_pos,
            outcome.records_read,
            outcome.keys.len(),
            outcome.intervals_appended
        );

        Ok(outcome)
    }
}

/// Group intervals by key
pub fn group_by_key(intervals: Vec<Interval>) -> HashMap<String, Vec<Interval>> {
    let mut groups: HashMap<String, Vec<Interval>> = HashMap::new();
    for interval in intervals {
        groups.entry(interval.key.clone()).or_default().push(interval);
    }
    groups
}

/// Single-pass merge of one key's intervals
///
/// Sorts most-recent-first and folds each interval into the previous one when
/// it ends exactly where the previous one starts. Adjacencies only exposed by a
/// merge are not revisited; the reconciler closes those.
pub fn merge_touching(mut intervals: Vec<Interval>) -> Vec<Interval> {
    intervals.sort_by(Interval::recency_cmp);

    let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
    for interval in intervals {
        match merged.last_mut() {
            Some(head) if head.continues(&interval) => head.absorb(&interval),
            _ => merged.push(interval),
        }
    }
    merged
}
