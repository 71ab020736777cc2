//! Wave-by-wave submission of chunks to the worker pool.

use dashmap::DashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::pool::{WorkerPool, flatten_join};
use super::worker::{ChunkOutcome, ChunkWorker};
use crate::error::{Error, Result};
use crate::formats::Chunk;
use crate::telemetry::TelemetryEvent;

/// Set of every key seen by a completed chunk
///
/// Open for recording from creation until `finalize`, after which it is frozen.
#[derive(Debug, Default)]
pub struct KeyRegistry {
    keys: DashSet<String>,
    finalized: AtomicBool,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one chunk's keys to the set
    pub fn record<I>(&self, keys: I) -> Result<()>
    where
        I: IntoIterator<Item = String>,
    {
        if self.finalized.load(Ordering::Acquire) {
            return Err(Error::TaskFailed {
                context: "key registry is already finalized".to_string(),
            });
        }

        for key in keys {
            self.keys.insert(key);
        }
        Ok(())
    }

    /// Freeze the set and return its contents, sorted
    pub fn finalize(&self) -> Vec<String> {
        self.finalized.store(true, Ordering::Release);
        let mut keys: Vec<String> = self.keys.iter().map(|k| k.key().clone()).collect();
        keys.sort_unstable();
        keys
    }
}

/// Everything the map phase produced
#[derive(Debug)]
pub struct ScheduleOutcome {
    /// Distinct keys across all chunks
    pub keys: Vec<String>,
    pub chunk_outcomes: Vec<ChunkOutcome>,
    pub waves: usize,
}

/// Submits chunks to the pool in waves of `wave_size`
///
/// A wave is always drained completely before the next one starts, even when
/// one of its chunks fails; the run then fails with the first error observed.
pub struct BatchScheduler {
    pool: WorkerPool,
    wave_size: usize,
    registry: KeyRegistry,
    telemetry_tx: mpsc::UnboundedSender<TelemetryEvent>,
}

impl BatchScheduler {
    pub fn new(
        pool: WorkerPool,
        wave_size: usize,
        telemetry_tx: mpsc::UnboundedSender<TelemetryEvent>,
    ) -> Result<Self> {
        if wave_size == 0 {
            return Err(Error::invalid_input("wave size must be at least 1"));
        }

        Ok(Self {
            pool,
            wave_size,
            registry: KeyRegistry::new(),
            telemetry_tx,
        })
    }

    /// Run every chunk through `worker`, wave by wave
    pub async fn run(self, worker: &ChunkWorker, chunks: &[Chunk]) -> Result<ScheduleOutcome> {
        let mut chunk_outcomes = Vec::with_capacity(chunks.len());
        let mut waves = 0;

        for (wave, batch) in chunks.chunks(self.wave_size).enumerate() {
            debug!("Submitting wave {} ({} chunks)", wave, batch.len());

            let mut join_set = JoinSet::new();
            for &chunk in batch {
                let worker = worker.clone();
                self.pool.spawn(&mut join_set, async move {
                    worker.process_chunk(chunk, wave).await
                });
            }

            let mut first_error: Option<Error> = None;
            while let Some(joined) = join_set.join_next().await {
                match flatten_join(joined) {
                    Ok(outcome) => {
                        self.registry.record(outcome.keys.iter().cloned())?;
                        chunk_outcomes.push(outcome);
                    }
                    Err(e) if first_error.is_none() => first_error = Some(e),
                    Err(e) => warn!("Additional failure in wave {}: {}", wave, e),
                }
            }

            if let Some(e) = first_error {
                return Err(e);
            }

            waves += 1;
            let _ = self.telemetry_tx.send(TelemetryEvent::WaveCompleted { wave });
        }

        let keys = self.registry.finalize();
        info!(
            "Map phase complete: {} chunks in {} waves, {} distinct keys",
            chunk_outcomes.len(),
            waves,
            keys.len()
        );

        Ok(ScheduleOutcome {
            keys,
            chunk_outcomes,
            waves,
        })
    }
}
