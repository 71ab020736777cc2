/// Telemetry events sent from workers to the coordinator for progress tracking
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    /// Worker started processing a chunk
    ChunkStarted,
    /// Worker appended a chunk's merged intervals to the key stores
    ChunkCompleted {
        records_read: u64,
        bytes_read: u64,
        keys_touched: u64,
        duration_ms: u64,
    },
    /// A wave drained and the next one may start
    WaveCompleted { wave: usize },
    /// The map phase finished and reconciliation of `keys` keys begins
    ReconcileStarted { keys: u64 },
    /// A key's reconciled date was produced
    KeyReconciled,
}

/// Statistics aggregated from telemetry events
#[derive(Debug, Default, Clone)]
pub struct ProgressStats {
    pub chunks_started: usize,
    pub chunks_completed: usize,
    pub waves_completed: usize,
    pub records_read: u64,
    pub bytes_processed: u64,
    pub keys_touched: u64,
    pub keys_discovered: u64,
    pub keys_reconciled: u64,
    pub chunk_durations_ms: Vec<u64>,
}

impl ProgressStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update stats with a telemetry event
    pub fn update(&mut self, event: &TelemetryEvent) {
        match event {
            TelemetryEvent::ChunkStarted => {
                self.chunks_started += 1;
            }
            TelemetryEvent::ChunkCompleted {
                records_read,
                bytes_read,
                keys_touched,
                duration_ms,
            } => {
                self.chunks_completed += 1;
                self.records_read += records_read;
                self.bytes_processed += bytes_read;
                // Counted per chunk, so a key spread over several chunks counts more than once
                self.keys_touched += keys_touched;
                self.chunk_durations_ms.push(*duration_ms);
            }
            TelemetryEvent::WaveCompleted { wave } => {
                self.waves_completed = self.waves_completed.max(wave + 1);
            }
            TelemetryEvent::ReconcileStarted { keys } => {
                self.keys_discovered = *keys;
            }
            TelemetryEvent::KeyReconciled => {
                self.keys_reconciled += 1;
            }
        }
    }

    /// Chunks started but not yet completed
    pub fn chunks_in_flight(&self) -> usize {
        self.chunks_started.saturating_sub(self.chunks_completed)
    }

    /// Calculate percentile from chunk durations
    pub fn percentile(&self, p: f64) -> Option<u64> {
        if self.chunk_durations_ms.is_empty() {
            return None;
        }

        let mut sorted = self.chunk_durations_ms.clone();
        sorted.sort_unstable();

        let index = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
        let index = index.saturating_sub(1).min(sorted.len() - 1);

        Some(sorted[index])
    }

    /// Get p50, p90, p99 percentiles
    pub fn get_percentiles(&self) -> (Option<u64>, Option<u64>, Option<u64>) {
        (
            self.percentile(50.0),
            self.percentile(90.0),
            self.percentile(99.0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_aggregates_chunk_events() {
        let mut stats = ProgressStats::new();
        stats.update(&TelemetryEvent::ChunkStarted);
        stats.update(&TelemetryEvent::ChunkCompleted {
            records_read: 2,
            bytes_read: 40,
            keys_touched: 1,
            duration_ms: 5,
        });
        stats.update(&TelemetryEvent::WaveCompleted { wave: 0 });
        stats.update(&TelemetryEvent::ReconcileStarted { keys: 1 });
        stats.update(&TelemetryEvent::KeyReconciled);

        assert_eq!(stats.chunks_started, 1);
        assert_eq!(stats.chunks_completed, 1);
        assert_eq!(stats.chunks_in_flight(), 0);
        assert_eq!(stats.keys_touched, 1);
        assert_eq!(stats.records_read, 2);
        assert_eq!(stats.bytes_processed, 40);
        assert_eq!(stats.waves_completed, 1);
        assert_eq!(stats.keys_discovered, 1);
        assert_eq!(stats.keys_reconciled, 1);
    }

    #[test]
    fn test_in_flight_counts_unfinished_chunks() {
        let mut stats = ProgressStats::new();
        stats.update(&TelemetryEvent::ChunkStarted);
        stats.update(&TelemetryEvent::ChunkStarted);
        assert_eq!(stats.chunks_in_flight(), 2);

        stats.update(&TelemetryEvent::ChunkCompleted {
            records_read: 1,
            bytes_read: 10,
            keys_touched: 1,
            duration_ms: 3,
        });
        assert_eq!(stats.chunks_in_flight(), 1);
    }

    #[test]
    fn test_percentiles() {
        let mut stats = ProgressStats::new();
        assert_eq!(stats.percentile(50.0), None);

        stats.chunk_durations_ms = (1..=100).collect();
        assert_eq!(stats.get_percentiles(), (Some(50), Some(90), Some(99)));

        stats.chunk_durations_ms = vec![7];
        assert_eq!(stats.percentile(0.0), Some(7));
    }
}
