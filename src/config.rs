//! Configuration constants for the reconciler
//!
//! This module centralizes all tunable parameters and constants used throughout
//! the application.

// ============================================================================
// Partitioning Configuration
// ============================================================================

/// Number of table rows handed to a single chunk worker
///
/// Kept deliberately small: a chunk is fully materialized in memory while it is
/// parsed and merged, so raising this trades memory for fewer store appends.
pub const DEFAULT_CHUNK_SIZE: u64 = 2;

/// First data line of the table (line 1 is the header)
pub const FIRST_DATA_LINE: u64 = 2;

// ============================================================================
// Worker Configuration
// ============================================================================

/// Number of tasks allowed to run concurrently in the worker pool
pub const DEFAULT_WORKER_COUNT: usize = 10;

/// Number of chunks submitted together before waiting for the wave to drain
pub const DEFAULT_WAVE_SIZE: usize = 3;

/// Reconciliation tasks kept in flight per pool slot
///
/// Keys are fanned out lazily so that millions of keys do not turn into
/// millions of spawned tasks up front.
pub const RECONCILE_IN_FLIGHT_FACTOR: usize = 4;

/// Capacity of the channel between reconciliation tasks and the result writer
pub const RESULT_CHANNEL_CAPACITY: usize = 1024;

// ============================================================================
// I/O Configuration
// ============================================================================

/// Size of blocks read when scanning the source table
///
/// 64KB keeps the number of reads low during the one-off line index scan
/// without holding a meaningful amount of the file in memory.
pub const READ_BLOCK_SIZE: usize = 64 * 1024; // 64 KB

/// Distance, in lines, between two entries of the sparse line index
///
/// Every chunk read seeks to the closest preceding indexed line and then
/// skips at most this many lines.
pub const LINE_INDEX_STRIDE: u64 = 1024;

// ============================================================================
// Output Configuration
// ============================================================================

/// Header row of the result artifact
pub const RESULT_HEADER: [&str; 2] = ["KEY", "DATE"];

/// Date format used by the source table, the key stores and the result file
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Directory (under the work dir) holding one accumulation file per key
pub const KEY_STORE_DIR: &str = "keys";
