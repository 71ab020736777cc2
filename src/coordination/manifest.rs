use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{Error, Result};
use crate::formats::Chunk;

/// Information about a chunk to be processed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub chunk_id: u32,
    pub start_pos: u64,
    pub end_pos: u64,
    pub wave: usize,
}

impl ChunkInfo {
    pub fn new(chunk: &Chunk, wave: usize) -> Self {
        Self {
            chunk_id: chunk.chunk_id,
            start_pos: chunk.start_pos,
            end_pos: chunk.end_pos,
            wave,
        }
    }
}

/// The manifest file structure written by the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestFile {
    pub job_id: String,
    pub created_at: String, // ISO 8601
    pub source_path: String,
    /// Table lines including the header
    pub total_lines: u64,
    pub chunk_size: u64,
    pub wave_size: usize,
    pub worker_count: usize,
    pub chunks: Vec<ChunkInfo>,
}

/// Outcome of a chunk, as recorded in its result file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Success,
    Failed,
}

/// The result file structure written for every completed chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkResultFile {
    pub chunk_id: u32,
    pub wave: usize,
    pub status: ChunkStatus,
    pub records_read: u64,
    pub keys_touched: u64,
    pub intervals_appended: u64,
    pub started_at: String,   // ISO 8601
    pub completed_at: String, // ISO 8601
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Trait for manifest storage operations
///
/// The manifest and chunk results are bookkeeping for the run: they are read
/// back to build the run summary and left behind for debugging when a run fails.
#[async_trait::async_trait]
pub trait ManifestStorage: Send + Sync {
    /// Write the manifest file for a job
    async fn write_manifest(&self, job_id: &str, manifest: &ManifestFile) -> Result<()>;

    /// Read the manifest file for a job
    async fn read_manifest(&self, job_id: &str) -> Result<ManifestFile>;

    /// Write a result file for a completed chunk
    async fn write_result(
        &self,
        job_id: &str,
        chunk_id: u32,
        result: &ChunkResultFile,
    ) -> Result<()>;

    /// Read a result file for a completed chunk
    async fn read_result(&self, job_id: &str, chunk_id: u32) -> Result<ChunkResultFile>;
}

/// Local filesystem implementation of ManifestStorage
///
/// Directory structure:
///   {base_dir}/jobs/{job_id}/manifest.json
///   {base_dir}/jobs/{job_id}/chunks/{chunk_id:04}.result
pub struct LocalManifestStorage {
    base_dir: PathBuf,
}

impl LocalManifestStorage {
    /// Create a new LocalManifestStorage with the given base directory
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the job directory path
    fn job_dir(&self, job_id: &str) -> PathBuf {
        self.base_dir.join("jobs").join(job_id)
    }

    /// Get the chunks directory path
    fn chunks_dir(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join("chunks")
    }

    /// Get the manifest file path
    fn manifest_path(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join("manifest.json")
    }

    /// Get the result file path for a chunk
    fn result_path(&self, job_id: &str, chunk_id: u32) -> PathBuf {
        self.chunks_dir(job_id)
            .join(format!("{:04}.result", chunk_id))
    }
}

#[async_trait::async_trait]
impl ManifestStorage for LocalManifestStorage {
    async fn write_manifest(&self, job_id: &str, manifest: &ManifestFile) -> Result<()> {
        // Creating the chunks directory also creates the job directory
        let chunks_dir = self.chunks_dir(job_id);
        fs::create_dir_all(&chunks_dir)
            .await
            .map_err(|e| Error::manifest("Failed to create manifest directory", e))?;

        let json = serde_json::to_string_pretty(manifest)
            .map_err(|e| Error::manifest("Failed to serialize manifest", e))?;

        fs::write(self.manifest_path(job_id), json)
            .await
            .map_err(|e| Error::manifest("Failed to write manifest file", e))?;

        Ok(())
    }

    async fn read_manifest(&self, job_id: &str) -> Result<ManifestFile> {
        let contents = fs::read_to_string(self.manifest_path(job_id))
            .await
            .map_err(|e| Error::manifest("Failed to read manifest file", e))?;

        serde_json::from_str(&contents)
            .map_err(|e| Error::manifest("Failed to parse manifest file", e))
    }

    async fn write_result(
        &self,
        job_id: &str,
        chunk_id: u32,
        result: &ChunkResultFile,
    ) -> Result<()> {
        let json = serde_json::to_string_pretty(result)
            .map_err(|e| Error::manifest("Failed to serialize chunk result", e))?;

        fs::write(self.result_path(job_id, chunk_id), json)
            .await
            .map_err(|e| Error::manifest(format!("Failed to write result of chunk {chunk_id}"), e))?;

        Ok(())
    }

    async fn read_result(&self, job_id: &str, chunk_id: u32) -> Result<ChunkResultFile> {
        let contents = fs::read_to_string(self.result_path(job_id, chunk_id))
            .await
            .map_err(|e| Error::manifest(format!("Failed to read result of chunk {chunk_id}"), e))?;

        serde_json::from_str(&contents)
            .map_err(|e| Error::manifest(format!("Failed to parse result of chunk {chunk_id}"), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manifest() -> ManifestFile {
        ManifestFile {
            job_id: "test-job".to_string(),
            created_at: "2025-12-03T10:00:00Z".to_string(),
            source_path: "/data/phones.csv".to_string(),
            total_lines: 6,
            chunk_size: 2,
            wave_size: 3,
            worker_count: 10,
            chunks: vec![ChunkInfo {
                chunk_id: 0,
                start_pos: 2,
                end_pos: 4,
                wave: 0,
            }],
        }
    }

    #[tokio::test]
    async fn test_manifest_round_trip() {
        let dir = TempDir::new().unwrap();
        let storage = LocalManifestStorage::new(dir.path().to_path_buf());

        storage.write_manifest("test-job", &manifest()).await.unwrap();
        let read = storage.read_manifest("test-job").await.unwrap();

        assert_eq!(read.job_id, "test-job");
        assert_eq!(read.chunks.len(), 1);
        assert_eq!(read.chunks[0].end_pos, 4);
        assert!(dir.path().join("jobs/test-job/chunks").is_dir());
    }

    #[tokio::test]
    async fn test_result_status_serialization() {
        let dir = TempDir::new().unwrap();
        let storage = LocalManifestStorage::new(dir.path().to_path_buf());
        storage.write_manifest("test-job", &manifest()).await.unwrap();

        let result = ChunkResultFile {
            chunk_id: 0,
            wave: 0,
            status: ChunkStatus::Failed,
            records_read: 0,
            keys_touched: 0,
            intervals_appended: 0,
            started_at: "2025-12-03T10:00:00Z".to_string(),
            completed_at: "2025-12-03T10:00:01Z".to_string(),
            duration_ms: 1000,
            error: Some("bad date".to_string()),
        };
        storage.write_result("test-job", 0, &result).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join("jobs/test-job/chunks/0000.result"))
            .unwrap();
        assert!(raw.contains("\"status\": \"failed\""));

        let read = storage.read_result("test-job", 0).await.unwrap();
        assert_eq!(read.status, ChunkStatus::Failed);
        assert_eq!(read.error.as_deref(), Some("bad date"));
    }

    #[tokio::test]
    async fn test_missing_result_is_manifest_error() {
        let dir = TempDir::new().unwrap();
        let storage = LocalManifestStorage::new(dir.path().to_path_buf());
        let err = storage.read_result("nope", 3).await.unwrap_err();
        assert!(matches!(err, Error::Manifest { .. }));
    }
}
