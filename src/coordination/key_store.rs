use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::config::KEY_STORE_DIR;
use crate::error::{Error, Result};
use crate::formats::{DelimitedConfig, Interval, Record};

/// Trait for per-key accumulation storage
///
/// Every operation is serialized per key; operations on different keys never
/// wait on each other.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Append intervals to the key's store, creating it on first use
    async fn append(&self, key: &str, intervals: &[Interval]) -> Result<()>;

    /// Read every interval appended so far, in arrival order
    /// A key that was never written yields an empty list
    async fn read_all(&self, key: &str) -> Result<Vec<Interval>>;

    /// Remove the key's store once it has been reconciled
    async fn discard(&self, key: &str) -> Result<()>;
}

/// Local filesystem implementation of KeyStore
///
/// Directory structure:
///   {work_dir}/keys/{encoded key}.csv
///
/// Files hold `key,start,end` rows, the same shape as the source table.
pub struct LocalKeyStore {
    keys_dir: PathBuf,
    config: DelimitedConfig,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl LocalKeyStore {
    /// Create the store under `work_dir`, creating its directory
    pub async fn open(work_dir: impl AsRef<Path>) -> Result<Self> {
        let keys_dir = work_dir.as_ref().join(KEY_STORE_DIR);
        fs::create_dir_all(&keys_dir)
            .await
            .map_err(|source| Error::StoreOpen {
                path: keys_dir.clone(),
                source,
            })?;

        Ok(Self {
            keys_dir,
            config: DelimitedConfig::csv(),
            locks: DashMap::new(),
        })
    }

    /// Get the accumulation file path for a key
    fn key_path(&self, key: &str) -> PathBuf {
        self.keys_dir.join(encode_file_name(key))
    }

    /// Get (or lazily create) the lock guarding a key's file
    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        // Clone out of the map so no shard guard is held across an await
        Arc::clone(self.locks.entry(key.to_string()).or_default().value())
    }

    fn encode(&self, key: &str, intervals: &[Interval]) -> Result<Vec<u8>> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.config.delimiter)
            .quote(self.config.quote)
            .from_writer(Vec::new());

        for interval in intervals {
            writer
                .write_record(interval.encode())
                .map_err(|e| Error::storage(key, e.into()))?;
        }

        writer
            .into_inner()
            .map_err(|e| Error::storage(key, e.into_error()))
    }

    fn decode(&self, key: &str, bytes: &[u8]) -> Result<Vec<Interval>> {
        let corrupt = |reason: String| {
            Error::storage(
                key,
                std::io::Error::new(std::io::ErrorKind::InvalidData, reason),
            )
        };

        let mut reader = self.config.reader(bytes);
        let mut intervals = Vec::new();

        for result in reader.records() {
            let row = result.map_err(|e| corrupt(e.to_string()))?;
            let record = Record {
                line: row.position().map(|p| p.line()).unwrap_or(0),
                fields: row.iter().map(|s| s.to_string()).collect(),
            };
            let interval = Interval::decode(&record).map_err(|e| corrupt(e.to_string()))?;
            intervals.push(interval);
        }

        Ok(intervals)
    }
}

#[async_trait]
impl KeyStore for LocalKeyStore {
    async fn append(&self, key: &str, intervals: &[Interval]) -> Result<()> {
        if intervals.is_empty() {
            return Ok(());
        }

        let bytes = self.encode(key, intervals)?;
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.key_path(key))
            .await
            .map_err(|e| Error::storage(key, e))?;

        file.write_all(&bytes)
            .await
            .map_err(|e| Error::storage(key, e))?;
        file.flush().await.map_err(|e| Error::storage(key, e))?;

        Ok(())
    }

    async fn read_all(&self, key: &str) -> Result<Vec<Interval>> {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        let bytes = match fs::read(self.key_path(key)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::storage(key, e)),
        };

        self.decode(key, &bytes)
    }

    async fn discard(&self, key: &str) -> Result<()> {
        let lock = self.lock_for(key);
        {
            let _guard = lock.lock().await;
            match fs::remove_file(self.key_path(key)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::storage(key, e)),
            }
        }

        self.locks.remove(key);
        Ok(())
    }
}

/// Map a key to a distinct, filesystem-safe file name
///
/// ASCII alphanumerics, `-` and `.` pass through; every other byte (including
/// `_`, the escape character) becomes `_XX`.
fn encode_file_name(key: &str) -> String {
    let mut name = String::with_capacity(key.len() + 4);
    for byte in key.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' => name.push(byte as char),
            _ => name.push_str(&format!("_{byte:02X}")),
        }
    }
    name.push_str(".csv");
    name
}
