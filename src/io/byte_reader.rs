use async_trait::async_trait;

use crate::error::Result;

/// Abstraction for byte-level I/O operations
/// This trait lets the line index and the delimited reader work against any
/// byte source (a local file in production, an in-memory buffer in tests)
#[async_trait]
pub trait ByteReader: Send + Sync {
    /// Get the total size of the file/object in bytes
    async fn size(&self) -> Result<u64>;

    /// Read a range of bytes from the file/object
    /// Returns the bytes read (may be less than requested if EOF is reached)
    async fn read_range(&self, start: u64, end: u64) -> Result<Vec<u8>>;
}
