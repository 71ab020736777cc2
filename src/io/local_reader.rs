use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::byte_reader::ByteReader;
use crate::error::{Error, Result};

/// ByteReader implementation for local files
#[derive(Clone)]
pub struct LocalFileByteReader {
    file_path: PathBuf,
}

impl LocalFileByteReader {
    pub fn new(file_path: impl AsRef<Path>) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
        }
    }

    fn open_error(&self, source: std::io::Error) -> Error {
        Error::read_failure(
            format!("Failed to open source file {}", self.file_path.display()),
            source,
        )
    }
}

#[async_trait]
impl ByteReader for LocalFileByteReader {
    async fn size(&self) -> Result<u64> {
        let metadata = tokio::fs::metadata(&self.file_path)
            .await
            .map_err(|e| self.open_error(e))?;
        Ok(metadata.len())
    }

    async fn read_range(&self, start: u64, end: u64) -> Result<Vec<u8>> {
        if start >= end {
            return Ok(Vec::new());
        }

        let mut file = File::open(&self.file_path)
            .await
            .map_err(|e| self.open_error(e))?;
        file.seek(std::io::SeekFrom::Start(start))
            .await
            .map_err(|e| Error::read_failure(format!("Failed to seek to byte {start}"), e))?;

        // take() stops at EOF, so a range past the end yields a short buffer
        let mut buffer = Vec::with_capacity((end - start) as usize);
        file.take(end - start)
            .read_to_end(&mut buffer)
            .await
            .map_err(|e| {
                Error::read_failure(format!("Failed to read bytes {start}..{end}"), e)
            })?;

        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_read_range_clips_at_eof() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "0123456789").unwrap();
        temp_file.flush().unwrap();

        let reader = LocalFileByteReader::new(temp_file.path());
        assert_eq!(reader.size().await.unwrap(), 10);
        assert_eq!(reader.read_range(2, 5).await.unwrap(), b"234");
        assert_eq!(reader.read_range(8, 20).await.unwrap(), b"89");
        assert!(reader.read_range(5, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_source_error() {
        let reader = LocalFileByteReader::new("/definitely/not/here.csv");
        let err = reader.size().await.unwrap_err();
        assert!(matches!(err, Error::Source { .. }));
    }
}
