use crate::config::{LINE_INDEX_STRIDE, READ_BLOCK_SIZE};
use crate::error::Result;

use super::byte_reader::ByteReader;

/// Sparse index of line start offsets for a line-oriented file
///
/// Lines are 1-indexed. `checkpoints[i]` is the byte offset at which line
/// `i * stride + 1` starts, so locating any line costs one seek plus a scan of
/// at most `stride` lines instead of a scan from the top of the file.
#[derive(Debug, Clone)]
pub struct LineIndex {
    stride: u64,
    block_size: usize,
    checkpoints: Vec<u64>,
    total_lines: u64,
    file_size: u64,
}

impl LineIndex {
    /// Scan the whole source once and build the index with default settings
    pub async fn build(reader: &dyn ByteReader) -> Result<Self> {
        Self::build_with(reader, LINE_INDEX_STRIDE, READ_BLOCK_SIZE).await
    }

    pub async fn build_with(
        reader: &dyn ByteReader,
        stride: u64,
        block_size: usize,
    ) -> Result<Self> {
        let stride = stride.max(1);
        let block_size = block_size.max(1);
        let file_size = reader.size().await?;

        let mut checkpoints = vec![0u64];
        let mut newlines = 0u64;
        let mut offset = 0u64;
        let mut last_byte = None;

        while offset < file_size {
            let end_offset = std::cmp::min(offset + block_size as u64, file_size);
            let buffer = reader.read_range(offset, end_offset).await?;

            if buffer.is_empty() {
                break;
            }

            for (pos, _) in buffer.iter().enumerate().filter(|(_, b)| **b == b'\n') {
                newlines += 1;
                if newlines % stride == 0 {
                    checkpoints.push(offset + pos as u64 + 1);
                }
            }

            last_byte = buffer.last().copied();
            offset += buffer.len() as u64;
        }

        // A trailing line without a newline still counts
        let total_lines = match last_byte {
            None => 0,
            Some(b'\n') => newlines,
            Some(_) => newlines + 1,
        };

        Ok(Self {
            stride,
            block_size,
            checkpoints,
            total_lines,
            file_size,
        })
    }

    /// Number of lines in the file, header included
    pub fn total_lines(&self) -> u64 {
        self.total_lines
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Read the raw bytes of lines `[start_line, end_line)`
    ///
    /// The range is clipped to the end of the file; a range entirely past the
    /// end yields an empty buffer.
    pub async fn read_lines(
        &self,
        reader: &dyn ByteReader,
        start_line: u64,
        end_line: u64,
    ) -> Result<Vec<u8>> {
        if start_line == 0 || start_line >= end_line || start_line > self.total_lines {
            return Ok(Vec::new());
        }

        let slot = (((start_line - 1) / self.stride) as usize).min(self.checkpoints.len() - 1);
        let base_line = slot as u64 * self.stride + 1;

        let start = self
            .seek_line(reader, base_line, self.checkpoints[slot], start_line)
            .await?;
        let end = self.seek_line(reader, start_line, start, end_line).await?;

        if start >= end {
            return Ok(Vec::new());
        }
        reader.read_range(start, end).await
    }

    /// Walk forward from `offset` (the start of `line`) to the start of `target`
    async fn seek_line(
        &self,
        reader: &dyn ByteReader,
        mut line: u64,
        mut offset: u64,
        target: u64,
    ) -> Result<u64> {
        while line < target && offset < self.file_size {
            let end_offset = std::cmp::min(offset + self.block_size as u64, self.file_size);
            let buffer = reader.read_range(offset, end_offset).await?;

            if buffer.is_empty() {
                return Ok(self.file_size);
            }

            for (pos, &byte) in buffer.iter().enumerate() {
                if byte == b'\n' {
                    line += 1;
                    if line == target {
                        return Ok(offset + pos as u64 + 1);
                    }
                }
            }

            offset += buffer.len() as u64;
        }

        Ok(offset.min(self.file_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::byte_reader::testing::MockByteReader;

    const DATA: &[u8] = b"header\nline2\nline3\nline4\nline5\nline6\n";

    #[tokio::test]
    async fn test_counts_lines_with_and_without_trailing_newline() {
        let reader = MockByteReader::new(DATA);
        let index = LineIndex::build_with(&reader, 2, 4).await.unwrap();
        assert_eq!(index.total_lines(), 6);

        let reader = MockByteReader::new(b"header\nline2");
        let index = LineIndex::build_with(&reader, 2, 4).await.unwrap();
        assert_eq!(index.total_lines(), 2);

        let reader = MockByteReader::new(b"");
        let index = LineIndex::build(&reader).await.unwrap();
        assert_eq!(index.total_lines(), 0);
    }

    #[tokio::test]
    async fn test_read_lines_across_checkpoints_and_blocks() {
        let reader = MockByteReader::new(DATA);
        // Tiny stride and block size force both checkpoint lookup and block-spanning scans
        let index = LineIndex::build_with(&reader, 2, 3).await.unwrap();

        let bytes = index.read_lines(&reader, 2, 4).await.unwrap();
        assert_eq!(bytes, b"line2\nline3\n");

        let bytes = index.read_lines(&reader, 5, 6).await.unwrap();
        assert_eq!(bytes, b"line5\n");

        let bytes = index.read_lines(&reader, 1, 2).await.unwrap();
        assert_eq!(bytes, b"header\n");
    }

    #[tokio::test]
    async fn test_read_lines_clips_past_eof() {
        let reader = MockByteReader::new(DATA);
        let index = LineIndex::build_with(&reader, 4, 8).await.unwrap();

        let bytes = index.read_lines(&reader, 6, 20).await.unwrap();
        assert_eq!(bytes, b"line6\n");

        assert!(index.read_lines(&reader, 7, 9).await.unwrap().is_empty());
        assert!(index.read_lines(&reader, 3, 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_last_line_without_newline() {
        let reader = MockByteReader::new(b"h\na\nb");
        let index = LineIndex::build_with(&reader, 1, 2).await.unwrap();

        let bytes = index.read_lines(&reader, 2, 4).await.unwrap();
        assert_eq!(bytes, b"a\nb");
    }
}
