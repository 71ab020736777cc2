use async_trait::async_trait;

use crate::error::Result;

/// Metadata about the source table
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub file_size_bytes: u64,
    /// Number of lines, header included
    pub total_lines: u64,
}

/// A chunk of the table, defined by 1-based line positions `[start_pos, end_pos)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_id: u32,
    pub start_pos: u64,
    pub end_pos: u64,
}

impl Chunk {
    pub fn len(&self) -> u64 {
        self.end_pos - self.start_pos
    }

    pub fn is_empty(&self) -> bool {
        self.start_pos >= self.end_pos
    }
}

/// A single raw row from the table, tagged with its 1-based line number
#[derive(Debug, Clone)]
pub struct Record {
    pub line: u64,
    pub fields: Vec<String>,
}

/// Data from a chunk read
#[derive(Debug)]
pub struct ChunkData {
    pub records: Vec<Record>,
    pub bytes_read: u64,
}

/// Trait for reading the source table chunk by chunk
#[async_trait]
pub trait FileReader: Send + Sync {
    /// Get metadata about the file
    async fn metadata(&self) -> Result<FileMetadata>;

    /// Read the rows of a specific chunk, in line order
    /// Lines past the end of the file are simply absent from the result
    async fn read_chunk(&self, chunk: &Chunk) -> Result<ChunkData>;
}

/// Configuration for delimited file parsing
#[derive(Debug, Clone)]
pub struct DelimitedConfig {
    pub delimiter: u8,
    pub quote: u8,
}

impl Default for DelimitedConfig {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
        }
    }
}

impl DelimitedConfig {
    pub fn csv() -> Self {
        Self::default()
    }

    /// Build a csv reader over an in-memory buffer of headerless rows
    pub(crate) fn reader<'a>(&self, buffer: &'a [u8]) -> csv::Reader<&'a [u8]> {
        csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .quote(self.quote)
            .has_headers(false) // Headers are excluded by line position
            .flexible(true) // The end date column may be missing entirely
            .from_reader(buffer)
    }
}
