use async_trait::async_trait;
use tokio::sync::OnceCell;

use crate::error::{Error, Result};
use crate::formats::reader::{Chunk, ChunkData, DelimitedConfig, FileMetadata, FileReader, Record};
use crate::io::{ByteReader, LineIndex};

/// Generic delimited file reader that works with any ByteReader implementation
/// The line index is built lazily on first use and shared by every chunk read.
pub struct GenericDelimitedReader<R: ByteReader> {
    reader: R,
    config: DelimitedConfig,
    index: OnceCell<LineIndex>,
}

impl<R: ByteReader> GenericDelimitedReader<R> {
    pub fn new(reader: R, config: DelimitedConfig) -> Self {
        Self {
            reader,
            config,
            index: OnceCell::new(),
        }
    }

    async fn index(&self) -> Result<&LineIndex> {
        self.index
            .get_or_try_init(|| async {
                let index = LineIndex::build(&self.reader).await?;
                tracing::debug!(
                    "Indexed {} lines ({} bytes)",
                    index.total_lines(),
                    index.file_size()
                );
                Ok::<_, Error>(index)
            })
            .await
    }
}

#[async_trait]
impl<R: ByteReader + 'static> FileReader for GenericDelimitedReader<R> {
    async fn metadata(&self) -> Result<FileMetadata> {
        let index = self.index().await?;

        Ok(FileMetadata {
            file_size_bytes: index.file_size(),
            total_lines: index.total_lines(),
        })
    }

    async fn read_chunk(&self, chunk: &Chunk) -> Result<ChunkData> {
        let index = self.index().await?;
        let buffer = index
            .read_lines(&self.reader, chunk.start_pos, chunk.end_pos)
            .await?;

        let mut csv_reader = self.config.reader(buffer.as_slice());
        let mut records = Vec::new();

        for result in csv_reader.records() {
            // Positions are 1-based lines within the buffer; blank lines are skipped
            // by the csv reader but still counted here
            let record = result.map_err(|e| Error::RecordParse {
                line: e
                    .position()
                    .map(|p| chunk.start_pos + p.line() - 1)
                    .unwrap_or(chunk.start_pos),
                reason: e.to_string(),
            })?;

            let line = record
                .position()
                .map(|p| chunk.start_pos + p.line() - 1)
                .unwrap_or(chunk.start_pos);

            records.push(Record {
                line,
                fields: record.iter().map(|s| s.to_string()).collect(),
            });
        }

        Ok(ChunkData {
            records,
            bytes_read: buffer.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::LocalFileByteReader;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn table(rows: &[&str]) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "PHONE_NUMBER,ACTIVATION_DATE,DEACTIVATION_DATE").unwrap();
        for row in rows {
            writeln!(temp_file, "{row}").unwrap();
        }
        temp_file.flush().unwrap();
        temp_file
    }

    #[tokio::test]
    async fn test_metadata_counts_header() {
        let temp_file = table(&["P1,2020-01-01,2020-02-01", "P2,2020-01-01,"]);
        let reader = GenericDelimitedReader::new(
            LocalFileByteReader::new(temp_file.path()),
            DelimitedConfig::csv(),
        );

        let metadata = reader.metadata().await.unwrap();
        assert_eq!(metadata.total_lines, 3);
        assert!(metadata.file_size_bytes > 0);
    }

    #[tokio::test]
    async fn test_read_chunk_tags_line_numbers() {
        let temp_file = table(&[
            "P1,2020-01-01,2020-02-01",
            "P1,2020-02-01,",
            "P2,2020-01-01,2020-02-01",
        ]);
        let reader = GenericDelimitedReader::new(
            LocalFileByteReader::new(temp_file.path()),
            DelimitedConfig::csv(),
        );

        let chunk = Chunk {
            chunk_id: 1,
            start_pos: 3,
            end_pos: 5,
        };
        let data = reader.read_chunk(&chunk).await.unwrap();

        assert_eq!(data.records.len(), 2);
        assert_eq!(data.records[0].line, 3);
        assert_eq!(data.records[0].fields, vec!["P1", "2020-02-01", ""]);
        assert_eq!(data.records[1].line, 4);
        assert_eq!(data.records[1].fields[0], "P2");
    }

    #[tokio::test]
    async fn test_read_chunk_past_eof_is_empty() {
        let temp_file = table(&["P1,2020-01-01,"]);
        let reader = GenericDelimitedReader::new(
            LocalFileByteReader::new(temp_file.path()),
            DelimitedConfig::csv(),
        );

        let chunk = Chunk {
            chunk_id: 0,
            start_pos: 3,
            end_pos: 5,
        };
        let data = reader.read_chunk(&chunk).await.unwrap();
        assert!(data.records.is_empty());
        assert_eq!(data.bytes_read, 0);
    }
}
