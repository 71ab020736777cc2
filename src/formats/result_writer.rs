use std::fs::File;
use std::path::{Path, PathBuf};

use crate::config::{DATE_FORMAT, RESULT_HEADER};
use crate::coordination::reconciler::ReconciledResult;
use crate::error::{Error, Result};

/// Destination for reconciled results
///
/// Implementations are driven from a single blocking writer task, so they do
/// not need internal synchronization.
pub trait ResultSink: Send {
    fn write(&mut self, result: &ReconciledResult) -> Result<()>;

    /// Flush and close the sink, returning the number of rows written
    fn finish(self: Box<Self>) -> Result<u64>;
}

/// Writes `KEY,DATE` rows to a CSV file
pub struct CsvResultWriter {
    path: PathBuf,
    writer: csv::Writer<File>,
    rows: u64,
}

impl CsvResultWriter {
    /// Create (or truncate) the result file and write the header row
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut writer = csv::Writer::from_path(&path).map_err(|source| Error::ResultSink {
            path: path.clone(),
            source,
        })?;

        writer
            .write_record(RESULT_HEADER)
            .map_err(|source| Error::ResultSink {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            path,
            writer,
            rows: 0,
        })
    }

    fn sink_error(&self, source: csv::Error) -> Error {
        Error::ResultSink {
            path: self.path.clone(),
            source,
        }
    }
}

impl ResultSink for CsvResultWriter {
    fn write(&mut self, result: &ReconciledResult) -> Result<()> {
        let date = result.date.format(DATE_FORMAT).to_string();
        self.writer
            .write_record([result.key.as_str(), date.as_str()])
            .map_err(|e| self.sink_error(e))?;
        self.rows += 1;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<u64> {
        self.writer
            .flush()
            .map_err(|e| self.sink_error(csv::Error::from(e)))?;
        Ok(self.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::interval::date;
    use tempfile::TempDir;

    #[test]
    fn test_writes_header_and_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("result.csv");

        let mut sink: Box<dyn ResultSink> = Box::new(CsvResultWriter::create(&path).unwrap());
        sink.write(&ReconciledResult {
            key: "P1".to_string(),
            date: date("2020-01-01"),
        })
        .unwrap();
        sink.write(&ReconciledResult {
            key: "P2".to_string(),
            date: date("2021-03-04"),
        })
        .unwrap();
        assert_eq!(sink.finish().unwrap(), 2);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "KEY,DATE\nP1,2020-01-01\nP2,2021-03-04\n");
    }

    #[test]
    fn test_header_only_when_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.csv");

        let sink: Box<dyn ResultSink> = Box::new(CsvResultWriter::create(&path).unwrap());
        assert_eq!(sink.finish().unwrap(), 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "KEY,DATE\n");
    }
}
