//! Row sources, the interval row codec and the result writer

pub mod delimited;
pub mod interval;
pub mod reader;
pub mod result_writer;

pub use delimited::GenericDelimitedReader;
pub use interval::Interval;
pub use reader::{Chunk, ChunkData, DelimitedConfig, FileMetadata, FileReader, Record};
pub use result_writer::{CsvResultWriter, ResultSink};
