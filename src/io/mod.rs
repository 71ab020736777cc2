//! I/O abstraction layer for reading bytes and lines from the source table

pub mod byte_reader;
pub mod line_index;
pub mod local_reader;

pub use byte_reader::ByteReader;
pub use line_index::LineIndex;
pub use local_reader::LocalFileByteReader;
