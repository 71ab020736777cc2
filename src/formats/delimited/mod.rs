//! Delimited (CSV) row source

pub mod reader;

pub use reader::GenericDelimitedReader;
