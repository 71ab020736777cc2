// Public API - only expose the runner module
pub mod runner;

// Internal modules - organized by subsystem
mod config;
mod coordination;
mod error;
mod formats;
mod io;
mod telemetry;

pub use error::Error;
