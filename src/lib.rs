pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod plate;
pub mod recorder;
pub mod registry;
pub mod sensor;
pub mod services;

#[cfg(test)]
mod testing;

// Re-export main components for easier use
pub use error::Error;
pub use plate::{NormalizedPlate, PlateNormalizer};
pub use services::{DetectionEvent, DetectionIngestor, IngestOutcome, PollingLoop};
