pub mod ingestor;
pub mod plate_locks;
pub mod poller;

pub use ingestor::{should_refresh, DetectionEvent, DetectionIngestor, IngestOutcome, IngestSettings};
pub use plate_locks::PlateLocks;
pub use poller::PollingLoop;
