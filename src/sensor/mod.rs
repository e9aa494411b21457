use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub mod home_assistant;

pub use home_assistant::HomeAssistantSensor;

/// Latest plate reported by a sensor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorReading {
    /// Plate text as recognized, not yet normalized
    pub plate: String,
    /// When the sensor state last changed, if it reports that
    pub last_changed: Option<DateTime<Utc>>,
}

/// A state-style endpoint holding the most recent recognized plate.
#[async_trait]
pub trait SensorSource: Send + Sync {
    /// `Ok(None)` when the sensor currently reports no plate.
    async fn latest(&self) -> Result<Option<SensorReading>>;
}
