use crate::sensor::SensorSource;
use crate::services::ingestor::{DetectionEvent, DetectionIngestor, IngestOutcome};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Shortest period handed to `tokio::time::interval`, which rejects zero
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Polls the sensor at a fixed interval and feeds every plate it shows to the
/// ingestor. A plate that stays on the sensor is ingested on every tick, so
/// each poll counts as a sighting.
pub struct PollingLoop {
    sensor: Arc<dyn SensorSource>,
    ingestor: Arc<DetectionIngestor>,
    poll_interval: Duration,
}

impl PollingLoop {
    pub fn new(
        sensor: Arc<dyn SensorSource>,
        ingestor: Arc<DetectionIngestor>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            sensor,
            ingestor,
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
        }
    }

    /// Run until `shutdown` fires. Cancellation is only observed between
    /// ticks, so an ingestion in progress always finishes.
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Starting sensor poll loop every {:?}", self.poll_interval);

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.poll_once().await;
        }

        info!("Sensor poll loop stopped");
    }

    /// One fetch and, if a plate is showing, one ingestion.
    pub async fn poll_once(&self) -> Option<IngestOutcome> {
        let reading = match self.sensor.latest().await {
            Ok(Some(reading)) => reading,
            Ok(None) => {
                debug!("No plate on sensor");
                return None;
            }
            Err(e) => {
                error!("Sensor poll failed: {:#}", e);
                return None;
            }
        };

        info!("License plate detected: {}", reading.plate);
        if let Some(changed) = reading.last_changed {
            debug!("Sensor state for {} last changed at {}", reading.plate, changed);
        }
        let event = DetectionEvent::new(&reading.plate, Utc::now());

        match self.ingestor.ingest(event).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!("Dropping sensor detection: {:#}", e);
                None
            }
        }
    }
}
