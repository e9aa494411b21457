use crate::config::Config;
use crate::db::models::{PlateRecord, VehicleAttributes};
use crate::db::{PlateStore, PlateTransaction};
use crate::plate::{Normalization, NormalizedPlate, PlateNormalizer, RejectReason};
use crate::recorder::{CaptureOutcome, ClipHandle, VideoCaptureManager};
use crate::registry::{RegistryLookup, VehicleRegistry};
use crate::services::plate_locks::PlateLocks;
use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;

/// One plate sighting, from the sensor poll or a push request
#[derive(Debug, Clone)]
pub struct DetectionEvent {
    pub raw_plate: String,
    pub capture_time: DateTime<Utc>,
    /// Still image supplied with the detection; when absent one is grabbed
    /// from the camera.
    pub snapshot: Option<Vec<u8>>,
}

impl DetectionEvent {
    pub fn new(raw_plate: &str, capture_time: DateTime<Utc>) -> Self {
        Self {
            raw_plate: raw_plate.to_string(),
            capture_time,
            snapshot: None,
        }
    }

    pub fn with_snapshot(mut self, snapshot: Vec<u8>) -> Self {
        self.snapshot = Some(snapshot);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Rejected(RejectReason),
    Inserted(NormalizedPlate),
    Updated(NormalizedPlate),
}

/// Registry data is refreshed only when the last sighting is older than
/// `staleness`.
pub fn should_refresh(
    last_updated: DateTime<Utc>,
    now: DateTime<Utc>,
    staleness: chrono::Duration,
) -> bool {
    now - last_updated > staleness
}

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub staleness: chrono::Duration,
    pub capture_clips: bool,
    pub clip_duration: Duration,
    pub snapshot_delay: Duration,
}

impl IngestSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            staleness: config.ingest.staleness(),
            capture_clips: config.video.capture_enabled,
            clip_duration: config.video.clip_duration(),
            snapshot_delay: config.video.snapshot_delay(),
        }
    }
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Files touched by one ingestion, undone if its transaction does not commit
#[derive(Debug, Default)]
struct SideEffects {
    new_clip: Option<ClipHandle>,
    deleted_clip: Option<ClipHandle>,
}

/// Turns detection events into plate records.
pub struct DetectionIngestor {
    normalizer: PlateNormalizer,
    store: Arc<dyn PlateStore>,
    registry: Arc<dyn VehicleRegistry>,
    video: VideoCaptureManager,
    locks: PlateLocks,
    settings: IngestSettings,
}

impl DetectionIngestor {
    pub fn new(
        normalizer: PlateNormalizer,
        store: Arc<dyn PlateStore>,
        registry: Arc<dyn VehicleRegistry>,
        video: VideoCaptureManager,
        settings: IngestSettings,
    ) -> Self {
        Self {
            normalizer,
            store,
            registry,
            video,
            locks: PlateLocks::new(),
            settings,
        }
    }

    /// Process one detection. `Err` means nothing was persisted.
    pub async fn ingest(&self, event: DetectionEvent) -> Result<IngestOutcome> {
        let plate = match self.normalizer.normalize(&event.raw_plate) {
            Normalization::Normalized(plate) => plate,
            Normalization::Rejected(reason) => {
                warn!("Rejected plate {:?}: {}", event.raw_plate, reason);
                return Ok(IngestOutcome::Rejected(reason));
            }
        };
        if plate.as_str() != event.raw_plate {
            debug!("Corrected {:?} to {}", event.raw_plate, plate);
        }

        let _guard = self.locks.lock(&plate).await;

        let mut tx = self.store.begin().await?;
        let mut effects = SideEffects::default();

        let applied = self.apply(tx.as_mut(), &plate, &event, &mut effects).await;
        let result = match applied {
            Ok(outcome) => tx.commit().await.map(|()| outcome),
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!("[{}] Rollback failed: {}", plate, rollback);
                }
                Err(e)
            }
        };

        match &result {
            Ok(IngestOutcome::Inserted(_)) => info!("[{}] New plate recorded", plate),
            Ok(_) => {}
            Err(e) => {
                error!("[{}] Ingestion failed, nothing persisted: {}", plate, e);
                self.compensate(&plate, &effects).await;
            }
        }
        result
    }

    async fn apply(
        &self,
        tx: &mut dyn PlateTransaction,
        plate: &NormalizedPlate,
        event: &DetectionEvent,
        effects: &mut SideEffects,
    ) -> Result<IngestOutcome> {
        match tx.find_for_update(plate).await? {
            None => self.insert_new(tx, plate, event, effects).await,
            Some(record) => self.update_existing(tx, record, event, effects).await,
        }
    }

    async fn insert_new(
        &self,
        tx: &mut dyn PlateTransaction,
        plate: &NormalizedPlate,
        event: &DetectionEvent,
        effects: &mut SideEffects,
    ) -> Result<IngestOutcome> {
        let snapshot = self.still_image(plate, event).await;
        let clip = self.record_clip(plate, event.capture_time, effects).await;
        let vehicle = self
            .enrich(plate)
            .await
            .unwrap_or_else(VehicleAttributes::unknown);

        let record =
            PlateRecord::first_sighting(plate.clone(), event.capture_time, snapshot, clip, vehicle);
        tx.insert(&record).await?;

        Ok(IngestOutcome::Inserted(plate.clone()))
    }

    async fn update_existing(
        &self,
        tx: &mut dyn PlateTransaction,
        mut record: PlateRecord,
        event: &DetectionEvent,
        effects: &mut SideEffects,
    ) -> Result<IngestOutcome> {
        let plate = record.plate_number.clone();

        if should_refresh(
            record.recent_capture_time,
            event.capture_time,
            self.settings.staleness,
        ) {
            info!(
                "[{}] Enrichment from {} is stale, refreshing",
                plate, record.recent_capture_time
            );
            if let Some(vehicle) = self.enrich(&plate).await {
                record.vehicle = vehicle;
            }
        }

        if let Some(image) = self.still_image(&plate, event).await {
            record.image_snapshot = Some(image);
        }

        if let Some(clip) = self.record_clip(&plate, event.capture_time, effects).await {
            self.replace_clip(&mut record, clip, effects).await;
        }

        record.touch(event.capture_time);
        tx.update(&record).await?;

        debug!("[{}] Sighting at {} recorded", plate, event.capture_time);
        Ok(IngestOutcome::Updated(plate))
    }

    /// Swap the record's clip, removing the old file first. If the old file
    /// cannot be removed the new clip is dropped instead.
    async fn replace_clip(
        &self,
        record: &mut PlateRecord,
        clip: ClipHandle,
        effects: &mut SideEffects,
    ) {
        let plate = &record.plate_number;

        if let Some(old) = record.video_reference.clone() {
            match self.video.delete_clip(&old).await {
                Ok(_) => effects.deleted_clip = Some(old),
                Err(e) => {
                    warn!(
                        "[{}] Could not remove previous clip {}, discarding {}: {}",
                        plate, old, clip, e
                    );
                    self.discard_clip(plate, &clip).await;
                    effects.new_clip = None;
                    return;
                }
            }
        }

        record.video_reference = Some(clip);
    }

    /// One registry call; `None` when it yields nothing usable.
    async fn enrich(&self, plate: &NormalizedPlate) -> Option<VehicleAttributes> {
        match self.registry.lookup(plate).await {
            RegistryLookup::Found(vehicle) => Some(vehicle),
            RegistryLookup::NotFound => {
                info!("[{}] Not known to the vehicle registry", plate);
                None
            }
            RegistryLookup::TransientFailure(reason) => {
                warn!("[{}] Vehicle registry unavailable: {}", plate, reason);
                None
            }
        }
    }

    async fn still_image(
        &self,
        plate: &NormalizedPlate,
        event: &DetectionEvent,
    ) -> Option<Vec<u8>> {
        if let Some(snapshot) = &event.snapshot {
            return Some(snapshot.clone());
        }
        if !self.video.has_source() {
            return None;
        }

        let image = self.video.snapshot(self.settings.snapshot_delay).await;
        if image.is_none() {
            warn!("[{}] No still image available", plate);
        }
        image
    }

    async fn record_clip(
        &self,
        plate: &NormalizedPlate,
        at: DateTime<Utc>,
        effects: &mut SideEffects,
    ) -> Option<ClipHandle> {
        if !self.settings.capture_clips {
            return None;
        }

        match self
            .video
            .capture(plate, self.settings.clip_duration, at)
            .await
        {
            CaptureOutcome::Captured(clip) => {
                effects.new_clip = Some(clip.clone());
                Some(clip)
            }
            CaptureOutcome::Unavailable(reason) => {
                warn!("[{}] Continuing without video: {}", plate, reason);
                None
            }
        }
    }

    async fn compensate(&self, plate: &NormalizedPlate, effects: &SideEffects) {
        if let Some(clip) = &effects.new_clip {
            self.discard_clip(plate, clip).await;
        }

        // the rolled-back row still points at a file that is gone
        if let Some(old) = &effects.deleted_clip {
            match self.store.clear_video_reference(plate, old).await {
                Ok(true) => info!("[{}] Cleared reference to removed clip {}", plate, old),
                Ok(false) => {}
                Err(e) => warn!("[{}] Could not clear reference to {}: {}", plate, old, e),
            }
        }
    }

    async fn discard_clip(&self, plate: &NormalizedPlate, clip: &ClipHandle) {
        if let Err(e) = self.video.delete_clip(clip).await {
            warn!("[{}] Could not remove clip {}: {}", plate, clip, e);
        }
    }
}
