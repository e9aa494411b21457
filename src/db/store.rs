use crate::db::models::PlateRecord;
use crate::plate::NormalizedPlate;
use crate::recorder::ClipHandle;
use anyhow::Result;
use async_trait::async_trait;

/// Transactional store holding one [`PlateRecord`] per normalized plate.
#[async_trait]
pub trait PlateStore: Send + Sync {
    /// Start a transaction; dropping it without commit rolls it back.
    async fn begin(&self) -> Result<Box<dyn PlateTransaction>>;

    /// `Err` when the backing database cannot be reached.
    async fn health_check(&self) -> Result<()>;

    /// Null out `video_url` if it still points at `clip`. Runs outside any
    /// transaction; returns whether a row changed.
    async fn clear_video_reference(&self, plate: &NormalizedPlate, clip: &ClipHandle)
        -> Result<bool>;
}

#[async_trait]
pub trait PlateTransaction: Send {
    /// Look a plate up and lock its row until the transaction ends.
    async fn find_for_update(&mut self, plate: &NormalizedPlate) -> Result<Option<PlateRecord>>;

    async fn insert(&mut self, record: &PlateRecord) -> Result<()>;

    async fn update(&mut self, record: &PlateRecord) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
