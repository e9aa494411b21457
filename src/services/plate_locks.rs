use crate::plate::NormalizedPlate;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OwnedMutexGuard;

type Slot = Arc<tokio::sync::Mutex<()>>;

/// In-process mutual exclusion per normalized plate.
///
/// Entries are created on demand and removed once nobody holds or waits
/// for them.
#[derive(Default)]
pub struct PlateLocks {
    slots: Mutex<HashMap<NormalizedPlate, Slot>>,
}

impl PlateLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<NormalizedPlate, Slot>> {
        // the map stays consistent even if a holder panicked
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait until no other task holds `plate`, then hold it until the guard drops.
    pub async fn lock(&self, plate: &NormalizedPlate) -> PlateGuard<'_> {
        let slot = self.slots().entry(plate.clone()).or_default().clone();
        let guard = slot.lock_owned().await;

        PlateGuard {
            locks: self,
            plate: plate.clone(),
            guard: Some(guard),
        }
    }

    /// Plates currently locked or awaited
    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct PlateGuard<'a> {
    locks: &'a PlateLocks,
    plate: NormalizedPlate,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PlateGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();

        let mut slots = self.locks.slots();
        if let Some(slot) = slots.get(&self.plate) {
            if Arc::strong_count(slot) == 1 {
                slots.remove(&self.plate);
            }
        }
    }
}
