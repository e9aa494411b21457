//! In-memory stand-ins for the store, registry, sensor and camera.

use crate::config::VideoConfig;
use crate::db::models::{PlateRecord, VehicleAttributes};
use crate::db::{PlateStore, PlateTransaction};
use crate::error::Error;
use crate::plate::{NormalizedPlate, PlateNormalizer};
use crate::recorder::source::{FrameStream, MjpegClipEncoder, VideoSource};
use crate::recorder::{ClipHandle, VideoCaptureManager};
use crate::registry::{RegistryLookup, VehicleRegistry};
use crate::sensor::{SensorReading, SensorSource};
use crate::services::{DetectionIngestor, IngestSettings};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

// ---------------------------------------------------------------- store

#[derive(Default)]
struct MemoryState {
    rows: HashMap<NormalizedPlate, PlateRecord>,
    row_locks: HashMap<NormalizedPlate, Arc<tokio::sync::Mutex<()>>>,
}

/// Plate table kept in memory. Transactions buffer their writes and apply
/// them on commit; `find_for_update` holds a per-row lock until the
/// transaction ends, like `SELECT ... FOR UPDATE`.
#[derive(Clone, Default)]
pub struct MemoryPlateStore {
    state: Arc<Mutex<MemoryState>>,
    fail_commit: Arc<AtomicBool>,
    fail_next_write: Arc<AtomicBool>,
    unreachable: Arc<AtomicBool>,
    commits: Arc<AtomicUsize>,
    rollbacks: Arc<AtomicUsize>,
}

impl MemoryPlateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, record: PlateRecord) {
        if let Ok(mut state) = self.state.lock() {
            state.rows.insert(record.plate_number.clone(), record);
        }
    }

    pub fn get(&self, plate: &str) -> Option<PlateRecord> {
        let state = self.state.lock().ok()?;
        state
            .rows
            .get(&NormalizedPlate::from_stored(plate.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.rows.len()).unwrap_or(0)
    }

    /// Every commit fails until reset
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }

    /// The next insert or update fails
    pub fn fail_next_write(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }

    /// Health checks fail while set
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    fn row_lock(&self, plate: &NormalizedPlate) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::Database("memory store poisoned".to_string()))?;
        Ok(state.row_locks.entry(plate.clone()).or_default().clone())
    }
}

#[async_trait]
impl PlateStore for MemoryPlateStore {
    async fn begin(&self) -> Result<Box<dyn PlateTransaction>> {
        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            pending: Vec::new(),
            row_guards: Vec::new(),
        }))
    }

    async fn health_check(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(Error::Database("connection refused".to_string()).into());
        }
        Ok(())
    }

    async fn clear_video_reference(
        &self,
        plate: &NormalizedPlate,
        clip: &ClipHandle,
    ) -> Result<bool> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::Database("memory store poisoned".to_string()))?;
        match state.rows.get_mut(plate) {
            Some(row) if row.video_reference.as_ref() == Some(clip) => {
                row.video_reference = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

enum PendingWrite {
    Insert(PlateRecord),
    Update(PlateRecord),
}

struct MemoryTransaction {
    store: MemoryPlateStore,
    pending: Vec<PendingWrite>,
    row_guards: Vec<OwnedMutexGuard<()>>,
}

impl MemoryTransaction {
    fn check_write(&self) -> Result<()> {
        if self.store.fail_next_write.swap(false, Ordering::SeqCst) {
            return Err(Error::Database("injected write failure".to_string()).into());
        }
        Ok(())
    }
}

#[async_trait]
impl PlateTransaction for MemoryTransaction {
    async fn find_for_update(&mut self, plate: &NormalizedPlate) -> Result<Option<PlateRecord>> {
        let lock = self.store.row_lock(plate)?;
        self.row_guards.push(lock.lock_owned().await);

        let state = self
            .store
            .state
            .lock()
            .map_err(|_| Error::Database("memory store poisoned".to_string()))?;
        Ok(state.rows.get(plate).cloned())
    }

    async fn insert(&mut self, record: &PlateRecord) -> Result<()> {
        self.check_write()?;
        self.pending.push(PendingWrite::Insert(record.clone()));
        Ok(())
    }

    async fn update(&mut self, record: &PlateRecord) -> Result<()> {
        self.check_write()?;
        self.pending.push(PendingWrite::Update(record.clone()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        if self.store.fail_commit.load(Ordering::SeqCst) {
            return Err(Error::Database("injected commit failure".to_string()).into());
        }

        let mut state = self
            .store
            .state
            .lock()
            .map_err(|_| Error::Database("memory store poisoned".to_string()))?;
        for write in &self.pending {
            match write {
                PendingWrite::Insert(record) => {
                    if state.rows.contains_key(&record.plate_number) {
                        return Err(Error::Database(format!(
                            "duplicate key plate_number={}",
                            record.plate_number
                        ))
                        .into());
                    }
                    state.rows.insert(record.plate_number.clone(), record.clone());
                }
                PendingWrite::Update(record) => {
                    state.rows.insert(record.plate_number.clone(), record.clone());
                }
            }
        }
        drop(state);

        self.store.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.store.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------- registry

/// Registry giving one fixed answer, counting calls
pub struct FakeRegistry {
    answer: RegistryLookup,
    calls: AtomicUsize,
}

impl FakeRegistry {
    pub fn answering(answer: RegistryLookup) -> Arc<Self> {
        Arc::new(Self {
            answer,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn found(vehicle: VehicleAttributes) -> Arc<Self> {
        Self::answering(RegistryLookup::Found(vehicle))
    }

    pub fn failing() -> Arc<Self> {
        Self::answering(RegistryLookup::TransientFailure("connection refused".to_string()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VehicleRegistry for FakeRegistry {
    async fn lookup(&self, _plate: &NormalizedPlate) -> RegistryLookup {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer.clone()
    }
}

pub fn ford() -> VehicleAttributes {
    VehicleAttributes {
        make: "FORD".to_string(),
        color: "BLUE".to_string(),
        fuel_type: "PETROL".to_string(),
        mot_status: "Valid".to_string(),
        tax_status: "Taxed".to_string(),
        year_of_manufacture: Some(2019),
        tax_due_date: chrono::NaiveDate::from_ymd_opt(2025, 1, 1),
        mot_expiry_date: chrono::NaiveDate::from_ymd_opt(2025, 3, 1),
    }
}

// ---------------------------------------------------------------- sensor

/// Sensor replaying a queue of results, then reporting nothing
#[derive(Default)]
pub struct FakeSensor {
    readings: Mutex<VecDeque<Result<Option<SensorReading>>>>,
    polls: AtomicUsize,
}

impl FakeSensor {
    pub fn new(readings: Vec<Result<Option<SensorReading>>>) -> Arc<Self> {
        Arc::new(Self {
            readings: Mutex::new(readings.into()),
            polls: AtomicUsize::new(0),
        })
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SensorSource for FakeSensor {
    async fn latest(&self) -> Result<Option<SensorReading>> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let next = self.readings.lock().ok().and_then(|mut q| q.pop_front());
        next.unwrap_or(Ok(None))
    }
}

// ---------------------------------------------------------------- video

/// What the next `open` call does
pub enum OpenScript {
    Refuse,
    Stream(Vec<FrameStep>),
}

pub enum FrameStep {
    Frame(Vec<u8>),
    Break,
}

/// Camera driven by a script of open results. Once the script runs out
/// it either refuses every open or serves an endless healthy stream.
pub struct ScriptedVideoSource {
    opens: Mutex<VecDeque<OpenScript>>,
    healthy_after_script: bool,
    open_calls: AtomicU32,
    live_streams: Arc<AtomicU32>,
}

impl ScriptedVideoSource {
    pub fn scripted(opens: Vec<OpenScript>) -> Arc<Self> {
        Self::build(opens, false)
    }

    pub fn healthy() -> Arc<Self> {
        Self::build(Vec::new(), true)
    }

    pub fn refusing() -> Arc<Self> {
        Self::build(Vec::new(), false)
    }

    fn build(opens: Vec<OpenScript>, healthy_after_script: bool) -> Arc<Self> {
        Arc::new(Self {
            opens: Mutex::new(opens.into()),
            healthy_after_script,
            open_calls: AtomicU32::new(0),
            live_streams: Arc::new(AtomicU32::new(0)),
        })
    }

    pub fn open_calls(&self) -> u32 {
        self.open_calls.load(Ordering::SeqCst)
    }

    /// Streams opened and not yet dropped
    pub fn live_streams(&self) -> u32 {
        self.live_streams.load(Ordering::SeqCst)
    }
}

impl VideoSource for ScriptedVideoSource {
    fn describe(&self) -> String {
        "scripted://camera".to_string()
    }

    fn open(&self) -> Result<Box<dyn FrameStream>> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        let script = self.opens.lock().ok().and_then(|mut q| q.pop_front());

        let steps = match script {
            Some(OpenScript::Refuse) => None,
            Some(OpenScript::Stream(steps)) => Some(Some(steps.into())),
            None if self.healthy_after_script => Some(None),
            None => None,
        };

        match steps {
            None => Err(Error::Stream("connection refused".to_string()).into()),
            Some(steps) => {
                self.live_streams.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(ScriptedStream {
                    steps,
                    counter: 0,
                    live: self.live_streams.clone(),
                }))
            }
        }
    }
}

struct ScriptedStream {
    // None: endless frames
    steps: Option<VecDeque<FrameStep>>,
    counter: u32,
    live: Arc<AtomicU32>,
}

impl FrameStream for ScriptedStream {
    fn next_frame(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        match self.steps.as_mut() {
            None => {
                std::thread::sleep(Duration::from_millis(2).min(timeout));
                self.counter += 1;
                Ok(Some(format!("frame-{}", self.counter).into_bytes()))
            }
            Some(steps) => match steps.pop_front() {
                Some(FrameStep::Frame(frame)) => Ok(Some(frame)),
                Some(FrameStep::Break) => {
                    Err(Error::Stream("connection reset".to_string()).into())
                }
                None => {
                    std::thread::sleep(timeout);
                    Ok(None)
                }
            },
        }
    }
}

impl Drop for ScriptedStream {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------- ingestor

/// Ingestor over `store` with no camera attached
pub fn ingestor_without_camera(
    store: &MemoryPlateStore,
    registry: Arc<dyn VehicleRegistry>,
) -> Arc<DetectionIngestor> {
    let video = VideoCaptureManager::new(
        None,
        Arc::new(MjpegClipEncoder),
        &VideoConfig::default(),
    );
    let settings = IngestSettings {
        capture_clips: false,
        ..IngestSettings::default()
    };
    Arc::new(DetectionIngestor::new(
        PlateNormalizer::default(),
        Arc::new(store.clone()),
        registry,
        video,
        settings,
    ))
}
