use crate::error::Error;
use crate::plate::NormalizedPlate;
use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use std::fmt::{Display, Formatter};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Name of a stored clip, relative to the clip directory.
///
/// Always a bare file name: no separators, no leading dot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ClipHandle(String);

impl ClipHandle {
    /// Accept a stored reference only if it is a plain file name.
    pub fn parse(name: &str) -> Option<Self> {
        let valid = !name.is_empty()
            && name.len() <= 255
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));

        valid.then(|| Self(name.to_string()))
    }

    /// `<PLATE>_<timestamp>_<random>.<ext>`
    pub fn generate(plate: &NormalizedPlate, at: DateTime<Utc>, extension: &str) -> Self {
        let plate: String = plate
            .as_str()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        let suffix = Uuid::new_v4().simple().to_string();

        Self(format!(
            "{}_{}_{}.{}",
            plate,
            at.format("%Y%m%dT%H%M%SZ"),
            &suffix[..8],
            extension
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this clip was generated for `plate`
    pub fn belongs_to(&self, plate: &NormalizedPlate) -> bool {
        self.0
            .strip_prefix(plate.as_str())
            .map_or(false, |rest| rest.starts_with('_'))
    }
}

impl Display for ClipHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Directory holding the clip files
#[derive(Debug, Clone)]
pub struct ClipStore {
    root: PathBuf,
}

impl ClipStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_owned(),
        }
    }

    /// Create the clip directory if needed
    pub fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root).map_err(|e| {
            Error::Io(format!(
                "Failed to create clip directory {:?}: {}",
                self.root, e
            ))
        })?;
        Ok(())
    }

    pub fn path_for(&self, clip: &ClipHandle) -> PathBuf {
        self.root.join(clip.as_str())
    }

    pub fn exists(&self, clip: &ClipHandle) -> bool {
        self.path_for(clip).is_file()
    }

    /// Remove a clip file. A file that is already gone is not an error;
    /// returns whether something was deleted.
    pub fn delete(&self, clip: &ClipHandle) -> Result<bool> {
        let path = self.path_for(clip);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!("Deleted clip {}", clip);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("Clip {} already gone", clip);
                Ok(false)
            }
            Err(e) => {
                Err(Error::Io(format!("Failed to delete clip {:?}: {}", path, e)).into())
            }
        }
    }

    /// Clip files currently on disk for `plate`
    pub fn list_for(&self, plate: &NormalizedPlate) -> Result<Vec<ClipHandle>> {
        let mut clips = Vec::new();
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(clips),
            Err(e) => return Err(Error::Io(format!("Failed to list clips: {}", e)).into()),
        };

        for entry in entries {
            let entry = entry?;
            if let Some(clip) = entry.file_name().to_str().and_then(ClipHandle::parse) {
                if clip.belongs_to(plate) {
                    clips.push(clip);
                }
            }
        }

        clips.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(clips)
    }
}
