// Persisted joint calibration offsets
//
// Offsets are read once at startup and written only by an explicit
// calibration session. A missing or unreadable store never stops the robot:
// the joint just runs with a zero offset.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::Joint;

#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Malformed calibration file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub trait CalibrationStore {
    /// Offset in degrees for `joint`, 0 when none was saved
    fn load_offset(&self, joint: &str) -> Result<f32, CalibrationError>;

    fn save_offset(&mut self, joint: &str, degrees: f32) -> Result<(), CalibrationError>;
}

/// Apply stored offsets to every joint, falling back to zero on errors
pub fn load_offsets(store: &dyn CalibrationStore, joints: &[Joint]) {
    for joint in joints {
        match store.load_offset(joint.name()) {
            Ok(offset) => {
                debug!("Joint {} offset {:.1}°", joint.name(), offset);
                joint.set_offset(offset);
            }
            Err(e) => {
                warn!("Using zero offset for joint {}: {}", joint.name(), e);
                joint.set_offset(0.0);
            }
        }
    }
}

/// Write every joint's current offset back to the store
pub fn save_offsets(store: &mut dyn CalibrationStore, joints: &[Joint]) -> Result<(), CalibrationError> {
    for joint in joints {
        store.save_offset(joint.name(), joint.offset())?;
    }
    info!("Saved offsets for {} joints", joints.len());
    Ok(())
}

#[derive(Debug, Default, Clone)]
pub struct MemoryCalibrationStore {
    offsets: BTreeMap<String, f32>,
}

impl MemoryCalibrationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CalibrationStore for MemoryCalibrationStore {
    fn load_offset(&self, joint: &str) -> Result<f32, CalibrationError> {
        Ok(self.offsets.get(joint).copied().unwrap_or(0.0))
    }

    fn save_offset(&mut self, joint: &str, degrees: f32) -> Result<(), CalibrationError> {
        self.offsets.insert(joint.to_string(), degrees);
        Ok(())
    }
}

/// Offsets kept as a JSON object `{ "joint_name": degrees, ... }`
#[derive(Debug)]
pub struct JsonCalibrationStore {
    path: PathBuf,
    offsets: BTreeMap<String, f32>,
}

impl JsonCalibrationStore {
    /// Read the file at `path`; a missing file is an empty store
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CalibrationError> {
        let path = path.as_ref().to_path_buf();
        let offsets = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).map_err(|source| CalibrationError::Parse {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No calibration file at {}, offsets default to zero", path.display());
                BTreeMap::new()
            }
            Err(source) => return Err(CalibrationError::Io { path, source }),
        };
        Ok(Self { path, offsets })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), CalibrationError> {
        let text = serde_json::to_string_pretty(&self.offsets).map_err(|source| CalibrationError::Parse {
            path: self.path.clone(),
            source,
        })?;
        fs::write(&self.path, text).map_err(|source| CalibrationError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl CalibrationStore for JsonCalibrationStore {
    fn load_offset(&self, joint: &str) -> Result<f32, CalibrationError> {
        Ok(self.offsets.get(joint).copied().unwrap_or(0.0))
    }

    fn save_offset(&mut self, joint: &str, degrees: f32) -> Result<(), CalibrationError> {
        self.offsets.insert(joint.to_string(), degrees);
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{}-{}.json", name, std::process::id()))
    }

    #[test]
    fn test_missing_file_is_empty_store() {
        let store = JsonCalibrationStore::open(temp_path("missing-offsets")).unwrap();
        assert_eq!(store.load_offset("left_leg").unwrap(), 0.0);
    }

    #[test]
    fn test_offsets_survive_reopen() {
        let path = temp_path("saved-offsets");
        let left = Joint::new("left_leg");
        let right = Joint::new("right_leg");
        left.set_offset(-2.5);
        right.set_offset(4.0);

        let mut store = JsonCalibrationStore::open(&path).unwrap();
        save_offsets(&mut store, &[left.clone(), right.clone()]).unwrap();

        left.set_offset(0.0);
        right.set_offset(0.0);
        let reopened = JsonCalibrationStore::open(&path).unwrap();
        load_offsets(&reopened, &[left.clone(), right.clone()]);

        assert_eq!(left.offset(), -2.5);
        assert_eq!(right.offset(), 4.0);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_malformed_file_is_reported() {
        let path = temp_path("bad-offsets");
        fs::write(&path, "not json").unwrap();

        let err = JsonCalibrationStore::open(&path).unwrap_err();
        assert!(matches!(err, CalibrationError::Parse { .. }));
        fs::remove_file(&path).unwrap();
    }

    struct BrokenStore;

    impl CalibrationStore for BrokenStore {
        fn load_offset(&self, _joint: &str) -> Result<f32, CalibrationError> {
            Err(CalibrationError::Io {
                path: PathBuf::from("/dev/null"),
                source: io::Error::other("flash unavailable"),
            })
        }

        fn save_offset(&mut self, _joint: &str, _degrees: f32) -> Result<(), CalibrationError> {
            Ok(())
        }
    }

    #[test]
    fn test_load_failure_falls_back_to_zero() {
        let joint = Joint::new("left_foot");
        joint.set_offset(7.0);
        load_offsets(&BrokenStore, &[joint.clone()]);
        assert_eq!(joint.offset(), 0.0);
    }

    #[test]
    fn test_memory_store_round_trip() {
        let mut store = MemoryCalibrationStore::new();
        store.save_offset("right_foot", 1.5).unwrap();
        assert_eq!(store.load_offset("right_foot").unwrap(), 1.5);
        assert_eq!(store.load_offset("right_leg").unwrap(), 0.0);
    }
}
