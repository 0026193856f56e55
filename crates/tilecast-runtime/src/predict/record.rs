use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::config::PredictorConfig;

use super::{CostModel, DirectionFit};

/// Version tag of the persisted record layout. Bump on layout changes,
/// stale records then refit instead of misparsing.
pub const RECORD_VERSION: u32 = 1;

/// A fitted model bundled with the per-direction quality that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedModel {
    pub model: CostModel,
    pub fits: Vec<DirectionFit>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ModelRecord {
    version: u32,
    key: String,
    checksum: String,
    fitted: FittedModel,
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("Unable to persist the fitted model.\nCaused by:\n  {0}")]
    Io(#[from] std::io::Error),
    #[error("Unable to encode the fitted model.\nCaused by:\n  {0}")]
    Encode(#[from] serde_json::Error),
}

fn checksum(fitted: &FittedModel) -> Result<String, serde_json::Error> {
    Ok(format!("{:x}", md5::compute(serde_json::to_string(fitted)?)))
}

/// On-disk store of fitted models, one JSON record per sweep key.
///
/// Loads are tolerant: a missing, corrupt, stale-versioned or tampered
/// record logs a warning and reads as absent, so the worst case is a cold
/// refit rather than a poisoned model.
#[derive(Debug, Clone)]
pub struct ModelStore {
    root: PathBuf,
}

impl ModelStore {
    /// Store under the configured directory, falling back to the user
    /// cache.
    pub fn from_config(config: &PredictorConfig) -> Self {
        let root = config.model_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".cache/tilecast/models")
        });
        Self { root }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    /// Reads the record of `key`, or `None` if absent or unusable.
    pub fn load(&self, key: &str) -> Option<FittedModel> {
        let path = self.path_for(key);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!("Unable to read model record {path:?}: {err}");
                return None;
            }
        };
        let record: ModelRecord = match serde_json::from_str(&content) {
            Ok(record) => record,
            Err(err) => {
                warn!("Corrupt model record {path:?}: {err}");
                return None;
            }
        };
        if record.version != RECORD_VERSION {
            warn!(
                "Model record {path:?} has layout version {}, this build reads {RECORD_VERSION}",
                record.version
            );
            return None;
        }
        if record.key != key {
            warn!("Model record {path:?} was saved under key {}", record.key);
            return None;
        }
        match checksum(&record.fitted) {
            Ok(sum) if sum == record.checksum => {}
            Ok(_) => {
                warn!("Model record {path:?} failed its checksum");
                return None;
            }
            Err(err) => {
                warn!("Unable to verify model record {path:?}: {err}");
                return None;
            }
        }
        debug!("Loaded fitted model {key} from {path:?}");
        Some(record.fitted)
    }

    /// Writes the record of `key`, creating the store directory as needed.
    pub fn save(&self, key: &str, fitted: &FittedModel) -> Result<PathBuf, RecordError> {
        fs::create_dir_all(&self.root)?;
        let record = ModelRecord {
            version: RECORD_VERSION,
            key: key.to_string(),
            checksum: checksum(fitted)?,
            fitted: fitted.clone(),
        };
        let path = self.path_for(key);
        fs::write(&path, serde_json::to_string_pretty(&record)?)?;
        debug!("Persisted fitted model {key} to {path:?}");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CostConfig;
    use crate::metrics::Direction;

    fn fitted() -> FittedModel {
        FittedModel {
            model: CostModel::from_config(&CostConfig::default()),
            fits: vec![DirectionFit {
                direction: Direction::Broadcast,
                coeffs: CostConfig::default().bcast,
                r_squared: 1.0,
                mape: 0.0,
                samples: 12,
                warnings: Vec::new(),
            }],
        }
    }

    fn scratch_store(tag: &str) -> ModelStore {
        let root = std::env::temp_dir().join(format!(
            "tilecast-records-{}-{tag}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&root);
        ModelStore::with_root(root)
    }

    #[test]
    fn save_then_load_round_trips() {
        let store = scratch_store("round-trip");
        let fitted = fitted();
        store.save("abc123", &fitted).unwrap();
        assert_eq!(store.load("abc123"), Some(fitted));
        let _ = fs::remove_dir_all(store.root());
    }

    #[test]
    fn missing_record_reads_as_absent() {
        let store = scratch_store("missing");
        assert_eq!(store.load("nope"), None);
    }

    #[test]
    fn tampered_record_reads_as_absent() {
        let store = scratch_store("tampered");
        let path = store.save("key", &fitted()).unwrap();
        let mangled = fs::read_to_string(&path)
            .unwrap()
            .replace("\"samples\": 12", "\"samples\": 13");
        fs::write(&path, mangled).unwrap();
        assert_eq!(store.load("key"), None);
        let _ = fs::remove_dir_all(store.root());
    }

    #[test]
    fn stale_version_reads_as_absent() {
        let store = scratch_store("stale");
        let path = store.save("key", &fitted()).unwrap();
        let stale = fs::read_to_string(&path)
            .unwrap()
            .replace("\"version\": 1", "\"version\": 99");
        fs::write(&path, stale).unwrap();
        assert_eq!(store.load("key"), None);
        let _ = fs::remove_dir_all(store.root());
    }

    #[test]
    fn corrupt_json_reads_as_absent() {
        let store = scratch_store("corrupt");
        let path = store.save("key", &fitted()).unwrap();
        fs::write(&path, "not json").unwrap();
        assert_eq!(store.load("key"), None);
        let _ = fs::remove_dir_all(store.root());
    }
}
