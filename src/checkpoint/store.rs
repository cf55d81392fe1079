use super::Checkpoint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

const CURRENT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("checkpoint file {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, CheckpointError>;

/// On-disk envelope around a reader checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCheckpoint {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub watermark: Option<DateTime<Utc>>,
    pub partitions: Checkpoint,
}

impl StoredCheckpoint {
    pub fn new(partitions: Checkpoint, watermark: Option<DateTime<Utc>>) -> Self {
        Self {
            version: CURRENT_VERSION,
            saved_at: Utc::now(),
            watermark,
            partitions,
        }
    }
}

/// Persists checkpoints to a single JSON file and tracks when the next save
/// is due.
pub struct CheckpointStore {
    path: PathBuf,
    interval: Duration,
    last_save: Instant,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            interval,
            last_save: Instant::now(),
        }
    }

    pub fn load(&self) -> Result<Option<StoredCheckpoint>> {
        tracing::info!(path = %self.path.display(), "Loading checkpoint");

        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No checkpoint found");
                return Ok(None);
            }
            Err(source) => {
                return Err(CheckpointError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let checkpoint: StoredCheckpoint =
            serde_json::from_str(&content).map_err(|source| CheckpointError::Json {
                path: self.path.clone(),
                source,
            })?;

        if checkpoint.version != CURRENT_VERSION {
            tracing::warn!(
                "Checkpoint version mismatch: {} vs {}, ignoring checkpoint",
                checkpoint.version,
                CURRENT_VERSION
            );
            return Ok(None);
        }

        tracing::info!(
            saved_at = %checkpoint.saved_at,
            partitions = checkpoint.partitions.len(),
            "Loaded checkpoint"
        );
        Ok(Some(checkpoint))
    }

    /// Write the checkpoint next to its final location and rename it into
    /// place, so a crash mid-write leaves the previous checkpoint intact.
    pub fn save(&mut self, checkpoint: &StoredCheckpoint) -> Result<()> {
        let io_err = |source| CheckpointError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let json = serde_json::to_vec_pretty(checkpoint).map_err(|source| CheckpointError::Json {
            path: self.path.clone(),
            source,
        })?;

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, json).map_err(io_err)?;
        fs::rename(&tmp_path, &self.path).map_err(io_err)?;

        self.last_save = Instant::now();
        tracing::debug!(
            path = %self.path.display(),
            partitions = checkpoint.partitions.len(),
            "Checkpoint saved"
        );
        Ok(())
    }

    pub fn should_save(&self) -> bool {
        self.last_save.elapsed() >= self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::PartitionCheckpoint;
    use crate::client::Position;
    use tempfile::TempDir;

    fn sample_checkpoint() -> Checkpoint {
        Checkpoint::new(vec![
            PartitionCheckpoint::new("s1", Position::AfterSequence { sequence: 12345 }),
            PartitionCheckpoint::new("s2", Position::TrimHorizon),
        ])
    }

    #[test]
    fn test_checkpoint_save_load() {
        let dir = TempDir::new().unwrap();
        let mut store = CheckpointStore::new(dir.path().join("checkpoint.json"), Duration::from_secs(30));

        let watermark = Utc::now();
        store
            .save(&StoredCheckpoint::new(sample_checkpoint(), Some(watermark)))
            .unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.version, CURRENT_VERSION);
        assert_eq!(loaded.partitions, sample_checkpoint());
        assert_eq!(loaded.watermark, Some(watermark));
    }

    #[test]
    fn test_checkpoint_no_checkpoint() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("missing.json"), Duration::from_secs(30));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_checkpoint_version_mismatch() {
        let dir = TempDir::new().unwrap();
        let mut store = CheckpointStore::new(dir.path().join("checkpoint.json"), Duration::from_secs(30));

        let mut checkpoint = StoredCheckpoint::new(sample_checkpoint(), None);
        checkpoint.version = 999;
        store.save(&checkpoint).unwrap();

        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_checkpoint_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checkpoint.json");
        fs::write(&path, "{ not json").unwrap();

        let store = CheckpointStore::new(&path, Duration::from_secs(30));
        assert!(matches!(store.load(), Err(CheckpointError::Json { .. })));
    }

    #[test]
    fn test_checkpoint_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/state/checkpoint.json");
        let mut store = CheckpointStore::new(&path, Duration::from_secs(30));

        store
            .save(&StoredCheckpoint::new(sample_checkpoint(), None))
            .unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_checkpoint_should_save() {
        let dir = TempDir::new().unwrap();
        let mut store = CheckpointStore::new(dir.path().join("checkpoint.json"), Duration::from_millis(100));

        assert!(!store.should_save());

        std::thread::sleep(Duration::from_millis(150));
        assert!(store.should_save());

        store
            .save(&StoredCheckpoint::new(sample_checkpoint(), None))
            .unwrap();
        assert!(!store.should_save());
    }
}
