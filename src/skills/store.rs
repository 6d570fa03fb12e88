//! Capability Record Store
//!
//! Append-only JSON file of accepted capabilities. The whole file is read on
//! load and rewritten on append: the new contents go to a sibling temp file
//! which is then renamed over the original, so readers see either the old or
//! the new sequence. Appends are serialized inside the store.

use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::types::CapabilityRecord;

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Corrupt capability store at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error on capability store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode capability records: {0}")]
    Encode(#[from] serde_json::Error),
}

/// File-backed record store
#[derive(Debug)]
pub struct RecordStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every record. A missing (or blank) file is an empty store.
    pub async fn load_all(&self) -> Result<Vec<CapabilityRecord>, StoreError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No capability store at {}, starting empty", self.path.display());
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    /// Append one record, rewriting the file as a whole
    pub async fn append(&self, record: &CapabilityRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        // Corrupt stores fail here, before anything is written
        let mut records = self.load_all().await?;
        records.push(record.clone());

        self.write_all(&records).await?;

        info!(
            "Persisted capability '{}' ({} records in {})",
            record.name,
            records.len(),
            self.path.display()
        );
        Ok(())
    }

    async fn write_all(&self, records: &[CapabilityRecord]) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
            }
        }

        let content = serde_json::to_string_pretty(records)?;
        let tmp_path = self.tmp_path();

        tokio::fs::write(&tmp_path, content).await.map_err(io_err)?;
        tokio::fs::rename(&tmp_path, &self.path).await.map_err(io_err)?;

        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "library.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
