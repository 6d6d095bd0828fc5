//! Metadata store: every known snapshot, as one JSON array kept in the
//! snapshot volume next to the data it describes.

use chrono::{DateTime, TimeZone, Utc};
use ds_common::{Result, Snapshot, SnapshotError, Workspace, HELPER_BASE_PATH, METADATA_FILE};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// One entry as found on disk. Older documents may lack the measured
/// fields; [`MetadataStore::load`] fills them in once.
#[derive(Debug, Deserialize)]
struct StoredSnapshot {
    uuid: Uuid,
    name: String,
    size: Option<u64>,
    file_count: Option<u64>,
    created: Option<i64>,
}

/// Reads and writes the snapshot list. There is no locking; a single writer
/// per namespace is assumed.
#[derive(Clone)]
pub struct MetadataStore {
    fs: Arc<dyn Workspace>,
    path: String,
}

impl MetadataStore {
    pub fn new(fs: Arc<dyn Workspace>) -> Self {
        Self {
            fs,
            path: format!("{HELPER_BASE_PATH}/{METADATA_FILE}"),
        }
    }

    /// Snapshots in creation order. A missing or empty document is an empty
    /// store.
    #[instrument(skip(self), fields(path = %self.path))]
    pub async fn load(&self) -> Result<Vec<Snapshot>> {
        let document = self.fs.read_file(&self.path).await?;
        if document.trim().is_empty() {
            debug!("No metadata document yet");
            return Ok(Vec::new());
        }

        let stored: Vec<StoredSnapshot> = serde_json::from_str(&document)?;
        let (snapshots, migrated) = self.migrate(stored).await?;
        if migrated {
            info!(count = snapshots.len(), "Migrated legacy metadata document");
            self.save(&snapshots).await?;
        }
        Ok(snapshots)
    }

    /// Replaces the whole document in a single write. On failure the
    /// previous document stays authoritative.
    #[instrument(skip(self, snapshots), fields(path = %self.path, count = snapshots.len()))]
    pub async fn save(&self, snapshots: &[Snapshot]) -> Result<()> {
        let document = serde_json::to_string(snapshots)?;
        self.fs.write_file(&self.path, &document).await
    }

    /// Completes entries written before size, file count and creation time
    /// were recorded. Returns whether anything changed.
    async fn migrate(&self, stored: Vec<StoredSnapshot>) -> Result<(Vec<Snapshot>, bool)> {
        let now = Utc::now();
        let mut migrated = false;
        let mut snapshots = Vec::with_capacity(stored.len());

        for entry in stored {
            let mut snapshot = Snapshot::new(entry.uuid, entry.name);
            snapshot.created_at = match entry.created {
                Some(secs) => timestamp(secs)?,
                None => {
                    migrated = true;
                    now
                }
            };

            match (entry.size, entry.file_count) {
                (Some(size), Some(file_count)) => {
                    snapshot.size_bytes = size;
                    snapshot.file_count = file_count;
                }
                (size, file_count) => {
                    migrated = true;
                    let path = snapshot.storage_path();
                    snapshot.size_bytes = match size {
                        Some(size) => size,
                        None => self.fs.dir_size(&path).await?,
                    };
                    snapshot.file_count = match file_count {
                        Some(count) => count,
                        None => self.fs.file_count(&path).await?,
                    };
                }
            }
            snapshots.push(snapshot);
        }

        Ok((snapshots, migrated))
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| SnapshotError::Internal(format!("invalid creation timestamp {secs}")))
}
