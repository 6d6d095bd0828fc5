use chrono::{DateTime, Local, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Mount point of the snapshot volume inside the helper container.
pub const HELPER_BASE_PATH: &str = "/mnt/ds";

/// Metadata document, relative to [`HELPER_BASE_PATH`].
pub const METADATA_FILE: &str = "db.json";

/// Where the files of snapshot `id` live inside the helper container.
pub fn storage_path(id: &Uuid) -> String {
    format!("{HELPER_BASE_PATH}/{id}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "uuid")]
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "size")]
    pub size_bytes: u64,
    pub file_count: u64,
    #[serde(rename = "created", with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    /// A snapshot that has not been copied yet; size and file count are
    /// filled in once its directory is stable.
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        // Whole seconds, as stored
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            size_bytes: 0,
            file_count: 0,
            created_at: now.with_nanosecond(0).unwrap_or(now),
        }
    }

    pub fn storage_path(&self) -> String {
        storage_path(&self.id)
    }

    pub fn created_local(&self) -> DateTime<Local> {
        self.created_at.with_timezone(&Local)
    }
}

/// Size and file count of a directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirStats {
    pub size_bytes: u64,
    pub file_count: u64,
}
