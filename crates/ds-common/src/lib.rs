// Re-export dependencies used in public interfaces of common types

use async_trait::async_trait;
pub use serde::{Deserialize, Serialize};
use thiserror::Error;
pub use uuid;

pub mod progress;
pub mod snapshot;

pub use progress::{ProgressEvent, ProgressSink};
pub use snapshot::{storage_path, DirStats, Snapshot, HELPER_BASE_PATH, METADATA_FILE};

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Target container `{0}` not found")]
    TargetNotFound(String),

    #[error("Target container `{0}` is not running")]
    TargetNotRunning(String),

    #[error("A snapshot named `{0}` already exists")]
    AlreadyExists(String),

    #[error("No snapshot found with name `{0}`")]
    NotFound(String),

    #[error("No snapshot found")]
    NoSnapshots,

    #[error("Consistency Error: {count} snapshots share the name `{name}`")]
    DuplicateName { name: String, count: usize },

    #[error("Command `{command}` exited with status {exit_code}: {output}")]
    CommandFailed {
        command: String,
        exit_code: i64,
        output: String,
    },

    #[error("No helper container is held")]
    HelperNotAcquired,

    #[error("Container Engine Error: {0}")]
    Engine(String),

    #[error("Serialization Error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Interrupted")]
    Interrupted,

    #[error("Internal Error: {0}")]
    Internal(String),
}

/// Coarse grouping of [`SnapshotError`] used when reporting to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Precondition,
    Consistency,
    NotFound,
    Execution,
}

impl SnapshotError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SnapshotError::Config(_) => ErrorCategory::Configuration,
            SnapshotError::TargetNotFound(_)
            | SnapshotError::TargetNotRunning(_)
            | SnapshotError::AlreadyExists(_) => ErrorCategory::Precondition,
            SnapshotError::DuplicateName { .. }
            | SnapshotError::HelperNotAcquired
            | SnapshotError::Internal(_) => ErrorCategory::Consistency,
            SnapshotError::NotFound(_) | SnapshotError::NoSnapshots => ErrorCategory::NotFound,
            SnapshotError::CommandFailed { .. }
            | SnapshotError::Engine(_)
            | SnapshotError::Serialization(_)
            | SnapshotError::Io(_)
            | SnapshotError::Interrupted => ErrorCategory::Execution,
        }
    }
}

// Define the primary Result type for snapshot operations
pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Shell-command execution inside a running container (or any equivalent
/// environment). Output is stdout and stderr combined, decoded lossily.
#[async_trait]
pub trait ExecContext: Send + Sync {
    async fn run(&self, command: &str) -> Result<String>;

    /// Same as [`ExecContext::run`], but hands each output chunk to
    /// `on_output` as soon as it arrives instead of collecting it.
    async fn run_streaming(
        &self,
        command: &str,
        on_output: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<()>;

    /// Stops anything still running in this context, such as a command whose
    /// caller went away. The context is not usable afterwards.
    async fn halt(&self) -> Result<()> {
        Ok(())
    }
}

/// Start/stop control over the container whose data is being snapshotted.
#[async_trait]
pub trait TargetControl: Send + Sync {
    async fn exists(&self, name: &str) -> Result<bool>;
    async fn is_running(&self, name: &str) -> Result<bool>;
    /// Stops the container so its data is stable on disk.
    async fn freeze(&self, name: &str) -> Result<()>;
    async fn unfreeze(&self, name: &str) -> Result<()>;
}

/// File-level operations against the storage shared by the helper and the
/// target container. Paths are absolute paths inside the helper container.
#[async_trait]
pub trait Workspace: Send + Sync {
    /// Contents of `path`, or an empty string if it does not exist.
    async fn read_file(&self, path: &str) -> Result<String>;
    async fn write_file(&self, path: &str, content: &str) -> Result<()>;
    async fn remove(&self, path: &str) -> Result<()>;
    async fn dir_size(&self, path: &str) -> Result<u64>;
    async fn file_count(&self, path: &str) -> Result<u64>;
    /// Mirror `source` into `destination`, reporting progress to `progress`.
    async fn sync(
        &self,
        source: &str,
        destination: &str,
        progress: &mut dyn ProgressSink,
    ) -> Result<()>;

    /// Stops an interrupted [`Workspace::sync`] that may still be writing.
    async fn halt(&self) -> Result<()> {
        Ok(())
    }

    async fn stats(&self, path: &str) -> Result<DirStats> {
        Ok(DirStats {
            size_bytes: self.dir_size(path).await?,
            file_count: self.file_count(path).await?,
        })
    }
}

pub trait NameGenerator: Send + Sync {
    fn generate(&self) -> String;
}
