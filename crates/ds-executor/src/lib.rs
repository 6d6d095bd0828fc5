use bollard::errors::Error as BollardError; // Alias bollard error
use ds_common::SnapshotError;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

// Re-export dependencies potentially needed by consumers (like the CLI)
pub use bollard;
pub use ds_common as common;

pub mod helper;
pub mod local;
pub mod names;
mod scope;
pub mod shell;
pub mod snapshot;
pub mod store;
pub mod sync;
#[doc(hidden)]
pub mod test_utils;

// --- Custom Error Type ---
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Image build failed: {0}")]
    ImageBuildFailed(String),
    #[error("Volume creation failed: {0}")]
    VolumeCreationFailed(#[source] BollardError),
    #[error("Container creation failed: {0}")]
    CreationFailed(#[source] BollardError),
    #[error("Container start failed: {0}")]
    StartFailed(#[source] BollardError),
    #[error("Container stop failed: {0}")]
    StopFailed(#[source] BollardError),
    #[error("Container removal failed: {0}")]
    RemovalFailed(#[source] BollardError),
    #[error("Exec failed: {0}")]
    ExecFailed(#[source] BollardError),
    #[error("Docker API error: {0}")]
    DockerApi(#[from] BollardError), // Catch-all for other bollard errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// Implement conversion from ExecutorError to the common SnapshotError
impl From<ExecutorError> for SnapshotError {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::Io(e) => SnapshotError::Io(e),
            other => SnapshotError::Engine(other.to_string()),
        }
    }
}

/// `true` if the engine answered with HTTP status `code`.
pub(crate) fn is_status(err: &BollardError, code: u16) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError { status_code, .. } if *status_code == code
    )
}

pub use helper::{DockerTargets, HelperManager, HelperSession};
pub use shell::ShellWorkspace;
pub use snapshot::{FreezeGuard, PruneOutcome, SnapshotManager};
pub use store::MetadataStore;

/// Acquires the helper environment, runs `op` against it and releases the
/// helper container afterwards, whether or not `op` succeeded.
///
/// An error from `op` takes precedence over an error from the release.
pub async fn with_helper<T, F, Fut>(
    manager: &HelperManager,
    target_container: &str,
    op: F,
) -> ds_common::Result<T>
where
    F: FnOnce(Arc<HelperSession>) -> Fut,
    Fut: Future<Output = ds_common::Result<T>>,
{
    let session = Arc::new(manager.acquire(target_container).await?);
    let result = op(session.clone()).await;
    let released = session.release().await;

    match (result, released) {
        (Err(e), Err(release_err)) => {
            warn!(error = %release_err, "Failed to release helper container after error");
            Err(e)
        }
        (Ok(_), Err(release_err)) => Err(release_err),
        (result, Ok(())) => result,
    }
}
