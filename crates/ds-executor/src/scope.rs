//! Cleanup for guards that are dropped without being released explicitly
//! (panic unwinding, a cancelled future, Ctrl-C).

use std::future::Future;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{error, warn};

/// Runs `cleanup` to completion when the runtime allows blocking, otherwise
/// spawns it on the current runtime.
pub(crate) fn run_cleanup<F>(what: &'static str, cleanup: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => match handle.runtime_flavor() {
            RuntimeFlavor::MultiThread => {
                warn!(%what, "Guard dropped without release, cleaning up");
                tokio::task::block_in_place(|| handle.block_on(cleanup));
            }
            _ => {
                warn!(%what, "Guard dropped without release, cleanup spawned");
                handle.spawn(cleanup);
            }
        },
        Err(_) => {
            error!(%what, "Guard dropped outside of a runtime, cleanup skipped");
        }
    }
}
