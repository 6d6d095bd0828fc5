//! Sync engine: mirrors a directory with `rsync` inside an execution context
//! and turns its textual progress into a monotonic percentage stream.

use crate::shell::quote;
use ds_common::{ExecContext, ProgressEvent, ProgressSink, Result};
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, info, instrument};

fn percentage_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\d+)%").expect("valid percentage regex"))
}

/// Archive mode with ACLs, xattrs and hard links, deleting destination
/// entries missing from the source. The trailing slash copies the contents
/// of `source` rather than the directory itself.
pub fn rsync_command(source: &str, destination: &str) -> String {
    format!(
        "rsync -aAHX --delete --info=progress2 {}/ {}",
        quote(source.trim_end_matches('/')),
        quote(destination)
    )
}

/// Turns raw tool output into progress events that never go backwards.
///
/// 100% is held back until [`ProgressTracker::finish`], so completion is
/// reported exactly once no matter what the tool prints.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    last: u8,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_percent(&self) -> u8 {
        self.last
    }

    /// Looks at the first percentage in `chunk` and reports it if it moved
    /// past the last one reported.
    pub fn observe(&mut self, chunk: &str) -> Option<ProgressEvent> {
        let captures = percentage_pattern().captures(chunk)?;
        let percent: u8 = captures[1].parse().ok()?;
        if percent >= 100 || percent <= self.last {
            return None;
        }

        let delta = percent - self.last;
        self.last = percent;
        Some(ProgressEvent::Advanced { percent, delta })
    }

    pub fn finish(self) -> ProgressEvent {
        ProgressEvent::Completed
    }
}

/// Mirrors `source` into `destination`. Completion is reported once the
/// output stream ends, even if the copy failed or printed no progress; the
/// tool's exit status is returned afterwards.
#[instrument(skip(ctx, progress))]
pub async fn sync(
    ctx: &dyn ExecContext,
    source: &str,
    destination: &str,
    progress: &mut dyn ProgressSink,
) -> Result<()> {
    let command = rsync_command(source, destination);
    debug!(%command, "Starting sync");

    let mut tracker = ProgressTracker::new();
    let outcome = ctx
        .run_streaming(&command, &mut |chunk: &str| {
            if let Some(event) = tracker.observe(chunk) {
                progress.report(event);
            }
        })
        .await;

    debug!(last_percent = tracker.last_percent(), "Sync output ended");
    progress.report(tracker.finish());

    if outcome.is_ok() {
        info!(%source, %destination, "Sync complete");
    }
    outcome
}
