//! One handler per subcommand. Every handler that touches snapshots runs
//! inside a helper session, which is released before the handler returns.

use crate::output::{self, CopyProgress};
use crate::settings::{Settings, SETTINGS_FILE};
use colored::Colorize;
use ds_common::{DirStats, Result, Snapshot};
use ds_executor::bollard::Docker;
use ds_executor::{
    with_helper, HelperManager, HelperSession, PruneOutcome, ShellWorkspace, SnapshotManager,
};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub struct App {
    settings: Settings,
    helper: HelperManager,
}

impl App {
    pub fn new(settings: Settings, docker: Arc<Docker>) -> Self {
        let helper = HelperManager::new(docker, settings.namespace.clone());
        Self { settings, helper }
    }

    fn snapshots(&self, session: Arc<HelperSession>) -> SnapshotManager {
        SnapshotManager::new(
            Arc::new(ShellWorkspace::new(session)),
            Arc::new(self.helper.targets()),
        )
    }

    /// Runs `op` with a snapshot manager backed by a freshly acquired helper.
    async fn with_snapshots<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce(SnapshotManager) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        debug!(
            namespace = %self.helper.namespace(),
            target = %self.settings.container_name,
            "Acquiring helper"
        );
        with_helper(&self.helper, &self.settings.container_name, |session| {
            op(self.snapshots(session))
        })
        .await
    }
}

async fn listing(
    snapshots: &SnapshotManager,
    directory: &str,
) -> Result<Option<(Vec<Snapshot>, DirStats)>> {
    let stored = snapshots.list().await?;
    if stored.is_empty() {
        return Ok(None);
    }
    let present = snapshots.present_stats(directory).await?;
    Ok(Some((stored, present)))
}

pub async fn list(app: &App) -> Result<()> {
    let directory = app.settings.directory.as_str();
    let found = app
        .with_snapshots(|snapshots| async move { listing(&snapshots, directory).await })
        .await?;

    match found {
        None => println!("No snapshots found"),
        Some((stored, present)) => println!("{}", output::snapshot_table(&stored, present)),
    }
    Ok(())
}

pub async fn create(app: &App, name: Option<String>) -> Result<()> {
    let source = app.settings.directory.as_str();
    let target = app.settings.container_name.as_str();

    let snapshot = app
        .with_snapshots(|snapshots| async move {
            let mut progress = CopyProgress::new("Copying");
            snapshots
                .create(name.as_deref(), source, target, &mut progress)
                .await
        })
        .await?;

    println!("{}", format!("Created `{}`", snapshot.name).green());
    Ok(())
}

pub async fn delete(app: &App, name: &str) -> Result<()> {
    app.with_snapshots(|snapshots| async move { snapshots.delete(name).await })
        .await?;

    println!("{}", format!("Deleted `{name}`").red());
    Ok(())
}

/// Resolves the snapshot first so the user sees which one is restored
/// before the target is stopped.
async fn restore_chosen(
    snapshots: &SnapshotManager,
    name: Option<&str>,
    destination: &str,
    target: &str,
) -> Result<Snapshot> {
    let chosen = snapshots.resolve(name).await?;
    let message = match name.filter(|n| !n.is_empty()) {
        Some(_) => format!("Restoring `{}`", chosen.name),
        None => format!(
            "No snapshot name given, restoring latest snapshot `{}`",
            chosen.name
        ),
    };
    println!("{}", message.green());

    let mut progress = CopyProgress::new("Restoring");
    snapshots
        .restore(Some(chosen.name.as_str()), destination, target, &mut progress)
        .await
}

pub async fn restore(app: &App, name: Option<String>) -> Result<()> {
    let destination = app.settings.directory.as_str();
    let target = app.settings.container_name.as_str();

    let restored = app
        .with_snapshots(|snapshots| async move {
            restore_chosen(&snapshots, name.as_deref(), destination, target).await
        })
        .await?;

    println!("{}", format!("Restored `{}`", restored.name).green());
    Ok(())
}

fn prune_question(snapshots: &[Snapshot]) -> String {
    let total: u64 = snapshots.iter().map(|s| s.size_bytes).sum();
    format!(
        "Prune {} {} ({})?",
        snapshots.len(),
        output::pluralize("snapshot", snapshots.len()),
        output::format_size(total)
    )
}

pub async fn prune(app: &App, assume_yes: bool) -> Result<()> {
    let outcome = app
        .with_snapshots(|snapshots| async move {
            snapshots
                .prune(
                    |all| assume_yes || output::confirm(&prune_question(all)).unwrap_or(false),
                    |snapshot| {
                        let line = format!(
                            "Deleting {} ({})",
                            snapshot.name,
                            output::format_size(snapshot.size_bytes)
                        );
                        println!("{}", line.red());
                    },
                )
                .await
        })
        .await?;

    match outcome {
        PruneOutcome::Empty => println!("{}", "Nothing to prune".yellow()),
        PruneOutcome::Declined => println!("Aborted."),
        PruneOutcome::Pruned(pruned) => {
            let line = format!(
                "Pruned {} {}",
                pruned.len(),
                output::pluralize("snapshot", pruned.len())
            );
            println!("{}", line.green());
        }
    }
    Ok(())
}

pub async fn names(app: &App) -> Result<()> {
    let stored = app
        .with_snapshots(|snapshots| async move { snapshots.list().await })
        .await?;
    for snapshot in stored {
        println!("{}", snapshot.name);
    }
    Ok(())
}

pub fn init(path: &Path) -> Result<()> {
    Settings::init(path)?;
    println!("{}", format!("Created `{SETTINGS_FILE}`").green());
    Ok(())
}
