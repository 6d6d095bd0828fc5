//! Snapshot lifecycle: create, list, delete, restore and prune, on top of a
//! [`Workspace`] for file access and [`TargetControl`] for freezing the
//! target container around copies.

use crate::names::RandomNames;
use crate::scope;
use crate::store::MetadataStore;
use ds_common::{
    DirStats, NameGenerator, ProgressSink, Result, Snapshot, SnapshotError, TargetControl,
    Workspace,
};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Random picks tried before falling back to a numeric suffix.
const NAME_ATTEMPTS: usize = 16;

/// Keeps the target container stopped while held. [`FreezeGuard::thaw`]
/// restarts it; dropping an unthawed guard restarts it as well.
///
/// A guard dropped mid-copy first halts the workspace given to
/// [`FreezeGuard::halting`], so nothing writes into the target's data once it
/// runs again.
pub struct FreezeGuard {
    targets: Arc<dyn TargetControl>,
    name: Option<String>,
    copier: Option<Arc<dyn Workspace>>,
}

impl FreezeGuard {
    pub async fn freeze(targets: Arc<dyn TargetControl>, name: &str) -> Result<Self> {
        targets.freeze(name).await?;
        Ok(Self {
            targets,
            name: Some(name.to_string()),
            copier: None,
        })
    }

    pub fn halting(mut self, copier: Arc<dyn Workspace>) -> Self {
        self.copier = Some(copier);
        self
    }

    pub async fn thaw(mut self) -> Result<()> {
        match self.name.take() {
            Some(name) => self.targets.unfreeze(&name).await,
            None => Ok(()),
        }
    }
}

impl Drop for FreezeGuard {
    fn drop(&mut self) {
        if let Some(name) = self.name.take() {
            let targets = self.targets.clone();
            let copier = self.copier.take();
            scope::run_cleanup("target container", async move {
                if let Some(copier) = copier {
                    if let Err(e) = copier.halt().await {
                        error!(
                            container = %name,
                            error = %e,
                            "Copy may still be running, leaving target container stopped"
                        );
                        return;
                    }
                }
                if let Err(e) = targets.unfreeze(&name).await {
                    error!(container = %name, error = %e, "Failed to restart target container");
                }
            });
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PruneOutcome {
    /// The store was already empty.
    Empty,
    /// The confirmation was declined; nothing was deleted.
    Declined,
    Pruned(Vec<Snapshot>),
}

pub struct SnapshotManager {
    fs: Arc<dyn Workspace>,
    targets: Arc<dyn TargetControl>,
    store: MetadataStore,
    names: Arc<dyn NameGenerator>,
}

impl SnapshotManager {
    pub fn new(fs: Arc<dyn Workspace>, targets: Arc<dyn TargetControl>) -> Self {
        Self {
            store: MetadataStore::new(fs.clone()),
            fs,
            targets,
            names: Arc::new(RandomNames),
        }
    }

    pub fn with_name_generator(mut self, names: Arc<dyn NameGenerator>) -> Self {
        self.names = names;
        self
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    /// All snapshots, oldest first.
    pub async fn list(&self) -> Result<Vec<Snapshot>> {
        self.store.load().await
    }

    /// Copies `source_dir` into a new snapshot while the target container is
    /// stopped. The snapshot is only recorded once the copy succeeded.
    #[instrument(skip(self, progress))]
    pub async fn create(
        &self,
        name: Option<&str>,
        source_dir: &str,
        target_container: &str,
        progress: &mut dyn ProgressSink,
    ) -> Result<Snapshot> {
        self.ensure_running(target_container).await?;

        let mut snapshots = self.store.load().await?;
        let name = match name.filter(|n| !n.is_empty()) {
            Some(name) if snapshots.iter().any(|s| s.name == name) => {
                return Err(SnapshotError::AlreadyExists(name.to_string()));
            }
            Some(name) => name.to_string(),
            None => self.unique_name(&snapshots),
        };

        let mut snapshot = Snapshot::new(Uuid::new_v4(), name);
        let path = snapshot.storage_path();
        info!(name = %snapshot.name, %path, "Creating snapshot");

        if let Err(e) = self
            .frozen_sync(target_container, source_dir, &path, progress)
            .await
        {
            if let Err(cleanup) = self.fs.remove(&path).await {
                warn!(%path, error = %cleanup, "Failed to remove partial snapshot copy");
            }
            return Err(e);
        }

        let stats = self.fs.stats(&path).await?;
        snapshot.size_bytes = stats.size_bytes;
        snapshot.file_count = stats.file_count;

        snapshots.push(snapshot.clone());
        self.store.save(&snapshots).await?;

        info!(
            name = %snapshot.name,
            size_bytes = snapshot.size_bytes,
            file_count = snapshot.file_count,
            "Snapshot created"
        );
        Ok(snapshot)
    }

    /// Removes the snapshot's files, then its metadata entry. A crash between
    /// the two leaves an orphaned directory, never a dangling entry.
    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str) -> Result<Snapshot> {
        let snapshots = self.store.load().await?;
        let snapshot = find_unique(&snapshots, name)?.clone();

        self.fs.remove(&snapshot.storage_path()).await?;

        let remaining: Vec<Snapshot> = snapshots.into_iter().filter(|s| s.name != name).collect();
        self.store.save(&remaining).await?;

        info!(%name, id = %snapshot.id, "Snapshot deleted");
        Ok(snapshot)
    }

    /// Mirrors a snapshot back into `destination_dir` while the target
    /// container is stopped. Without a name the most recent snapshot is used.
    #[instrument(skip(self, progress))]
    pub async fn restore(
        &self,
        name: Option<&str>,
        destination_dir: &str,
        target_container: &str,
        progress: &mut dyn ProgressSink,
    ) -> Result<Snapshot> {
        let snapshot = self.resolve(name).await?;
        self.ensure_running(target_container).await?;

        info!(name = %snapshot.name, %destination_dir, "Restoring snapshot");
        self.frozen_sync(
            target_container,
            &snapshot.storage_path(),
            destination_dir,
            progress,
        )
        .await?;

        Ok(snapshot)
    }

    /// Snapshot called `name`, or the latest one when no name is given.
    pub async fn resolve(&self, name: Option<&str>) -> Result<Snapshot> {
        let snapshots = self.store.load().await?;
        match name.filter(|n| !n.is_empty()) {
            Some(name) => find_unique(&snapshots, name).cloned(),
            None => snapshots.last().cloned().ok_or(SnapshotError::NoSnapshots),
        }
    }

    /// Deletes every snapshot, one at a time, once `confirm` agrees. Not
    /// transactional: a failure part-way leaves the earlier deletions done.
    pub async fn prune<C, F>(&self, confirm: C, mut before_delete: F) -> Result<PruneOutcome>
    where
        C: FnOnce(&[Snapshot]) -> bool + Send,
        F: FnMut(&Snapshot) + Send,
    {
        let snapshots = self.list().await?;
        if snapshots.is_empty() {
            return Ok(PruneOutcome::Empty);
        }
        if !confirm(&snapshots) {
            return Ok(PruneOutcome::Declined);
        }

        for snapshot in &snapshots {
            before_delete(snapshot);
            self.delete(&snapshot.name).await?;
        }
        Ok(PruneOutcome::Pruned(snapshots))
    }

    /// Size and file count of a live directory. Does not touch the store.
    pub async fn present_stats(&self, path: &str) -> Result<DirStats> {
        self.fs.stats(path).await
    }

    async fn ensure_running(&self, target_container: &str) -> Result<()> {
        if target_container.is_empty() {
            return Err(SnapshotError::Config(
                "no target container configured".to_string(),
            ));
        }
        if !self.targets.exists(target_container).await? {
            return Err(SnapshotError::TargetNotFound(target_container.to_string()));
        }
        if !self.targets.is_running(target_container).await? {
            return Err(SnapshotError::TargetNotRunning(
                target_container.to_string(),
            ));
        }
        Ok(())
    }

    /// Syncs with the target stopped, restarting it on every exit path. A
    /// copy error wins over an error restarting the target.
    async fn frozen_sync(
        &self,
        target_container: &str,
        source: &str,
        destination: &str,
        progress: &mut dyn ProgressSink,
    ) -> Result<()> {
        let frozen = FreezeGuard::freeze(self.targets.clone(), target_container)
            .await?
            .halting(self.fs.clone());
        let copied = self.fs.sync(source, destination, progress).await;
        let thawed = frozen.thaw().await;

        match (copied, thawed) {
            (Err(e), Err(thaw_err)) => {
                error!(container = %target_container, error = %thaw_err, "Failed to restart target container");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(()), thawed) => thawed,
        }
    }

    fn unique_name(&self, snapshots: &[Snapshot]) -> String {
        let taken = |candidate: &str| snapshots.iter().any(|s| s.name == candidate);

        let mut candidate = self.names.generate();
        for _ in 1..NAME_ATTEMPTS {
            if !taken(&candidate) {
                return candidate;
            }
            candidate = self.names.generate();
        }

        let mut suffix = 2;
        loop {
            let numbered = format!("{candidate}-{suffix}");
            if !taken(&numbered) {
                return numbered;
            }
            suffix += 1;
        }
    }
}

/// The single snapshot called `name`. More than one match means the store is
/// inconsistent and nothing should be touched.
fn find_unique<'a>(snapshots: &'a [Snapshot], name: &str) -> Result<&'a Snapshot> {
    let mut matches = snapshots.iter().filter(|s| s.name == name);
    match (matches.next(), matches.count()) {
        (None, _) => Err(SnapshotError::NotFound(name.to_string())),
        (Some(snapshot), 0) => Ok(snapshot),
        (Some(_), extra) => Err(SnapshotError::DuplicateName {
            name: name.to_string(),
            count: extra + 1,
        }),
    }
}
