mod support;

use async_trait::async_trait;
use ds_common::{ProgressEvent, Result, SnapshotError, TargetControl};
use ds_executor::{FreezeGuard, SnapshotManager};
use mockall::{mock, predicate::eq, Sequence};
use std::sync::Arc;
use support::{entries, journal, MemoryWorkspace};

mock! {
    pub Targets {}

    #[async_trait]
    impl TargetControl for Targets {
        async fn exists(&self, name: &str) -> Result<bool>;
        async fn is_running(&self, name: &str) -> Result<bool>;
        async fn freeze(&self, name: &str) -> Result<()>;
        async fn unfreeze(&self, name: &str) -> Result<()>;
    }
}

const SNAPSHOT_DB: &str = "/mnt/ds/db.json";

fn manager(fs: Arc<MemoryWorkspace>, targets: MockTargets) -> SnapshotManager {
    SnapshotManager::new(fs, Arc::new(targets))
}

#[tokio::test]
async fn test_restore_of_unknown_name_never_touches_target() {
    let fs = Arc::new(MemoryWorkspace::new(journal()));
    fs.seed(
        SNAPSHOT_DB,
        r#"[{"uuid": "00000000-0000-0000-0000-000000000001", "name": "known", "size": 1, "file_count": 1, "created": 1700000000}]"#,
    );

    let mut targets = MockTargets::new();
    targets.expect_exists().never();
    targets.expect_is_running().never();
    targets.expect_freeze().never();
    targets.expect_unfreeze().never();

    let mut progress: Vec<ProgressEvent> = Vec::new();
    let err = manager(fs, targets)
        .restore(Some("unknown"), "/var/lib/data", "db", &mut progress)
        .await
        .unwrap_err();

    assert!(matches!(err, SnapshotError::NotFound(name) if name == "unknown"));
    assert!(progress.is_empty());
}

#[tokio::test]
async fn test_restore_latest_from_empty_store_never_touches_target() {
    let fs = Arc::new(MemoryWorkspace::new(journal()));

    let mut targets = MockTargets::new();
    targets.expect_freeze().never();
    targets.expect_unfreeze().never();

    let mut progress: Vec<ProgressEvent> = Vec::new();
    let err = manager(fs, targets)
        .restore(None, "/var/lib/data", "db", &mut progress)
        .await
        .unwrap_err();

    assert!(matches!(err, SnapshotError::NoSnapshots));
}

#[tokio::test]
async fn test_create_on_stopped_target_never_freezes() {
    let fs = Arc::new(MemoryWorkspace::new(journal()));

    let mut targets = MockTargets::new();
    targets
        .expect_exists()
        .with(eq("db"))
        .times(1)
        .returning(|_| Ok(true));
    targets
        .expect_is_running()
        .with(eq("db"))
        .times(1)
        .returning(|_| Ok(false));
    targets.expect_freeze().never();
    targets.expect_unfreeze().never();

    let mut progress: Vec<ProgressEvent> = Vec::new();
    let err = manager(fs.clone(), targets)
        .create(Some("first"), "/var/lib/data", "db", &mut progress)
        .await
        .unwrap_err();

    assert!(matches!(err, SnapshotError::TargetNotRunning(name) if name == "db"));
    assert!(fs.file(SNAPSHOT_DB).is_none());
}

#[tokio::test]
async fn test_create_freezes_then_unfreezes_exactly_once() {
    let fs = Arc::new(MemoryWorkspace::new(journal()));
    fs.seed("/var/lib/data/table", "rows");

    let mut seq = Sequence::new();
    let mut targets = MockTargets::new();
    targets.expect_exists().returning(|_| Ok(true));
    targets.expect_is_running().returning(|_| Ok(true));
    targets
        .expect_freeze()
        .with(eq("db"))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(()));
    targets
        .expect_unfreeze()
        .with(eq("db"))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(()));

    let mut progress: Vec<ProgressEvent> = Vec::new();
    let snapshot = manager(fs.clone(), targets)
        .create(Some("first"), "/var/lib/data", "db", &mut progress)
        .await
        .unwrap();

    assert_eq!(
        fs.file(&format!("{}/table", snapshot.storage_path())),
        Some("rows".to_string())
    );
}

#[tokio::test]
async fn test_failed_freeze_yields_no_guard() {
    let mut targets = MockTargets::new();
    targets
        .expect_freeze()
        .times(1)
        .returning(|name| Err(SnapshotError::Engine(format!("cannot stop {name}"))));
    targets.expect_unfreeze().never();

    let result = FreezeGuard::freeze(Arc::new(targets), "db").await;
    assert!(matches!(result, Err(SnapshotError::Engine(_))));
}

#[tokio::test]
async fn test_thaw_unfreezes_once() {
    let mut targets = MockTargets::new();
    targets.expect_freeze().times(1).returning(|_| Ok(()));
    targets
        .expect_unfreeze()
        .with(eq("db"))
        .times(1)
        .returning(|_| Ok(()));

    let guard = FreezeGuard::freeze(Arc::new(targets), "db").await.unwrap();
    guard.thaw().await.unwrap();
}

#[tokio::test]
async fn test_thaw_reports_restart_failure() {
    let mut targets = MockTargets::new();
    targets.expect_freeze().returning(|_| Ok(()));
    targets
        .expect_unfreeze()
        .times(1)
        .returning(|_| Err(SnapshotError::Engine("start failed".to_string())));

    let guard = FreezeGuard::freeze(Arc::new(targets), "db").await.unwrap();
    assert!(matches!(guard.thaw().await, Err(SnapshotError::Engine(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropped_guard_unfreezes() {
    let mut targets = MockTargets::new();
    targets.expect_freeze().times(1).returning(|_| Ok(()));
    targets
        .expect_unfreeze()
        .with(eq("db"))
        .times(1)
        .returning(|_| Ok(()));
    let targets = Arc::new(targets);

    let guard = FreezeGuard::freeze(targets.clone(), "db").await.unwrap();
    drop(guard);

    // The cleanup ran before drop returned, so this is the last reference
    assert_eq!(Arc::strong_count(&targets), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropped_guard_halts_copier_before_unfreezing() {
    let log = journal();
    let fs = Arc::new(MemoryWorkspace::new(log.clone()));

    let mut targets = MockTargets::new();
    targets.expect_freeze().times(1).returning(|_| Ok(()));
    let unfreezes = log.clone();
    targets
        .expect_unfreeze()
        .with(eq("db"))
        .times(1)
        .returning(move |name| {
            unfreezes.lock().unwrap().push(format!("unfreeze {name}"));
            Ok(())
        });

    let guard = FreezeGuard::freeze(Arc::new(targets), "db")
        .await
        .unwrap()
        .halting(fs);
    drop(guard);

    assert_eq!(entries(&log), vec!["halt", "unfreeze db"]);
}

#[tokio::test]
async fn test_thawed_guard_leaves_copier_alone() {
    let log = journal();
    let fs = Arc::new(MemoryWorkspace::new(log.clone()));

    let mut targets = MockTargets::new();
    targets.expect_freeze().times(1).returning(|_| Ok(()));
    targets.expect_unfreeze().times(1).returning(|_| Ok(()));

    let guard = FreezeGuard::freeze(Arc::new(targets), "db")
        .await
        .unwrap()
        .halting(fs);
    guard.thaw().await.unwrap();

    assert!(entries(&log).is_empty());
}
