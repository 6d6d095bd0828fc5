//! In-memory stand-ins for the container engine, shared by the integration
//! tests. Both fakes append to one journal so tests can check ordering.
#![allow(dead_code)]

use async_trait::async_trait;
use ds_common::{
    NameGenerator, ProgressEvent, ProgressSink, Result, SnapshotError, TargetControl, Workspace,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

fn under(path: &str, candidate: &str) -> bool {
    let prefix = format!("{}/", path.trim_end_matches('/'));
    candidate.starts_with(&prefix)
}

/// Files keyed by absolute path; directories exist implicitly.
pub struct MemoryWorkspace {
    files: Mutex<BTreeMap<String, String>>,
    journal: Journal,
    fail_sync: AtomicBool,
    hang_sync: AtomicBool,
    fail_halt: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryWorkspace {
    pub fn new(journal: Journal) -> Self {
        Self {
            files: Mutex::new(BTreeMap::new()),
            journal,
            fail_sync: AtomicBool::new(false),
            hang_sync: AtomicBool::new(false),
            fail_halt: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn seed(&self, path: &str, content: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_string());
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn files_under(&self, dir: &str) -> Vec<String> {
        self.files
            .lock()
            .unwrap()
            .keys()
            .filter(|p| under(dir, p))
            .cloned()
            .collect()
    }

    pub fn fail_sync(&self, fail: bool) {
        self.fail_sync.store(fail, Ordering::SeqCst);
    }

    /// Makes `sync` stall after its first progress report, like a copy
    /// that is still running when the caller gives up on it.
    pub fn hang_sync(&self, hang: bool) {
        self.hang_sync.store(hang, Ordering::SeqCst);
    }

    pub fn fail_halt(&self, fail: bool) {
        self.fail_halt.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn log(&self, entry: String) {
        self.journal.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl Workspace for MemoryWorkspace {
    async fn read_file(&self, path: &str) -> Result<String> {
        Ok(self.file(path).unwrap_or_default())
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SnapshotError::CommandFailed {
                command: format!("write {path}"),
                exit_code: 1,
                output: "read-only file system".to_string(),
            });
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.seed(path, content);
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.log(format!("remove {path}"));
        self.files
            .lock()
            .unwrap()
            .retain(|p, _| p != path && !under(path, p));
        Ok(())
    }

    async fn dir_size(&self, path: &str) -> Result<u64> {
        Ok(self
            .files
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| under(path, p))
            .map(|(_, content)| content.len() as u64)
            .sum())
    }

    async fn file_count(&self, path: &str) -> Result<u64> {
        Ok(self.files_under(path).len() as u64)
    }

    async fn sync(
        &self,
        source: &str,
        destination: &str,
        progress: &mut dyn ProgressSink,
    ) -> Result<()> {
        self.log(format!("sync {source} -> {destination}"));
        progress.report(ProgressEvent::Advanced {
            percent: 50,
            delta: 50,
        });

        if self.hang_sync.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        if self.fail_sync.load(Ordering::SeqCst) {
            // Leave a partial copy behind, like an interrupted rsync would
            self.seed(&format!("{destination}/partial"), "x");
            progress.report(ProgressEvent::Completed);
            return Err(SnapshotError::CommandFailed {
                command: format!("rsync {source} {destination}"),
                exit_code: 23,
                output: "partial transfer".to_string(),
            });
        }

        let mut files = self.files.lock().unwrap();
        files.retain(|p, _| !under(destination, p));
        let copies: Vec<(String, String)> = files
            .iter()
            .filter(|(p, _)| under(source, p))
            .map(|(p, content)| {
                let relative = &p[source.trim_end_matches('/').len()..];
                (
                    format!("{}{}", destination.trim_end_matches('/'), relative),
                    content.clone(),
                )
            })
            .collect();
        files.extend(copies);
        drop(files);

        progress.report(ProgressEvent::Completed);
        Ok(())
    }

    async fn halt(&self) -> Result<()> {
        self.log("halt".to_string());
        if self.fail_halt.load(Ordering::SeqCst) {
            return Err(SnapshotError::Engine("cannot remove helper".to_string()));
        }
        Ok(())
    }
}

/// Containers by name, with their running state.
pub struct RecordingTargets {
    containers: Mutex<HashMap<String, bool>>,
    journal: Journal,
    fail_unfreeze: AtomicBool,
}

impl RecordingTargets {
    pub fn new(journal: Journal) -> Self {
        Self {
            containers: Mutex::new(HashMap::new()),
            journal,
            fail_unfreeze: AtomicBool::new(false),
        }
    }

    pub fn with_container(self, name: &str, running: bool) -> Self {
        self.containers
            .lock()
            .unwrap()
            .insert(name.to_string(), running);
        self
    }

    pub fn running(&self, name: &str) -> Option<bool> {
        self.containers.lock().unwrap().get(name).copied()
    }

    pub fn fail_unfreeze(&self, fail: bool) {
        self.fail_unfreeze.store(fail, Ordering::SeqCst);
    }

    fn set_running(&self, name: &str, running: bool) -> Result<()> {
        match self.containers.lock().unwrap().get_mut(name) {
            Some(state) => {
                *state = running;
                Ok(())
            }
            None => Err(SnapshotError::TargetNotFound(name.to_string())),
        }
    }
}

#[async_trait]
impl TargetControl for RecordingTargets {
    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.running(name).is_some())
    }

    async fn is_running(&self, name: &str) -> Result<bool> {
        Ok(self.running(name).unwrap_or(false))
    }

    async fn freeze(&self, name: &str) -> Result<()> {
        self.journal.lock().unwrap().push(format!("freeze {name}"));
        self.set_running(name, false)
    }

    async fn unfreeze(&self, name: &str) -> Result<()> {
        self.journal.lock().unwrap().push(format!("unfreeze {name}"));
        if self.fail_unfreeze.load(Ordering::SeqCst) {
            return Err(SnapshotError::Engine("start failed".to_string()));
        }
        self.set_running(name, true)
    }
}

/// Hands out the given names in order, then repeats the last one.
pub struct ScriptedNames {
    names: Vec<String>,
    next: AtomicUsize,
}

impl ScriptedNames {
    pub fn new(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|n| n.to_string()).collect(),
            next: AtomicUsize::new(0),
        }
    }
}

impl NameGenerator for ScriptedNames {
    fn generate(&self) -> String {
        let i = self.next.fetch_add(1, Ordering::SeqCst);
        self.names[i.min(self.names.len() - 1)].clone()
    }
}
