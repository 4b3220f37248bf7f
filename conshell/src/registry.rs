//! # Process Registry
//!
//! The registry is the single source of truth for which process IDs are tracked. It maps
//! small positive integers to [`ManagedProcess`] lifecycle objects, allocating the lowest
//! free ID on every reservation so IDs stay short for the operator.
//!
//! Reservation and removal take the write lock, which makes them mutually exclusive.
//! Listing takes a cloned snapshot of the `Arc`s under the read lock and releases it
//! immediately, so rendering a listing never holds up launches or teardown.
//!
//! Removal is idempotent. Several exit paths (natural exit, timeout, operator stop,
//! shutdown) race to remove the same entry, and only the one that actually removes it
//! reports anything. [`ProcessRegistry::remove_entry`] additionally checks identity so a
//! slow task can never remove a newer process that reused its ID.

use crate::process_log::ProcessLog;
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant, SystemTime},
};
use tokio::{io::AsyncWriteExt, process::ChildStdin, sync::RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Rolling CPU sampling state, owned by the stats collector.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CpuSample {
    pub last_sample: Option<Instant>,
    pub last_cpu_nanos: u64,
    pub last_usage_percent: f64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One engine-tracked execution, whether or not its OS process has started yet.
#[derive(Debug)]
pub struct ManagedProcess {
    id: u32,
    command_text: String,
    started_at: SystemTime,
    started: Instant,
    cancellation: CancellationToken,
    pid: Mutex<Option<u32>>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    log: Mutex<Option<ProcessLog>>,
    sample: Mutex<CpuSample>,
}

impl ManagedProcess {
    fn new(id: u32, command_text: String) -> Self {
        Self {
            id,
            command_text,
            started_at: SystemTime::now(),
            started: Instant::now(),
            cancellation: CancellationToken::new(),
            pid: Mutex::new(None),
            stdin: tokio::sync::Mutex::new(None),
            log: Mutex::new(None),
            sample: Mutex::new(CpuSample::default()),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn command_text(&self) -> &str {
        &self.command_text
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// OS process ID, present once the process has actually been spawned.
    pub fn pid(&self) -> Option<u32> {
        *lock(&self.pid)
    }

    pub fn is_starting(&self) -> bool {
        self.pid().is_none()
    }

    /// Records the spawned OS process and its input pipe.
    pub async fn attach(&self, pid: Option<u32>, stdin: Option<ChildStdin>) {
        *lock(&self.pid) = pid;
        *self.stdin.lock().await = stdin;
    }

    pub fn set_log(&self, log: ProcessLog) {
        *lock(&self.log) = Some(log);
    }

    pub fn has_log(&self) -> bool {
        lock(&self.log).is_some()
    }

    /// Appends a line to the per-process log if one is open. Write failures close the log.
    pub fn append_log(&self, line: &str) {
        let mut guard = lock(&self.log);
        if let Some(log) = guard.as_mut()
            && let Err(e) = log.append(line)
        {
            warn!("Process {} log write failed, closing log: {}", self.id, e);
            *guard = None;
        }
    }

    /// Marks the process as abandoned. Observed by its task at every checkpoint.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Writes `text` and a newline to the process input and flushes.
    ///
    /// Returns `Ok(false)` when there is no open input pipe.
    pub async fn write_input(&self, text: &str) -> std::io::Result<bool> {
        let mut guard = self.stdin.lock().await;
        let Some(stdin) = guard.as_mut() else {
            return Ok(false);
        };
        let mut payload = Vec::with_capacity(text.len() + 1);
        payload.extend_from_slice(text.as_bytes());
        payload.push(b'\n');
        stdin.write_all(&payload).await?;
        stdin.flush().await?;
        Ok(true)
    }

    /// Closes the input pipe and the log. Each is taken out of its slot, so only the first
    /// call on any exit path does anything.
    pub async fn close_io(&self) {
        let stdin = self.stdin.lock().await.take();
        if let Some(mut stdin) = stdin
            && let Err(e) = stdin.shutdown().await
        {
            debug!("Process {} stdin close: {}", self.id, e);
        }
        let log = lock(&self.log).take();
        if let Some(log) = log
            && let Err(e) = log.close()
        {
            warn!("Process {} log close failed: {}", self.id, e);
        }
    }

    pub fn cpu_sample(&self) -> CpuSample {
        *lock(&self.sample)
    }

    pub fn update_cpu_sample(&self, sample: CpuSample) {
        *lock(&self.sample) = sample;
    }
}

/// Mapping from process ID to its lifecycle object.
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    processes: Arc<RwLock<BTreeMap<u32, Arc<ManagedProcess>>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically allocates the lowest free positive ID and registers a new process under it.
    pub async fn reserve(&self, command_text: String) -> Arc<ManagedProcess> {
        let mut processes = self.processes.write().await;
        let id = lowest_free_id(&processes);
        let process = Arc::new(ManagedProcess::new(id, command_text));
        processes.insert(id, Arc::clone(&process));
        debug!("Reserved process id {}", id);
        process
    }

    pub async fn get(&self, id: u32) -> Option<Arc<ManagedProcess>> {
        self.processes.read().await.get(&id).cloned()
    }

    pub async fn contains(&self, id: u32) -> bool {
        self.processes.read().await.contains_key(&id)
    }

    /// Removes and returns the entry for `id`. A second removal returns `None`.
    pub async fn remove(&self, id: u32) -> Option<Arc<ManagedProcess>> {
        let removed = self.processes.write().await.remove(&id);
        if removed.is_some() {
            debug!("Removed process id {}", id);
        }
        removed
    }

    /// Removes `process` only if it is still the entry registered under its ID.
    pub async fn remove_entry(&self, process: &Arc<ManagedProcess>) -> bool {
        let mut processes = self.processes.write().await;
        match processes.get(&process.id()) {
            Some(current) if Arc::ptr_eq(current, process) => {
                processes.remove(&process.id());
                debug!("Removed process id {}", process.id());
                true
            }
            _ => false,
        }
    }

    /// Snapshot of every tracked process in ID order.
    pub async fn list_all(&self) -> Vec<Arc<ManagedProcess>> {
        self.processes.read().await.values().cloned().collect()
    }

    /// Removes every entry at once, for shutdown.
    pub async fn drain(&self) -> Vec<Arc<ManagedProcess>> {
        let mut processes = self.processes.write().await;
        std::mem::take(&mut *processes).into_values().collect()
    }
}

fn lowest_free_id(processes: &BTreeMap<u32, Arc<ManagedProcess>>) -> u32 {
    // Keys iterate in ascending order, so the first gap is the answer.
    let mut candidate = 1;
    for &id in processes.keys() {
        if id != candidate {
            break;
        }
        candidate += 1;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn ids_are_dense_from_one() {
        let registry = ProcessRegistry::new();
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(registry.reserve(format!("cmd {i}")).await.id());
        }
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn removed_id_is_reused_first() {
        let registry = ProcessRegistry::new();
        for _ in 0..4 {
            registry.reserve("x".to_string()).await;
        }
        assert!(registry.remove(2).await.is_some());
        assert_eq!(registry.reserve("y".to_string()).await.id(), 2);
        assert_eq!(registry.reserve("z".to_string()).await.id(), 5);
    }

    #[tokio::test]
    async fn removal_is_idempotent() {
        let registry = ProcessRegistry::new();
        let process = registry.reserve("x".to_string()).await;
        assert!(registry.remove(process.id()).await.is_some());
        assert!(registry.remove(process.id()).await.is_none());
        assert!(!registry.remove_entry(&process).await);
    }

    #[tokio::test]
    async fn stale_entry_does_not_remove_reused_id() {
        let registry = ProcessRegistry::new();
        let old = registry.reserve("old".to_string()).await;
        registry.remove(old.id()).await;
        let new = registry.reserve("new".to_string()).await;
        assert_eq!(old.id(), new.id());

        assert!(!registry.remove_entry(&old).await);
        assert!(registry.contains(new.id()).await);
        assert!(registry.remove_entry(&new).await);
    }

    #[tokio::test]
    async fn concurrent_reservations_get_distinct_ids() {
        let registry = ProcessRegistry::new();
        let handles: Vec<_> = (0..32)
            .map(|i| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.reserve(format!("{i}")).await.id() })
            })
            .collect();
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort_unstable();
        assert_eq!(ids, (1..=32).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn drain_empties_registry() {
        let registry = ProcessRegistry::new();
        registry.reserve("a".to_string()).await;
        registry.reserve("b".to_string()).await;
        assert_eq!(registry.drain().await.len(), 2);
        assert!(registry.list_all().await.is_empty());
        assert_eq!(registry.reserve("c".to_string()).await.id(), 1);
    }

    #[tokio::test]
    async fn process_starts_without_os_handle() {
        let registry = ProcessRegistry::new();
        let process = registry.reserve("x".to_string()).await;
        assert!(process.is_starting());
        assert!(!process.write_input("hello").await.unwrap());

        process.attach(Some(4242), None).await;
        assert_eq!(process.pid(), Some(4242));
        assert!(!process.is_starting());
    }

    #[tokio::test]
    async fn close_io_closes_log_once() {
        let dir = TempDir::new().unwrap();
        let registry = ProcessRegistry::new();
        let process = registry.reserve("echo".to_string()).await;
        let log = ProcessLog::create(dir.path(), process.id(), "echo", SystemTime::now()).unwrap();
        let path = log.path().to_path_buf();
        process.set_log(log);
        process.append_log("line");

        process.close_io().await;
        process.close_io().await;
        assert!(!process.has_log());

        let text = std::fs::read_to_string(path).unwrap();
        assert_eq!(text.matches("End Time:").count(), 1);
    }
}
