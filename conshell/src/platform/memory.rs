//! Resident memory sampling strategies.

use std::{
    collections::HashMap,
    fmt,
    path::PathBuf,
    sync::Mutex,
    time::{Duration, Instant},
};
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};

/// Reports resident memory for a group of processes.
pub trait MemorySampler: Send + Sync + fmt::Debug {
    /// Total resident memory of `pids` in kilobytes. PIDs that vanished count as zero.
    fn resident_kb(&self, pids: &[u32]) -> u64;
}

/// Reads `VmRSS` from `/proc/<pid>/status` for each process.
#[derive(Debug, Clone)]
pub struct ProcfsMemory {
    root: PathBuf,
}

impl Default for ProcfsMemory {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/proc"),
        }
    }
}

impl ProcfsMemory {
    /// Reads from an alternative proc mount.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read_kb(&self, pid: u32) -> Option<u64> {
        let status = std::fs::read_to_string(self.root.join(pid.to_string()).join("status")).ok()?;
        parse_vm_rss(&status)
    }
}

impl MemorySampler for ProcfsMemory {
    fn resident_kb(&self, pids: &[u32]) -> u64 {
        pids.iter().filter_map(|pid| self.read_kb(*pid)).sum()
    }
}

/// Extracts the `VmRSS:` value (kB) from a `/proc/<pid>/status` body.
pub fn parse_vm_rss(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|value| value.parse().ok())
}

/// One bulk enumeration of resident memory for every process on the host.
pub trait ProcessEnumerator: Send + Sync {
    fn memory_by_pid(&self) -> HashMap<u32, u64>;
}

/// Bulk enumeration through `sysinfo`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SysinfoEnumerator;

impl ProcessEnumerator for SysinfoEnumerator {
    fn memory_by_pid(&self) -> HashMap<u32, u64> {
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        system
            .processes()
            .iter()
            .map(|(pid, process)| (pid.as_u32(), process.memory() / 1024))
            .collect()
    }
}

struct Snapshot {
    taken: Instant,
    memory: HashMap<u32, u64>,
}

/// Serves memory lookups from a snapshot that is refreshed at most once per window.
///
/// The refresh happens while the snapshot lock is held, so concurrent samplers wait for a
/// single refresh instead of each starting their own.
pub struct CachedMemory<E> {
    enumerator: E,
    window: Duration,
    snapshot: Mutex<Option<Snapshot>>,
}

impl<E> fmt::Debug for CachedMemory<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedMemory")
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

impl<E: ProcessEnumerator> CachedMemory<E> {
    pub fn new(enumerator: E, window: Duration) -> Self {
        Self {
            enumerator,
            window,
            snapshot: Mutex::new(None),
        }
    }
}

impl<E: ProcessEnumerator> MemorySampler for CachedMemory<E> {
    fn resident_kb(&self, pids: &[u32]) -> u64 {
        let mut guard = self
            .snapshot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let stale = guard
            .as_ref()
            .is_none_or(|snapshot| snapshot.taken.elapsed() >= self.window);
        if stale {
            tracing::trace!("Refreshing bulk memory snapshot");
            *guard = Some(Snapshot {
                taken: Instant::now(),
                memory: self.enumerator.memory_by_pid(),
            });
        }
        guard
            .as_ref()
            .map(|snapshot| {
                pids.iter()
                    .filter_map(|pid| snapshot.memory.get(pid))
                    .sum()
            })
            .unwrap_or_default()
    }
}
