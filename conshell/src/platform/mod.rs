//! # Platform Capabilities
//!
//! Everything that differs between operating-system families sits behind two small traits,
//! chosen once when the engine is built:
//!
//! - [`ShellLauncher`] builds the command that hands a command line to the system shell
//!   (`sh -c` or `cmd.exe /c`).
//! - [`memory::MemorySampler`] reports resident memory for a set of PIDs, either by reading
//!   a per-process pseudo-file or from a time-windowed bulk snapshot.
//!
//! [`ProcessTable`] is a one-shot `sysinfo` snapshot used to walk a process tree, sum CPU
//! time and force-terminate every descendant.

pub mod memory;
pub mod posix;
pub mod windows;

use crate::quoting::ShellFamily;
use memory::MemorySampler;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::process::Command;

pub use posix::PosixShell;
pub use windows::WindowsShell;

/// Builds the OS command that runs one command line through the platform shell.
pub trait ShellLauncher: Send + Sync + std::fmt::Debug {
    fn family(&self) -> ShellFamily;

    fn command(&self, command_line: &str) -> Command;
}

/// The launch and sampling strategies for this host.
#[derive(Clone, Debug)]
pub struct PlatformCapabilities {
    pub launcher: Arc<dyn ShellLauncher>,
    pub memory: Arc<dyn MemorySampler>,
}

impl PlatformCapabilities {
    /// Strategies for the host OS. `cache_window` bounds the age of bulk memory snapshots
    /// on platforms without a per-process memory file.
    pub fn native(cache_window: Duration) -> Self {
        let launcher: Arc<dyn ShellLauncher> = match ShellFamily::current() {
            ShellFamily::Posix => Arc::new(PosixShell),
            ShellFamily::Windows => Arc::new(WindowsShell),
        };
        Self {
            launcher,
            memory: native_memory(cache_window),
        }
    }
}

#[cfg(target_os = "linux")]
fn native_memory(_cache_window: Duration) -> Arc<dyn MemorySampler> {
    Arc::new(memory::ProcfsMemory::default())
}

#[cfg(not(target_os = "linux"))]
fn native_memory(cache_window: Duration) -> Arc<dyn MemorySampler> {
    Arc::new(memory::CachedMemory::new(
        memory::SysinfoEnumerator,
        cache_window,
    ))
}

/// Point-in-time view of every process on the host.
pub struct ProcessTable {
    system: System,
    children: HashMap<u32, Vec<u32>>,
}

impl ProcessTable {
    pub fn snapshot() -> Self {
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cpu().with_memory(),
        );

        let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
        for (pid, process) in system.processes() {
            // Threads show up as tasks of their process on Linux; they are not children.
            if process.thread_kind().is_some() {
                continue;
            }
            if let Some(parent) = process.parent() {
                children
                    .entry(parent.as_u32())
                    .or_default()
                    .push(pid.as_u32());
            }
        }
        for kids in children.values_mut() {
            kids.sort_unstable();
        }
        Self { system, children }
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.system.process(Pid::from_u32(pid)).is_some()
    }

    /// `root` followed by all of its live descendants, breadth first. Empty when `root`
    /// is gone.
    pub fn tree(&self, root: u32) -> Vec<u32> {
        if !self.contains(root) {
            return Vec::new();
        }
        let mut tree = Vec::new();
        let mut queue = VecDeque::from([root]);
        while let Some(pid) = queue.pop_front() {
            if tree.contains(&pid) {
                continue;
            }
            tree.push(pid);
            if let Some(kids) = self.children.get(&pid) {
                queue.extend(kids.iter().copied());
            }
        }
        tree
    }

    /// Cumulative CPU time of `pids` in nanoseconds.
    pub fn cpu_nanos(&self, pids: &[u32]) -> u64 {
        pids.iter()
            .filter_map(|pid| self.system.process(Pid::from_u32(*pid)))
            .map(|process| process.accumulated_cpu_time().saturating_mul(1_000_000))
            .sum()
    }

    /// Force-kills `root` and every descendant, deepest first. Returns how many signals
    /// were delivered.
    pub fn terminate_tree(&self, root: u32) -> usize {
        self.tree(root)
            .iter()
            .rev()
            .filter_map(|pid| self.system.process(Pid::from_u32(*pid)))
            .filter(|process| process.kill())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_launcher_matches_host_family() {
        let platform = PlatformCapabilities::native(Duration::from_secs(5));
        assert_eq!(platform.launcher.family(), ShellFamily::current());
    }

    #[test]
    fn own_process_is_in_the_table() {
        let me = std::process::id();
        let table = ProcessTable::snapshot();
        assert!(table.contains(me));
        assert_eq!(table.tree(me).first(), Some(&me));
    }

    #[test]
    fn missing_root_has_empty_tree() {
        let table = ProcessTable::snapshot();
        assert!(table.tree(u32::MAX - 1).is_empty());
        assert_eq!(table.terminate_tree(u32::MAX - 1), 0);
        assert_eq!(table.cpu_nanos(&[u32::MAX - 1]), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminate_tree_kills_descendants() {
        let mut child = PosixShell
            .command("sleep 30 & sleep 30; wait")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let table = ProcessTable::snapshot();
        let tree = table.tree(pid);
        assert!(tree.len() >= 2, "expected shell plus sleeps, got {tree:?}");
        assert!(table.terminate_tree(pid) >= 1);

        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(!status.success());
    }
}
