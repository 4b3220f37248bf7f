//! # Resource Stats
//!
//! Memory and CPU figures for the process listing. A sample covers the tracked process
//! and all of its live descendants, since most commands run as a shell wrapper around the
//! real workload.
//!
//! CPU percentage is derived from the change in cumulative CPU time since the previous
//! sample of the same process, divided by the wall time in between, and may exceed 100%
//! on multi-core hosts up to `100 × processors`. The first sample has no previous point
//! and repeats the previous figure (zero).

use crate::{
    platform::{ProcessTable, memory::MemorySampler},
    registry::{CpuSample, ManagedProcess},
};
use serde::Serialize;
use std::{sync::Arc, time::Instant};

/// One rendered measurement of a process tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSample {
    pub memory: String,
    pub cpu: String,
    pub memory_kb: u64,
    pub cpu_percent: f64,
}

#[derive(Debug, Clone)]
pub struct StatsCollector {
    memory: Arc<dyn MemorySampler>,
    processors: usize,
}

impl StatsCollector {
    pub fn new(memory: Arc<dyn MemorySampler>) -> Self {
        let processors = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::with_processors(memory, processors)
    }

    pub fn with_processors(memory: Arc<dyn MemorySampler>, processors: usize) -> Self {
        Self {
            memory,
            processors: processors.max(1),
        }
    }

    /// Samples `process`, updating its rolling CPU state. `None` when the OS process is not
    /// (or no longer) alive.
    pub fn sample(&self, table: &ProcessTable, process: &ManagedProcess) -> Option<ResourceSample> {
        let tree = table.tree(process.pid()?);
        if tree.is_empty() {
            return None;
        }
        let memory_kb = self.memory.resident_kb(&tree);
        let cpu_nanos = table.cpu_nanos(&tree);

        let previous = process.cpu_sample();
        let now = Instant::now();
        let cpu_percent = match previous.last_sample {
            Some(last) => derive_cpu_percent(
                previous.last_cpu_nanos,
                cpu_nanos,
                now.duration_since(last).as_nanos(),
                self.processors,
            ),
            None => previous.last_usage_percent,
        };
        process.update_cpu_sample(CpuSample {
            last_sample: Some(now),
            last_cpu_nanos: cpu_nanos,
            last_usage_percent: cpu_percent,
        });

        Some(ResourceSample {
            memory: format_memory(memory_kb),
            cpu: format_cpu(cpu_percent),
            memory_kb,
            cpu_percent,
        })
    }
}

/// `100 × Δcpu / Δwall`, clamped to `[0, 100 × processors]`.
pub fn derive_cpu_percent(last_cpu_nanos: u64, cpu_nanos: u64, wall_nanos: u128, processors: usize) -> f64 {
    if wall_nanos == 0 {
        return 0.0;
    }
    let cpu_delta = cpu_nanos.saturating_sub(last_cpu_nanos) as f64;
    let percent = 100.0 * cpu_delta / wall_nanos as f64;
    percent.clamp(0.0, 100.0 * processors as f64)
}

pub fn format_memory(kb: u64) -> String {
    if kb > 1024 {
        format!("{} MB", kb / 1024)
    } else {
        format!("{kb} kB")
    }
}

pub fn format_cpu(percent: f64) -> String {
    format!("{percent:.1}%")
}
