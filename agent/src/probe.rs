//! Runtime introspection boundary
//!
//! [`RuntimeProbe`] supplies everything only the monitored runtime can
//! know: the thread dump (with lock ownership and lock-wait targets),
//! per-pool memory usage, the loaded-class count and cumulative GC
//! time. Embedders hosting a managed runtime plug in their own
//! implementation; [`HostRuntimeProbe`] is the built-in host-level
//! fallback that reads `/proc/self/task` and reports the managed-only
//! capabilities as unsupported.

use std::fs;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::memory::{FallbackMemoryProvider, MemoryInfoProvider};
use crate::sample::PoolUsage;

/// Scheduling state of one thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreadState {
    Running,
    Sleeping,
    DiskSleep,
    Blocked,
    Stopped,
    Zombie,
    Unknown,
}

impl ThreadState {
    /// Map a procfs state character
    pub fn from_proc_char(c: char) -> Self {
        match c {
            'R' => ThreadState::Running,
            'S' => ThreadState::Sleeping,
            'D' => ThreadState::DiskSleep,
            'T' | 't' => ThreadState::Stopped,
            'Z' => ThreadState::Zombie,
            _ => ThreadState::Unknown,
        }
    }

    /// Wire tag for the binary sample codec
    pub fn tag(self) -> u8 {
        match self {
            ThreadState::Running => 0,
            ThreadState::Sleeping => 1,
            ThreadState::DiskSleep => 2,
            ThreadState::Blocked => 3,
            ThreadState::Stopped => 4,
            ThreadState::Zombie => 5,
            ThreadState::Unknown => 6,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => ThreadState::Running,
            1 => ThreadState::Sleeping,
            2 => ThreadState::DiskSleep,
            3 => ThreadState::Blocked,
            4 => ThreadState::Stopped,
            5 => ThreadState::Zombie,
            6 => ThreadState::Unknown,
            _ => return None,
        })
    }
}

/// Point-in-time snapshot of one live thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub id: u64,
    pub name: String,
    pub state: ThreadState,
    pub stack_trace: Vec<String>,
    /// Identity of the lock this thread is blocked acquiring, if any
    pub waiting_on: Option<u64>,
    /// Identities of the locks this thread currently owns
    pub locks_held: Vec<u64>,
}

impl ThreadInfo {
    pub fn new(id: u64, name: impl Into<String>, state: ThreadState) -> Self {
        Self {
            id,
            name: name.into(),
            state,
            stack_trace: Vec::new(),
            waiting_on: None,
            locks_held: Vec::new(),
        }
    }
}

/// What only the monitored runtime can report
pub trait RuntimeProbe: Send + Sync {
    /// Current loaded-class count, `None` when the runtime has no
    /// notion of one
    fn loaded_class_count(&self) -> Option<u64>;

    /// Cumulative time spent in garbage collection since runtime start
    fn gc_time(&self) -> Option<Duration>;

    /// Ordered per-memory-pool usage records
    fn memory_pools(&self) -> Vec<PoolUsage>;

    /// Snapshot of all live threads
    fn thread_dump(&self) -> Vec<ThreadInfo>;
}

/// Host-level probe reading `/proc/self/task`.
///
/// Lock ownership is not observable at this level, so the dump carries
/// no waits-for information and the deadlock check degrades to a
/// non-problem report. Class count and GC time are unsupported.
pub struct HostRuntimeProbe {
    memory: FallbackMemoryProvider,
}

impl HostRuntimeProbe {
    pub fn new() -> Self {
        Self {
            memory: FallbackMemoryProvider::host_default(),
        }
    }

    /// Parse a `/proc/<pid>/task/<tid>/stat` line into (name, state).
    /// The comm field is parenthesized and may itself contain spaces.
    fn parse_task_stat(content: &str) -> Option<(String, ThreadState)> {
        let open = content.find('(')?;
        let close = content.rfind(')')?;
        let name = content.get(open + 1..close)?.to_string();
        let state_char = content.get(close + 2..)?.chars().next()?;
        Some((name, ThreadState::from_proc_char(state_char)))
    }
}

impl Default for HostRuntimeProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeProbe for HostRuntimeProbe {
    fn loaded_class_count(&self) -> Option<u64> {
        None
    }

    fn gc_time(&self) -> Option<Duration> {
        None
    }

    fn memory_pools(&self) -> Vec<PoolUsage> {
        let mut pools = Vec::with_capacity(2);
        if let Some(physical) = self.memory.physical_memory() {
            pools.push(physical);
        }
        if let Some(swap) = self.memory.swap() {
            pools.push(swap);
        }
        pools
    }

    fn thread_dump(&self) -> Vec<ThreadInfo> {
        let entries = match fs::read_dir("/proc/self/task") {
            Ok(entries) => entries,
            Err(e) => {
                debug!("thread enumeration unavailable: {}", e);
                return Vec::new();
            }
        };

        let mut threads = Vec::new();
        for entry in entries.flatten() {
            let tid = match entry.file_name().to_string_lossy().parse::<u64>() {
                Ok(tid) => tid,
                Err(_) => continue,
            };
            // Tasks may exit between readdir and the stat read
            let content = match fs::read_to_string(entry.path().join("stat")) {
                Ok(content) => content,
                Err(_) => continue,
            };
            if let Some((name, state)) = Self::parse_task_stat(&content) {
                threads.push(ThreadInfo::new(tid, name, state));
            }
        }
        threads.sort_by_key(|t| t.id);
        threads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_task_stat() {
        let line = "12345 (tokio-runtime-w) S 1 12345 12345 0 -1 4194368 233 0 0 0 4 1 0 0 20\n";
        let (name, state) = HostRuntimeProbe::parse_task_stat(line).unwrap();
        assert_eq!(name, "tokio-runtime-w");
        assert_eq!(state, ThreadState::Sleeping);
    }

    #[test]
    fn test_parse_task_stat_name_with_parens() {
        let line = "7 (weird (name)) R 1 7 7 0 -1 0 0\n";
        let (name, state) = HostRuntimeProbe::parse_task_stat(line).unwrap();
        assert_eq!(name, "weird (name)");
        assert_eq!(state, ThreadState::Running);
    }

    #[test]
    fn test_parse_task_stat_garbage() {
        assert!(HostRuntimeProbe::parse_task_stat("not a stat line").is_none());
    }

    #[test]
    fn test_state_tag_round_trip() {
        for state in [
            ThreadState::Running,
            ThreadState::Sleeping,
            ThreadState::DiskSleep,
            ThreadState::Blocked,
            ThreadState::Stopped,
            ThreadState::Zombie,
            ThreadState::Unknown,
        ] {
            assert_eq!(ThreadState::from_tag(state.tag()), Some(state));
        }
        assert_eq!(ThreadState::from_tag(200), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_host_thread_dump_sees_current_process() {
        let probe = HostRuntimeProbe::new();
        let threads = probe.thread_dump();
        assert!(!threads.is_empty());
        assert!(threads.iter().all(|t| t.waiting_on.is_none()));
    }

    #[test]
    fn test_managed_capabilities_unsupported() {
        let probe = HostRuntimeProbe::new();
        assert!(probe.loaded_class_count().is_none());
        assert!(probe.gc_time().is_none());
    }
}
