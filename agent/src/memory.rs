//! Physical and swap memory introspection
//!
//! Capability-queried providers returning the current memory picture,
//! or `None` when the host cannot supply one. Providers never fail:
//! any underlying error (missing capability, parse failure) degrades
//! to `None`. [`FallbackMemoryProvider`] chains providers with a
//! preference order — management interface first, then the
//! `/proc/meminfo` counter file.

use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::debug;

/// One memory category reading. Any field may be -1 when the host
/// does not report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub init: i64,
    pub used: i64,
    pub committed: i64,
    pub max: i64,
}

impl MemoryUsage {
    /// used/max percentage, when both are known and max is non-zero
    pub fn used_percent(&self) -> Option<u8> {
        if self.used < 0 || self.max <= 0 {
            return None;
        }
        Some((self.used * 100 / self.max).clamp(0, 100) as u8)
    }

    fn from_totals(used: u64, total: u64) -> Option<Self> {
        if total == 0 {
            return None;
        }
        Some(Self {
            init: -1,
            used: used as i64,
            committed: total as i64,
            max: total as i64,
        })
    }
}

/// Current physical/swap memory usage, `None` when unsupported
pub trait MemoryInfoProvider: Send + Sync {
    fn physical_memory(&self) -> Option<MemoryUsage>;
    fn swap(&self) -> Option<MemoryUsage>;
}

/// Management-interface provider backed by `sysinfo`
pub struct SysinfoMemoryProvider {
    system: Mutex<System>,
}

impl SysinfoMemoryProvider {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryInfoProvider for SysinfoMemoryProvider {
    fn physical_memory(&self) -> Option<MemoryUsage> {
        let mut sys = self.system.lock().ok()?;
        sys.refresh_memory();
        MemoryUsage::from_totals(sys.used_memory(), sys.total_memory())
    }

    fn swap(&self) -> Option<MemoryUsage> {
        let mut sys = self.system.lock().ok()?;
        sys.refresh_memory();
        MemoryUsage::from_totals(sys.used_swap(), sys.total_swap())
    }
}

/// Counter-file provider parsing `/proc/meminfo`
pub struct ProcMeminfoProvider {
    meminfo_path: PathBuf,
}

impl ProcMeminfoProvider {
    pub fn new() -> Self {
        Self {
            meminfo_path: PathBuf::from("/proc/meminfo"),
        }
    }

    /// Use an alternative counter file (test hook)
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            meminfo_path: path.into(),
        }
    }

    /// Value of one `Name: 12345 kB` line, in bytes
    fn field(content: &str, name: &str) -> Option<u64> {
        let line = content
            .lines()
            .find(|l| l.starts_with(name) && l[name.len()..].starts_with(':'))?;
        let kb = line[name.len() + 1..]
            .trim()
            .trim_end_matches("kB")
            .trim()
            .parse::<u64>()
            .ok()?;
        Some(kb * 1024)
    }

    fn read(&self) -> Option<String> {
        match fs::read_to_string(&self.meminfo_path) {
            Ok(content) => Some(content),
            Err(e) => {
                debug!("meminfo read failed: {}", e);
                None
            }
        }
    }
}

impl Default for ProcMeminfoProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryInfoProvider for ProcMeminfoProvider {
    fn physical_memory(&self) -> Option<MemoryUsage> {
        let content = self.read()?;
        let total = Self::field(&content, "MemTotal")?;
        let available = Self::field(&content, "MemAvailable")
            .or_else(|| Self::field(&content, "MemFree"))?;
        MemoryUsage::from_totals(total.saturating_sub(available), total)
    }

    fn swap(&self) -> Option<MemoryUsage> {
        let content = self.read()?;
        let total = Self::field(&content, "SwapTotal")?;
        let free = Self::field(&content, "SwapFree")?;
        MemoryUsage::from_totals(total.saturating_sub(free), total)
    }
}

/// Chains providers, returning the first valid reading
pub struct FallbackMemoryProvider {
    providers: Vec<Box<dyn MemoryInfoProvider>>,
}

impl FallbackMemoryProvider {
    pub fn new(providers: Vec<Box<dyn MemoryInfoProvider>>) -> Self {
        Self { providers }
    }

    /// Default host ordering: management interface, then counter file
    pub fn host_default() -> Self {
        Self::new(vec![
            Box::new(SysinfoMemoryProvider::new()),
            Box::new(ProcMeminfoProvider::new()),
        ])
    }
}

impl MemoryInfoProvider for FallbackMemoryProvider {
    fn physical_memory(&self) -> Option<MemoryUsage> {
        self.providers.iter().find_map(|p| p.physical_memory())
    }

    fn swap(&self) -> Option<MemoryUsage> {
        self.providers.iter().find_map(|p| p.swap())
    }
}
