//! CPU usage measurement strategies
//!
//! Usage percentages are computed as deltas between two successive
//! opaque snapshots of cumulative counters. Two strategies are
//! provided: host-wide usage from the aggregate `cpu` line of
//! `/proc/stat`, and process-owned usage from the per-process CPU-time
//! clock. [`CpuUsageTracker`] owns the baseline snapshot cell and
//! implements the first-call-returns-zero rule.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use tracing::debug;

use crate::error::{MeasureError, MeasureResult};

/// A strategy computing a 0-100% CPU usage figure from two successive
/// snapshots of a cumulative counter source.
pub trait CpuUsageSource {
    /// Opaque point-in-time measurement
    type Snapshot;

    /// Whether the underlying counter source exists on this host
    fn supported(&self) -> bool;

    /// Take one measurement. Fails if the source is transiently
    /// unreadable; the caller keeps its previous snapshot in that case.
    fn measure(&self) -> MeasureResult<Self::Snapshot>;

    /// Usage over the window between `earlier` and `later`, clamped
    /// to [0, 100]. `earlier` must have been taken strictly before
    /// `later`.
    fn usage_between(&self, earlier: &Self::Snapshot, later: &Self::Snapshot) -> i32;
}

/// Cumulative host CPU tick counters, in jiffies since boot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostCpuTicks {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
}

impl HostCpuTicks {
    fn total(&self) -> u64 {
        self.user + self.nice + self.system + self.idle
    }
}

/// Host-wide CPU usage from the aggregate `cpu` line of `/proc/stat`
pub struct HostCpuSource {
    stat_path: PathBuf,
}

impl HostCpuSource {
    pub fn new() -> Self {
        Self {
            stat_path: PathBuf::from("/proc/stat"),
        }
    }

    /// Use an alternative counter file (test hook)
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            stat_path: path.into(),
        }
    }

    /// Parse the aggregate `cpu` line of a `/proc/stat`-format blob
    fn parse(content: &str) -> MeasureResult<HostCpuTicks> {
        let line = content
            .lines()
            .find(|l| l.starts_with("cpu ") || l.starts_with("cpu\t"))
            .ok_or_else(|| MeasureError::ParseFailed {
                reason: "no aggregate cpu line".to_string(),
            })?;

        let mut fields = line.split_whitespace().skip(1);
        let mut next = |name: &str| -> MeasureResult<u64> {
            fields
                .next()
                .ok_or_else(|| MeasureError::ParseFailed {
                    reason: format!("missing {} field", name),
                })?
                .parse::<u64>()
                .map_err(|e| MeasureError::ParseFailed {
                    reason: format!("bad {} field: {}", name, e),
                })
        };

        Ok(HostCpuTicks {
            user: next("user")?,
            nice: next("nice")?,
            system: next("system")?,
            idle: next("idle")?,
        })
    }
}

impl Default for HostCpuSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuUsageSource for HostCpuSource {
    type Snapshot = HostCpuTicks;

    fn supported(&self) -> bool {
        self.stat_path.exists()
    }

    fn measure(&self) -> MeasureResult<HostCpuTicks> {
        if !self.supported() {
            return Err(MeasureError::Unsupported);
        }
        let content = fs::read_to_string(&self.stat_path).map_err(|e| MeasureError::ReadFailed {
            reason: e.to_string(),
        })?;
        Self::parse(&content)
    }

    fn usage_between(&self, earlier: &HostCpuTicks, later: &HostCpuTicks) -> i32 {
        let total_delta = later.total().saturating_sub(earlier.total());
        if total_delta == 0 {
            return 0;
        }
        let idle_delta = later.idle.saturating_sub(earlier.idle);
        let usage = 100i64 - (idle_delta as i64 * 100 / total_delta as i64);
        usage.clamp(0, 100) as i32
    }
}

/// Process CPU time paired with wall-clock nanotime
#[derive(Debug, Clone, Copy)]
pub struct ProcessCpuTimes {
    /// Cumulative process CPU nanoseconds, normalized by the number of
    /// available processors
    pub cpu_nanos: u64,
    /// Monotonic wall-clock reference
    pub taken_at: Instant,
}

/// Process-owned CPU usage from `CLOCK_PROCESS_CPUTIME_ID`
pub struct ProcessCpuSource {
    supported: bool,
    cpus: u64,
}

impl ProcessCpuSource {
    /// Probe the host once at construction; no re-probing per tick
    pub fn new() -> Self {
        let supported = process_cpu_nanos().is_ok();
        if !supported {
            debug!("process CPU-time clock unavailable on this host");
        }
        Self {
            supported,
            cpus: num_cpus::get().max(1) as u64,
        }
    }
}

impl Default for ProcessCpuSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuUsageSource for ProcessCpuSource {
    type Snapshot = ProcessCpuTimes;

    fn supported(&self) -> bool {
        self.supported
    }

    fn measure(&self) -> MeasureResult<ProcessCpuTimes> {
        if !self.supported {
            return Err(MeasureError::Unsupported);
        }
        Ok(ProcessCpuTimes {
            cpu_nanos: process_cpu_nanos()? / self.cpus,
            taken_at: Instant::now(),
        })
    }

    fn usage_between(&self, earlier: &ProcessCpuTimes, later: &ProcessCpuTimes) -> i32 {
        let wall_delta = later.taken_at.duration_since(earlier.taken_at).as_nanos();
        if wall_delta == 0 {
            return 0;
        }
        let cpu_delta = later.cpu_nanos.saturating_sub(earlier.cpu_nanos) as u128;
        let usage = cpu_delta * 100 / wall_delta;
        usage.min(100) as i32
    }
}

#[cfg(unix)]
fn process_cpu_nanos() -> MeasureResult<u64> {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_PROCESS_CPUTIME_ID, &mut ts) };
    if rc != 0 {
        return Err(MeasureError::Unsupported);
    }
    Ok(ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64)
}

#[cfg(not(unix))]
fn process_cpu_nanos() -> MeasureResult<u64> {
    Err(MeasureError::Unsupported)
}

/// Wraps one measurement strategy and its private baseline cell.
///
/// The first successful call after construction returns exactly 0 and
/// establishes the baseline; every later call returns the delta
/// against the stored snapshot and replaces it. A failed measurement
/// returns -1 and leaves the baseline untouched, so the next tick
/// deltas against the last good snapshot. The cell must only ever be
/// mutated by the single loop that owns this tracker.
pub struct CpuUsageTracker<S: CpuUsageSource> {
    source: S,
    baseline: Option<S::Snapshot>,
}

impl<S: CpuUsageSource> CpuUsageTracker<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            baseline: None,
        }
    }

    /// Current usage in [0, 100], or -1 when unsupported or this
    /// tick's measurement failed.
    pub fn current_usage(&mut self) -> i32 {
        if !self.source.supported() {
            return -1;
        }
        match self.source.measure() {
            Ok(current) => {
                let usage = match &self.baseline {
                    Some(earlier) => self.source.usage_between(earlier, &current),
                    None => 0,
                };
                self.baseline = Some(current);
                usage
            }
            Err(MeasureError::Unsupported) => -1,
            Err(e) => {
                debug!("CPU measurement failed this tick: {}", e);
                -1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    #[test]
    fn test_parse_proc_stat_line() {
        let content = "cpu  4705 150 1120 16250 520 29 35 0 0 0\ncpu0 100 2 20 400 5 1 1 0 0 0\n";
        let ticks = HostCpuSource::parse(content).unwrap();
        assert_eq!(ticks.user, 4705);
        assert_eq!(ticks.nice, 150);
        assert_eq!(ticks.system, 1120);
        assert_eq!(ticks.idle, 16250);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(HostCpuSource::parse("intr 5 4 3").is_err());
        assert!(HostCpuSource::parse("cpu a b c d").is_err());
    }

    #[test]
    fn test_host_usage_between() {
        let source = HostCpuSource::new();
        let a = HostCpuTicks { user: 100, nice: 0, system: 50, idle: 850 };
        // +100 busy jiffies, +100 idle jiffies => 50%
        let b = HostCpuTicks { user: 180, nice: 0, system: 70, idle: 950 };
        assert_eq!(source.usage_between(&a, &b), 50);
        // no time elapsed
        assert_eq!(source.usage_between(&a, &a), 0);
        // fully idle window
        let c = HostCpuTicks { user: 100, nice: 0, system: 50, idle: 1000 };
        assert_eq!(source.usage_between(&a, &c), 0);
        // fully busy window
        let d = HostCpuTicks { user: 250, nice: 0, system: 50, idle: 850 };
        assert_eq!(source.usage_between(&a, &d), 100);
    }

    #[test]
    fn test_unsupported_host_source() {
        let source = HostCpuSource::with_path("/nonexistent/stat");
        assert!(!source.supported());
        assert!(matches!(source.measure(), Err(MeasureError::Unsupported)));

        let mut tracker = CpuUsageTracker::new(source);
        assert_eq!(tracker.current_usage(), -1);
        assert_eq!(tracker.current_usage(), -1);
    }

    /// Test source replaying a script of measurements
    struct ScriptedSource {
        script: RefCell<VecDeque<MeasureResult<u64>>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<MeasureResult<u64>>) -> Self {
            Self {
                script: RefCell::new(script.into()),
            }
        }
    }

    impl CpuUsageSource for ScriptedSource {
        type Snapshot = u64;

        fn supported(&self) -> bool {
            true
        }

        fn measure(&self) -> MeasureResult<u64> {
            self.script
                .borrow_mut()
                .pop_front()
                .unwrap_or(Err(MeasureError::Unsupported))
        }

        fn usage_between(&self, earlier: &u64, later: &u64) -> i32 {
            (later.saturating_sub(*earlier)).min(100) as i32
        }
    }

    #[test]
    fn test_first_call_returns_zero() {
        let mut tracker = CpuUsageTracker::new(ScriptedSource::new(vec![Ok(500), Ok(530)]));
        assert_eq!(tracker.current_usage(), 0);
        assert_eq!(tracker.current_usage(), 30);
    }

    #[test]
    fn test_failed_measure_keeps_baseline() {
        let mut tracker = CpuUsageTracker::new(ScriptedSource::new(vec![
            Ok(100),
            Err(MeasureError::ReadFailed { reason: "busy".to_string() }),
            Ok(140),
        ]));
        assert_eq!(tracker.current_usage(), 0);
        assert_eq!(tracker.current_usage(), -1);
        // delta is computed against the last good snapshot
        assert_eq!(tracker.current_usage(), 40);
    }

    #[test]
    fn test_failed_first_measure_leaves_no_baseline() {
        let mut tracker = CpuUsageTracker::new(ScriptedSource::new(vec![
            Err(MeasureError::ReadFailed { reason: "busy".to_string() }),
            Ok(900),
            Ok(910),
        ]));
        assert_eq!(tracker.current_usage(), -1);
        // the first successful measurement still establishes a baseline
        assert_eq!(tracker.current_usage(), 0);
        assert_eq!(tracker.current_usage(), 10);
    }

    proptest! {
        #[test]
        fn prop_host_usage_in_range(
            user_a in 0u64..1_000_000, nice_a in 0u64..1_000_000,
            system_a in 0u64..1_000_000, idle_a in 0u64..1_000_000,
            du in 0u64..1_000_000, dn in 0u64..1_000_000,
            ds in 0u64..1_000_000, di in 0u64..1_000_000,
        ) {
            let source = HostCpuSource::new();
            let a = HostCpuTicks { user: user_a, nice: nice_a, system: system_a, idle: idle_a };
            let b = HostCpuTicks {
                user: user_a + du,
                nice: nice_a + dn,
                system: system_a + ds,
                idle: idle_a + di,
            };
            let usage = source.usage_between(&a, &b);
            prop_assert!((0..=100).contains(&usage));
        }

        #[test]
        fn prop_process_usage_in_range(cpu_a in 0u64..u64::MAX / 2, delta in 0u64..1_000_000_000) {
            let source = ProcessCpuSource::new();
            let base = Instant::now();
            let a = ProcessCpuTimes { cpu_nanos: cpu_a, taken_at: base };
            let b = ProcessCpuTimes {
                cpu_nanos: cpu_a + delta,
                taken_at: base + std::time::Duration::from_millis(100),
            };
            let usage = source.usage_between(&a, &b);
            prop_assert!((0..=100).contains(&usage));
        }
    }
}
