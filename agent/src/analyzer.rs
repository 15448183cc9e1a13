//! Problem analyzer
//!
//! Runs every configured health check against current host/runtime
//! state and returns one [`ProblemReport`] per check — problem and
//! non-problem alike, in a fixed order, so successive result
//! sequences compare cleanly in the problem history. A check that
//! cannot obtain data degrades to a non-problem report; a check that
//! fails outright is logged and replaced by a placeholder, and the
//! remaining checks still run.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use sysinfo::Disks;
use tracing::warn;

use crate::config::ThresholdConfig;
use crate::deadlock::find_deadlocked;
use crate::error::{AnalysisError, AnalysisResult};
use crate::memory::MemoryInfoProvider;
use crate::probe::RuntimeProbe;
use crate::report::ProblemReport;

/// Delta tracker for the GC CPU percentage.
///
/// Same baseline rules as the CPU trackers: the first reading returns
/// 0 and establishes the baseline, later readings return the GC-time
/// delta over the wall-clock delta. Must only be driven by the single
/// loop that owns it.
#[derive(Debug, Default)]
pub struct GcUsageTracker {
    baseline: Option<(Duration, Instant)>,
}

impl GcUsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// GC CPU percentage since the previous reading, in [0, 100], or
    /// -1 when the runtime reports no GC time
    pub fn current_usage(&mut self, probe: &dyn RuntimeProbe) -> i32 {
        let gc = match probe.gc_time() {
            Some(gc) => gc,
            None => return -1,
        };
        let now = Instant::now();
        let usage = match self.baseline {
            Some((earlier_gc, earlier_at)) => {
                let wall = now.duration_since(earlier_at).as_nanos();
                if wall == 0 {
                    0
                } else {
                    (gc.saturating_sub(earlier_gc).as_nanos() * 100 / wall).min(100) as i32
                }
            }
            None => 0,
        };
        self.baseline = Some((gc, now));
        usage
    }
}

/// Evaluates all health checks against current state
pub struct ProblemAnalyzer {
    thresholds: ThresholdConfig,
    gc_tracker: Mutex<GcUsageTracker>,
    disks: Mutex<Disks>,
}

impl ProblemAnalyzer {
    pub fn new(thresholds: ThresholdConfig) -> Self {
        Self {
            thresholds,
            gc_tracker: Mutex::new(GcUsageTracker::new()),
            disks: Mutex::new(Disks::new()),
        }
    }

    /// Run every check, in the fixed order deadlock, physical memory,
    /// swap, disk, GC overhead.
    pub fn analyze(
        &self,
        probe: &dyn RuntimeProbe,
        memory: &dyn MemoryInfoProvider,
    ) -> Vec<ProblemReport> {
        vec![
            self.run_check("Deadlock", self.check_deadlock(probe)),
            self.run_check("Low physical memory", self.check_physical_memory(memory)),
            self.run_check("Low swap space", self.check_swap(memory)),
            self.run_check("Low disk space", self.check_disk()),
            self.run_check("GC overhead", self.check_gc_overhead(probe)),
        ]
    }

    /// A failed check never suppresses the others: log it and emit a
    /// stable non-problem placeholder.
    fn run_check(&self, label: &str, result: AnalysisResult<ProblemReport>) -> ProblemReport {
        match result {
            Ok(report) => report,
            Err(e) => {
                warn!("health check '{}' failed: {}", label, e);
                ProblemReport::ok(label, "check unavailable")
            }
        }
    }

    fn check_deadlock(&self, probe: &dyn RuntimeProbe) -> AnalysisResult<ProblemReport> {
        let threads = probe.thread_dump();
        let deadlocked = find_deadlocked(&threads);
        if deadlocked.is_empty() {
            return Ok(ProblemReport::ok("Deadlock", ""));
        }

        let mut names = Vec::with_capacity(deadlocked.len());
        let mut detail = String::new();
        for thread in threads.iter().filter(|t| deadlocked.contains(&t.id)) {
            names.push(thread.name.clone());
            detail.push_str(&format!("{} (id {}):\n", thread.name, thread.id));
            for frame in &thread.stack_trace {
                detail.push_str("    ");
                detail.push_str(frame);
                detail.push('\n');
            }
        }
        Ok(ProblemReport::problem(
            format!("Deadlock involving {}", names.join(", ")),
            &detail,
        ))
    }

    fn check_physical_memory(
        &self,
        memory: &dyn MemoryInfoProvider,
    ) -> AnalysisResult<ProblemReport> {
        Ok(Self::memory_report(
            "Low physical memory",
            memory.physical_memory().and_then(|m| m.used_percent()),
            self.thresholds.memory_used_percent,
        ))
    }

    fn check_swap(&self, memory: &dyn MemoryInfoProvider) -> AnalysisResult<ProblemReport> {
        Ok(Self::memory_report(
            "Low swap space",
            memory.swap().and_then(|m| m.used_percent()),
            self.thresholds.swap_used_percent,
        ))
    }

    fn memory_report(label: &str, used_percent: Option<u8>, threshold: u8) -> ProblemReport {
        match used_percent {
            Some(percent) if percent > threshold => ProblemReport::problem(
                label,
                &format!("{}% used, threshold {}%", percent, threshold),
            ),
            // unsupported category degrades to a non-problem
            _ => ProblemReport::ok(label, ""),
        }
    }

    fn check_disk(&self) -> AnalysisResult<ProblemReport> {
        if self.thresholds.disk_paths.is_empty() {
            return Ok(ProblemReport::ok("Low disk space", ""));
        }

        let mut disks = self.disks.lock().map_err(|_| AnalysisError::CheckFailed {
            check: "Low disk space".to_string(),
            reason: "disk state poisoned".to_string(),
        })?;
        disks.refresh_list();
        disks.refresh();

        let minimum = self.thresholds.min_free_disk_bytes();
        let mut offending = Vec::new();
        for path in &self.thresholds.disk_paths {
            // longest mount-point match wins
            let disk = disks
                .list()
                .iter()
                .filter(|d| path.starts_with(d.mount_point()))
                .max_by_key(|d| d.mount_point().as_os_str().len());
            if let Some(disk) = disk {
                if disk.available_space() < minimum {
                    offending.push(format!(
                        "{}: {} MB free",
                        path.display(),
                        disk.available_space() / (1024 * 1024)
                    ));
                }
            }
        }

        if offending.is_empty() {
            Ok(ProblemReport::ok("Low disk space", ""))
        } else {
            Ok(ProblemReport::problem(
                "Low disk space",
                &format!(
                    "free space below {} MB: {}",
                    self.thresholds.min_free_disk_mb,
                    offending.join(", ")
                ),
            ))
        }
    }

    fn check_gc_overhead(&self, probe: &dyn RuntimeProbe) -> AnalysisResult<ProblemReport> {
        let mut tracker = self.gc_tracker.lock().map_err(|_| AnalysisError::CheckFailed {
            check: "GC overhead".to_string(),
            reason: "tracker state poisoned".to_string(),
        })?;
        let usage = tracker.current_usage(probe);
        if usage > self.thresholds.gc_cpu_percent as i32 {
            Ok(ProblemReport::problem(
                "GC overhead",
                &format!(
                    "{}% of CPU time spent collecting, threshold {}%",
                    usage, self.thresholds.gc_cpu_percent
                ),
            ))
        } else {
            // -1 (unsupported) lands here too
            Ok(ProblemReport::ok("GC overhead", ""))
        }
    }
}
