//! Dual-cadence sampling engine
//!
//! [`HistorySampler`] owns two bounded history rings and, while
//! running, two independent periodic tasks: a fine-grained history
//! loop assembling one [`HistorySample`] per tick, and a
//! coarse-grained problem loop running the analyzer and retaining
//! result sequences with change-coalescing. Each loop is strictly
//! single-worker across its own ticks; the two loops interleave
//! freely. `stop()` cancels both tasks and joins them, so everything
//! the final ticks wrote is visible to reads made after it returns.

use std::sync::{Arc, RwLock};

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::analyzer::{GcUsageTracker, ProblemAnalyzer};
use crate::config::CadenceConfig;
use crate::cpu::{CpuUsageTracker, HostCpuSource, ProcessCpuSource};
use crate::error::Result;
use crate::memory::MemoryInfoProvider;
use crate::probe::RuntimeProbe;
use crate::report::{any_problem, reports_equal, ProblemReport};
use crate::ring::HistoryRing;
use crate::sample::HistorySample;

/// Coalescing decision for one problem tick: whether to append, and
/// the next unchanged-tick counter value.
///
/// An unchanged result is normally swallowed, but once the counter
/// reaches `max_discontinuity` a heartbeat append is forced so a
/// long-lived steady state still refreshes periodically.
pub fn coalesce(changed: bool, unchanged_ticks: u64, max_discontinuity: u64) -> (bool, u64) {
    if changed {
        return (true, 0);
    }
    let unchanged_ticks = unchanged_ticks + 1;
    if unchanged_ticks >= max_discontinuity {
        (true, 0)
    } else {
        (false, unchanged_ticks)
    }
}

/// The scheduling core: two periodic loops feeding two bounded rings
pub struct HistorySampler {
    history: Arc<RwLock<HistoryRing<HistorySample>>>,
    problems: Arc<RwLock<HistoryRing<Vec<ProblemReport>>>>,
    cancel: Option<CancellationToken>,
    tasks: Vec<JoinHandle<()>>,
}

impl HistorySampler {
    pub fn new() -> Self {
        Self {
            history: Arc::new(RwLock::new(HistoryRing::new(1))),
            problems: Arc::new(RwLock::new(HistoryRing::new(1))),
            cancel: None,
            tasks: Vec::new(),
        }
    }

    /// Allocate fresh rings and launch both periodic loops.
    /// A no-op when already running.
    pub async fn start(
        &mut self,
        history_cfg: CadenceConfig,
        problem_cfg: CadenceConfig,
        probe: Arc<dyn RuntimeProbe>,
        memory: Arc<dyn MemoryInfoProvider>,
        analyzer: Arc<ProblemAnalyzer>,
    ) -> Result<()> {
        if self.cancel.is_some() {
            debug!("sampler already running, start ignored");
            return Ok(());
        }
        history_cfg.validate("history")?;
        problem_cfg.validate("problems")?;

        if let Ok(mut ring) = self.history.write() {
            *ring = HistoryRing::new(history_cfg.max_samples);
        }
        if let Ok(mut ring) = self.problems.write() {
            *ring = HistoryRing::new(problem_cfg.max_samples);
        }

        let cancel = CancellationToken::new();

        self.tasks.push(tokio::spawn(history_loop(
            history_cfg.clone(),
            self.history.clone(),
            probe.clone(),
            memory.clone(),
            cancel.clone(),
        )));
        self.tasks.push(tokio::spawn(problem_loop(
            problem_cfg.clone(),
            self.problems.clone(),
            probe,
            memory,
            analyzer,
            cancel.clone(),
        )));

        self.cancel = Some(cancel);
        info!(
            history_interval_ms = history_cfg.interval_ms,
            problem_interval_ms = problem_cfg.interval_ms,
            "sampler started"
        );
        Ok(())
    }

    /// Cancel both loops and block until any in-flight tick has fully
    /// completed. A no-op when already stopped. Ring contents remain
    /// readable afterwards; the next `start()` discards them.
    pub async fn stop(&mut self) {
        let cancel = match self.cancel.take() {
            Some(cancel) => cancel,
            None => return,
        };
        cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!("sampling task did not shut down cleanly: {}", e);
            }
        }
        info!("sampler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.cancel.is_some()
    }

    /// Snapshot of the history ring, most-recent-last
    pub fn history(&self) -> Vec<HistorySample> {
        self.history
            .read()
            .map(|ring| ring.snapshot())
            .unwrap_or_default()
    }

    /// Snapshot of the problem-history ring, most-recent-last. Empty
    /// while no problem snapshot has been recorded yet.
    pub fn problem_history(&self) -> Vec<Vec<ProblemReport>> {
        self.problems
            .read()
            .map(|ring| ring.snapshot())
            .unwrap_or_default()
    }
}

impl Default for HistorySampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Fine-grained loop: one [`HistorySample`] per tick.
///
/// The CPU and GC trackers live inside the task, so their baseline
/// cells are only ever touched by this single loop.
async fn history_loop(
    cfg: CadenceConfig,
    ring: Arc<RwLock<HistoryRing<HistorySample>>>,
    probe: Arc<dyn RuntimeProbe>,
    memory: Arc<dyn MemoryInfoProvider>,
    cancel: CancellationToken,
) {
    let mut host_cpu = CpuUsageTracker::new(HostCpuSource::new());
    let mut process_cpu = CpuUsageTracker::new(ProcessCpuSource::new());
    let mut gc = GcUsageTracker::new();

    let mut ticker = interval(cfg.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let mut pools = probe.memory_pools();
                if pools.is_empty() {
                    // no runtime pools exposed; fall back to the host
                    // physical/swap picture
                    pools.extend(memory.physical_memory());
                    pools.extend(memory.swap());
                }
                let sample = HistorySample::builder()
                    .cpu_usage(host_cpu.current_usage())
                    .cpu_process_usage(process_cpu.current_usage())
                    .gc_cpu_usage(gc.current_usage(&*probe))
                    .classes_loaded(probe.loaded_class_count().unwrap_or(0))
                    .pools(pools)
                    .threads(probe.thread_dump())
                    .build();
                match ring.write() {
                    Ok(mut ring) => ring.push(sample),
                    Err(e) => error!("history ring unavailable: {}", e),
                }
            }
        }
    }
    debug!("history loop exited");
}

/// Coarse-grained loop: analyze, compare against the last appended
/// entry, append on change or heartbeat.
async fn problem_loop(
    cfg: CadenceConfig,
    ring: Arc<RwLock<HistoryRing<Vec<ProblemReport>>>>,
    probe: Arc<dyn RuntimeProbe>,
    memory: Arc<dyn MemoryInfoProvider>,
    analyzer: Arc<ProblemAnalyzer>,
    cancel: CancellationToken,
) {
    let mut unchanged_ticks: u64 = 0;

    let mut ticker = interval(cfg.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let reports = analyzer.analyze(&*probe, &*memory);
                match ring.write() {
                    Ok(mut ring) => {
                        let changed = ring
                            .last()
                            .map_or(true, |last| !reports_equal(last, &reports));
                        let (append, next_counter) =
                            coalesce(changed, unchanged_ticks, cfg.max_discontinuity);
                        unchanged_ticks = next_counter;
                        if append {
                            if changed && any_problem(&reports) {
                                info!(
                                    problems = reports.iter().filter(|r| r.problem).count(),
                                    "problem state changed"
                                );
                            }
                            ring.push(reports);
                        }
                    }
                    Err(e) => error!("problem ring unavailable: {}", e),
                }
            }
        }
    }
    debug!("problem loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThresholdConfig;
    use crate::memory::MemoryUsage;
    use crate::probe::{ThreadInfo, ThreadState};
    use crate::sample::PoolUsage;
    use std::time::Duration;

    #[test]
    fn test_coalesce_change_always_appends() {
        assert_eq!(coalesce(true, 0, 10), (true, 0));
        assert_eq!(coalesce(true, 9, 10), (true, 0));
    }

    #[test]
    fn test_coalesce_swallows_unchanged_below_threshold() {
        assert_eq!(coalesce(false, 0, 3), (false, 1));
        assert_eq!(coalesce(false, 1, 3), (false, 2));
    }

    #[test]
    fn test_coalesce_heartbeat_at_threshold() {
        assert_eq!(coalesce(false, 2, 3), (true, 0));
    }

    #[test]
    fn test_coalesce_retention_counts() {
        // max_discontinuity unchanged ticks after the first append
        // leave exactly one entry; one more forces the heartbeat
        let max_discontinuity = 4;
        for total_ticks in 1..=max_discontinuity {
            let mut counter = 0;
            let mut appended = 1; // tick 1 appends into an empty ring
            for _ in 1..total_ticks {
                let (append, next) = coalesce(false, counter, max_discontinuity);
                counter = next;
                if append {
                    appended += 1;
                }
            }
            assert_eq!(appended, 1, "{} unchanged ticks", total_ticks);
        }

        let mut counter = 0;
        let mut appended = 1;
        for _ in 1..=max_discontinuity {
            let (append, next) = coalesce(false, counter, max_discontinuity);
            counter = next;
            if append {
                appended += 1;
            }
        }
        assert_eq!(appended, 2);
    }

    struct QuietProbe;

    impl RuntimeProbe for QuietProbe {
        fn loaded_class_count(&self) -> Option<u64> {
            Some(42)
        }
        fn gc_time(&self) -> Option<Duration> {
            None
        }
        fn memory_pools(&self) -> Vec<PoolUsage> {
            vec![PoolUsage { init: -1, used: 1, committed: 2, max: 4 }]
        }
        fn thread_dump(&self) -> Vec<ThreadInfo> {
            vec![ThreadInfo::new(1, "main", ThreadState::Running)]
        }
    }

    struct NoMemory;

    impl MemoryInfoProvider for NoMemory {
        fn physical_memory(&self) -> Option<MemoryUsage> {
            None
        }
        fn swap(&self) -> Option<MemoryUsage> {
            None
        }
    }

    fn fast_cadence(interval_ms: u64, max_samples: usize) -> CadenceConfig {
        CadenceConfig {
            interval_ms,
            max_samples,
            max_discontinuity: 1000,
        }
    }

    async fn started_sampler() -> HistorySampler {
        let mut sampler = HistorySampler::new();
        sampler
            .start(
                fast_cadence(10, 50),
                fast_cadence(10, 10),
                Arc::new(QuietProbe),
                Arc::new(NoMemory),
                Arc::new(ProblemAnalyzer::new(ThresholdConfig {
                    disk_paths: vec![],
                    ..ThresholdConfig::default()
                })),
            )
            .await
            .unwrap();
        sampler
    }

    #[tokio::test]
    async fn test_lifecycle_idempotence() {
        let mut sampler = HistorySampler::new();
        assert!(!sampler.is_running());
        sampler.stop().await; // stop before start is a no-op

        let mut sampler = started_sampler().await;
        assert!(sampler.is_running());

        // second start is ignored
        sampler
            .start(
                fast_cadence(10, 50),
                fast_cadence(10, 10),
                Arc::new(QuietProbe),
                Arc::new(NoMemory),
                Arc::new(ProblemAnalyzer::new(ThresholdConfig::default())),
            )
            .await
            .unwrap();

        sampler.stop().await;
        assert!(!sampler.is_running());
        sampler.stop().await;
        assert!(!sampler.is_running());
    }

    #[tokio::test]
    async fn test_history_accumulates_and_survives_stop() {
        let mut sampler = started_sampler().await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        sampler.stop().await;

        let history = sampler.history();
        assert!(history.len() >= 2, "only {} samples", history.len());
        let sample = &history[0];
        assert_eq!(sample.classes_loaded, 42);
        assert_eq!(sample.pools.len(), 1);
        assert_eq!(sample.threads[0].name, "main");

        // contents remain readable after stop
        assert_eq!(sampler.history().len(), history.len());
    }

    #[tokio::test]
    async fn test_unchanging_problems_coalesce_to_one_entry() {
        let mut sampler = started_sampler().await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        sampler.stop().await;

        let problems = sampler.problem_history();
        assert_eq!(problems.len(), 1, "steady state must coalesce");
        assert_eq!(problems[0].len(), 5);
        assert!(!any_problem(&problems[0]));
    }

    #[tokio::test]
    async fn test_restart_discards_old_rings() {
        let mut sampler = started_sampler().await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        sampler.stop().await;
        assert!(!sampler.history().is_empty());

        let mut sampler2 = HistorySampler::new();
        assert!(sampler2.history().is_empty());
        drop(sampler2);

        // restarting the same instance begins from empty rings
        sampler
            .start(
                fast_cadence(500, 5),
                fast_cadence(500, 5),
                Arc::new(QuietProbe),
                Arc::new(NoMemory),
                Arc::new(ProblemAnalyzer::new(ThresholdConfig::default())),
            )
            .await
            .unwrap();
        // the first ticks may or may not have fired yet, but capacity
        // and contents were reset
        assert!(sampler.history().len() <= 1);
        sampler.stop().await;
    }
}
