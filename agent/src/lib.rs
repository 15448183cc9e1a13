//! Vigil telemetry agent core library
//!
//! This library provides the core functionality for the Vigil agent,
//! which samples host/process telemetry on a fine-grained cadence and
//! runs health checks (deadlock, low memory, low disk, GC overhead)
//! on a coarse-grained cadence, retaining both result streams in
//! bounded in-memory history rings.

pub mod config;
pub mod error;
pub mod cpu;
pub mod memory;
pub mod probe;
pub mod sample;
pub mod report;
pub mod deadlock;
pub mod analyzer;
pub mod ring;
pub mod sampler;

// Re-export commonly used types
pub use config::{AgentConfig, CadenceConfig, ThresholdConfig};
pub use error::{AgentError, MeasureError, Result};
pub use cpu::{CpuUsageSource, CpuUsageTracker, HostCpuSource, ProcessCpuSource};
pub use memory::{FallbackMemoryProvider, MemoryInfoProvider, MemoryUsage, SysinfoMemoryProvider};
pub use probe::{HostRuntimeProbe, RuntimeProbe, ThreadInfo, ThreadState};
pub use sample::{HistorySample, HistorySampleBuilder, PoolUsage};
pub use report::{any_problem, reports_equal, ProblemReport};
pub use analyzer::ProblemAnalyzer;
pub use sampler::HistorySampler;
