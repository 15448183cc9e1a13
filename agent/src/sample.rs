//! History sample model and wire codec
//!
//! A [`HistorySample`] is the immutable value produced by one history
//! tick: CPU/IO/GC usage percentages, loaded-class count, per-pool
//! memory usage and the thread dump. Samples are built incrementally
//! through [`HistorySampleBuilder`] and never mutated afterwards.
//!
//! The binary codec writes every field big-endian, length-prefixing
//! sequences and strings, so a sample can be shipped out of process
//! and reconstructed as an equal value.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::error::{CodecError, CodecResult};
use crate::memory::MemoryUsage;
use crate::probe::{ThreadInfo, ThreadState};

/// Per-memory-pool usage record: init/used/committed/max, any of
/// which may be -1 when unknown
pub type PoolUsage = MemoryUsage;

/// Sanity cap on decoded sequence lengths
const MAX_SEQ_LEN: u32 = 1 << 20;

/// Immutable snapshot of one sampling tick.
///
/// Percentage fields are -1 (unsupported/unmeasurable) or within
/// [0, 100]; `cpu_io_usage` is derived as `cpu_usage −
/// cpu_process_usage` clamped to ≥ 0 when both inputs are known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySample {
    pub cpu_usage: i32,
    pub cpu_process_usage: i32,
    pub cpu_io_usage: i32,
    pub gc_cpu_usage: i32,
    pub classes_loaded: u64,
    pub pools: Vec<PoolUsage>,
    pub threads: Vec<ThreadInfo>,
}

impl HistorySample {
    pub fn builder() -> HistorySampleBuilder {
        HistorySampleBuilder::default()
    }

    /// Write the field-by-field binary form
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_i32(self.cpu_usage);
        buf.put_i32(self.cpu_process_usage);
        buf.put_i32(self.cpu_io_usage);
        buf.put_i32(self.gc_cpu_usage);
        buf.put_u64(self.classes_loaded);

        buf.put_u32(self.pools.len() as u32);
        for pool in &self.pools {
            buf.put_i64(pool.init);
            buf.put_i64(pool.used);
            buf.put_i64(pool.committed);
            buf.put_i64(pool.max);
        }

        buf.put_u32(self.threads.len() as u32);
        for thread in &self.threads {
            buf.put_u64(thread.id);
            put_string(buf, &thread.name);
            buf.put_u8(thread.state.tag());
            buf.put_u32(thread.stack_trace.len() as u32);
            for frame in &thread.stack_trace {
                put_string(buf, frame);
            }
            match thread.waiting_on {
                Some(lock) => {
                    buf.put_u8(1);
                    buf.put_u64(lock);
                }
                None => buf.put_u8(0),
            }
            buf.put_u32(thread.locks_held.len() as u32);
            for lock in &thread.locks_held {
                buf.put_u64(*lock);
            }
        }
    }

    /// Encode into a freshly allocated buffer
    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }

    /// Reconstruct a sample from its binary form
    pub fn decode<B: Buf>(buf: &mut B) -> CodecResult<Self> {
        let cpu_usage = get_i32(buf)?;
        let cpu_process_usage = get_i32(buf)?;
        let cpu_io_usage = get_i32(buf)?;
        let gc_cpu_usage = get_i32(buf)?;
        let classes_loaded = get_u64(buf)?;

        let pool_count = get_len(buf, "pools")?;
        let mut pools = Vec::with_capacity(pool_count);
        for _ in 0..pool_count {
            pools.push(PoolUsage {
                init: get_i64(buf)?,
                used: get_i64(buf)?,
                committed: get_i64(buf)?,
                max: get_i64(buf)?,
            });
        }

        let thread_count = get_len(buf, "threads")?;
        let mut threads = Vec::with_capacity(thread_count);
        for _ in 0..thread_count {
            let id = get_u64(buf)?;
            let name = get_string(buf, "thread.name")?;
            let tag = get_u8(buf)?;
            let state = ThreadState::from_tag(tag).ok_or(CodecError::InvalidTag {
                field: "thread.state".to_string(),
                tag,
            })?;
            let frame_count = get_len(buf, "thread.stack_trace")?;
            let mut stack_trace = Vec::with_capacity(frame_count);
            for _ in 0..frame_count {
                stack_trace.push(get_string(buf, "thread.stack_trace")?);
            }
            let waiting_on = match get_u8(buf)? {
                0 => None,
                1 => Some(get_u64(buf)?),
                tag => {
                    return Err(CodecError::InvalidTag {
                        field: "thread.waiting_on".to_string(),
                        tag,
                    })
                }
            };
            let lock_count = get_len(buf, "thread.locks_held")?;
            let mut locks_held = Vec::with_capacity(lock_count);
            for _ in 0..lock_count {
                locks_held.push(get_u64(buf)?);
            }
            threads.push(ThreadInfo {
                id,
                name,
                state,
                stack_trace,
                waiting_on,
                locks_held,
            });
        }

        Ok(Self {
            cpu_usage,
            cpu_process_usage,
            cpu_io_usage,
            gc_cpu_usage,
            classes_loaded,
            pools,
            threads,
        })
    }

    /// Decode from a byte slice, rejecting trailing garbage
    pub fn decode_from_slice(mut bytes: &[u8]) -> CodecResult<Self> {
        let sample = Self::decode(&mut bytes)?;
        if !bytes.is_empty() {
            return Err(CodecError::LengthOverflow {
                field: "trailing bytes".to_string(),
                len: bytes.len() as u64,
            });
        }
        Ok(sample)
    }
}

/// Incremental builder for [`HistorySample`].
///
/// `build()` normalizes every percentage into [-1, 100] and derives
/// `cpu_io_usage`; unset fields default to unsupported/-1 and empty
/// sequences.
#[derive(Debug, Default)]
pub struct HistorySampleBuilder {
    cpu_usage: Option<i32>,
    cpu_process_usage: Option<i32>,
    gc_cpu_usage: Option<i32>,
    classes_loaded: u64,
    pools: Vec<PoolUsage>,
    threads: Vec<ThreadInfo>,
}

impl HistorySampleBuilder {
    pub fn cpu_usage(mut self, value: i32) -> Self {
        self.cpu_usage = Some(value);
        self
    }

    pub fn cpu_process_usage(mut self, value: i32) -> Self {
        self.cpu_process_usage = Some(value);
        self
    }

    pub fn gc_cpu_usage(mut self, value: i32) -> Self {
        self.gc_cpu_usage = Some(value);
        self
    }

    pub fn classes_loaded(mut self, value: u64) -> Self {
        self.classes_loaded = value;
        self
    }

    pub fn pools(mut self, pools: Vec<PoolUsage>) -> Self {
        self.pools = pools;
        self
    }

    pub fn threads(mut self, threads: Vec<ThreadInfo>) -> Self {
        self.threads = threads;
        self
    }

    pub fn build(self) -> HistorySample {
        let cpu_usage = normalize_percent(self.cpu_usage.unwrap_or(-1));
        let cpu_process_usage = normalize_percent(self.cpu_process_usage.unwrap_or(-1));
        let cpu_io_usage = if cpu_usage >= 0 && cpu_process_usage >= 0 {
            (cpu_usage - cpu_process_usage).max(0)
        } else {
            -1
        };
        HistorySample {
            cpu_usage,
            cpu_process_usage,
            cpu_io_usage,
            gc_cpu_usage: normalize_percent(self.gc_cpu_usage.unwrap_or(-1)),
            classes_loaded: self.classes_loaded,
            pools: self.pools,
            threads: self.threads,
        }
    }
}

/// Percentages are -1 (unknown) or within [0, 100]
fn normalize_percent(value: i32) -> i32 {
    if value < 0 {
        -1
    } else {
        value.min(100)
    }
}

fn put_string<B: BufMut>(buf: &mut B, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn need<B: Buf>(buf: &B, n: usize) -> CodecResult<()> {
    if buf.remaining() < n {
        return Err(CodecError::Truncated {
            needed: n - buf.remaining(),
        });
    }
    Ok(())
}

fn get_u8<B: Buf>(buf: &mut B) -> CodecResult<u8> {
    need(buf, 1)?;
    Ok(buf.get_u8())
}

fn get_i32<B: Buf>(buf: &mut B) -> CodecResult<i32> {
    need(buf, 4)?;
    Ok(buf.get_i32())
}

fn get_u32<B: Buf>(buf: &mut B) -> CodecResult<u32> {
    need(buf, 4)?;
    Ok(buf.get_u32())
}

fn get_i64<B: Buf>(buf: &mut B) -> CodecResult<i64> {
    need(buf, 8)?;
    Ok(buf.get_i64())
}

fn get_u64<B: Buf>(buf: &mut B) -> CodecResult<u64> {
    need(buf, 8)?;
    Ok(buf.get_u64())
}

fn get_len<B: Buf>(buf: &mut B, field: &str) -> CodecResult<usize> {
    let len = get_u32(buf)?;
    if len > MAX_SEQ_LEN {
        return Err(CodecError::LengthOverflow {
            field: field.to_string(),
            len: len as u64,
        });
    }
    Ok(len as usize)
}

fn get_string<B: Buf>(buf: &mut B, field: &str) -> CodecResult<String> {
    let len = get_len(buf, field)?;
    need(buf, len)?;
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    String::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8 {
        field: field.to_string(),
    })
}
