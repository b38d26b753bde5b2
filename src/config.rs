//! Dispatcher configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// `worker_threads` sentinel: spawn one worker per core, minus the main thread.
pub const WORKER_THREADS_AUTO: u8 = u8::MAX;

pub const DEFAULT_SMALL_POOL_SIZE: u16 = 128;
pub const DEFAULT_BIG_POOL_SIZE: u16 = 32;
pub const DEFAULT_SMALL_STACK_SIZE: usize = 64 * 1024;
pub const DEFAULT_BIG_STACK_SIZE: usize = 512 * 1024;
pub const DEFAULT_MAX_WAIT_DEPTH: usize = 32;
pub const DEFAULT_PUMP_STACK_SIZE: usize = 64 * 1024;

/// What dispatch does when the fiber pool cannot take every job of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AdmissionPolicy {
    /// Run the jobs that got a fiber, skip the rest with a warning. The batch
    /// counter only counts admitted jobs, so waiting on it cannot hang.
    #[default]
    SkipJob,
    /// Admit nothing and fail the dispatch.
    RejectBatch,
}

/// Configuration for the dispatcher.
///
/// Zero sizes mean "use the default".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Fibers in the small stack class. Default: 128.
    pub small_pool_size: u16,
    /// Stack size of small fibers in bytes. Default: 64KB.
    pub small_stack_size: usize,
    /// Fibers in the big stack class. Default: 32.
    pub big_pool_size: u16,
    /// Stack size of big fibers in bytes. Default: 512KB.
    pub big_stack_size: usize,
    /// Pin worker `i` to core `i + 1`, leaving core 0 to the main thread.
    pub pin_threads_to_cores: bool,
    /// Worker threads to spawn, or [`WORKER_THREADS_AUTO`].
    pub worker_threads: u8,
    /// Nested waits a single thread may have suspended at once. Default: 32.
    pub max_wait_depth: usize,
    /// Stack size of the pump loops run by nested waits. Default: 64KB.
    pub pump_stack_size: usize,
    /// Job counters available for outstanding batches. Default: both pool sizes.
    pub max_counters: u32,
    pub admission: AdmissionPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            small_pool_size: DEFAULT_SMALL_POOL_SIZE,
            small_stack_size: DEFAULT_SMALL_STACK_SIZE,
            big_pool_size: DEFAULT_BIG_POOL_SIZE,
            big_stack_size: DEFAULT_BIG_STACK_SIZE,
            pin_threads_to_cores: false,
            worker_threads: WORKER_THREADS_AUTO,
            max_wait_depth: DEFAULT_MAX_WAIT_DEPTH,
            pump_stack_size: DEFAULT_PUMP_STACK_SIZE,
            max_counters: 0,
            admission: AdmissionPolicy::SkipJob,
        }
    }
}

impl DispatcherConfig {
    /// Config with the given pool sizes and stack sizes in kilobytes.
    pub fn with_pools(
        small_pool_size: u16,
        small_stack_kb: usize,
        big_pool_size: u16,
        big_stack_kb: usize,
    ) -> Self {
        Self {
            small_pool_size,
            small_stack_size: small_stack_kb * 1024,
            big_pool_size,
            big_stack_size: big_stack_kb * 1024,
            ..Self::default()
        }
    }

    pub fn worker_threads(mut self, count: u8) -> Self {
        self.worker_threads = count;
        self
    }

    pub fn pin_threads_to_cores(mut self, pin: bool) -> Self {
        self.pin_threads_to_cores = pin;
        self
    }

    pub fn admission(mut self, policy: AdmissionPolicy) -> Self {
        self.admission = policy;
        self
    }

    pub fn max_wait_depth(mut self, depth: usize) -> Self {
        self.max_wait_depth = depth;
        self
    }

    /// Load configuration from a JSON string. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&content)?)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Copy with zero sizes replaced by defaults and the worker sentinel
    /// resolved against the machine's core count.
    pub(crate) fn resolved(&self) -> Self {
        fn or<T: PartialEq + Default>(value: T, default: T) -> T {
            if value == T::default() { default } else { value }
        }

        let small_pool_size = or(self.small_pool_size, DEFAULT_SMALL_POOL_SIZE);
        let big_pool_size = or(self.big_pool_size, DEFAULT_BIG_POOL_SIZE);
        let fiber_count = u32::from(small_pool_size) + u32::from(big_pool_size);
        Self {
            small_pool_size,
            small_stack_size: or(self.small_stack_size, DEFAULT_SMALL_STACK_SIZE),
            big_pool_size,
            big_stack_size: or(self.big_stack_size, DEFAULT_BIG_STACK_SIZE),
            pin_threads_to_cores: self.pin_threads_to_cores,
            worker_threads: self.resolved_worker_threads(),
            max_wait_depth: or(self.max_wait_depth, DEFAULT_MAX_WAIT_DEPTH),
            pump_stack_size: or(self.pump_stack_size, DEFAULT_PUMP_STACK_SIZE),
            max_counters: or(self.max_counters, fiber_count),
            admission: self.admission,
        }
    }

    fn resolved_worker_threads(&self) -> u8 {
        if self.worker_threads != WORKER_THREADS_AUTO {
            return self.worker_threads;
        }
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        cores.saturating_sub(1).min(usize::from(u8::MAX - 1)) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DispatcherConfig::default();
        assert_eq!(config.small_pool_size, 128);
        assert_eq!(config.small_stack_size, 64 * 1024);
        assert_eq!(config.big_pool_size, 32);
        assert_eq!(config.big_stack_size, 512 * 1024);
        assert_eq!(config.worker_threads, WORKER_THREADS_AUTO);
        assert_eq!(config.admission, AdmissionPolicy::SkipJob);
    }

    #[test]
    fn test_zero_sizes_fall_back_to_defaults() {
        let config = DispatcherConfig::with_pools(0, 0, 0, 0).worker_threads(2).resolved();
        assert_eq!(config.small_pool_size, DEFAULT_SMALL_POOL_SIZE);
        assert_eq!(config.small_stack_size, DEFAULT_SMALL_STACK_SIZE);
        assert_eq!(config.big_pool_size, DEFAULT_BIG_POOL_SIZE);
        assert_eq!(config.big_stack_size, DEFAULT_BIG_STACK_SIZE);
        assert_eq!(config.max_counters, 128 + 32);
        assert_eq!(config.worker_threads, 2);
    }

    #[test]
    fn test_auto_workers_leave_a_core_for_main() {
        let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let resolved = DispatcherConfig::default().resolved();
        assert_eq!(usize::from(resolved.worker_threads), cores.saturating_sub(1).min(254));
    }

    #[test]
    fn test_json_round_trip_with_partial_input() {
        let config = DispatcherConfig::from_json(
            r#"{ "small_pool_size": 16, "worker_threads": 3, "admission": "RejectBatch" }"#,
        )
        .unwrap();
        assert_eq!(config.small_pool_size, 16);
        assert_eq!(config.worker_threads, 3);
        assert_eq!(config.admission, AdmissionPolicy::RejectBatch);
        assert_eq!(config.big_pool_size, DEFAULT_BIG_POOL_SIZE);

        let json = config.to_json().unwrap();
        assert_eq!(DispatcherConfig::from_json(&json).unwrap(), config);
    }
}
