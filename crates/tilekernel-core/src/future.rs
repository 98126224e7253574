//! Completion sink for asynchronously executed kernels.

use std::fmt;

use crate::error::Result;

/// Device-side timing of a completed launch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallStats {
    /// Start timestamp in microseconds.
    pub start_micros: u64,
    /// End timestamp in microseconds.
    pub end_micros: u64,
}

impl CallStats {
    /// Elapsed device time in microseconds.
    pub fn elapsed_micros(&self) -> u64 {
        self.end_micros.saturating_sub(self.start_micros)
    }
}

/// Event handle for an enqueued launch.
pub trait DeviceEvent: Send + Sync {
    /// Blocks until the launch completes and returns its timing.
    fn wait(&self) -> Result<CallStats>;
}

type WaitFn = Box<dyn FnOnce() -> Result<CallStats> + Send>;

/// Caller-owned handle armed by the executor with a wait function.
///
/// An unarmed future completes immediately with default stats.
#[derive(Default)]
pub struct StatsFuture {
    wait_fn: Option<WaitFn>,
}

impl StatsFuture {
    /// Creates an unarmed future.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the future with `wait_fn`, replacing any previous one.
    pub fn arm(&mut self, wait_fn: impl FnOnce() -> Result<CallStats> + Send + 'static) {
        self.wait_fn = Some(Box::new(wait_fn));
    }

    /// Whether the executor armed this future.
    pub fn is_armed(&self) -> bool {
        self.wait_fn.is_some()
    }

    /// Waits for completion.
    pub fn wait(self) -> Result<CallStats> {
        match self.wait_fn {
            Some(f) => f(),
            None => Ok(CallStats::default()),
        }
    }
}

impl fmt::Debug for StatsFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatsFuture")
            .field("armed", &self.is_armed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unarmed_future_completes() {
        let future = StatsFuture::new();
        assert!(!future.is_armed());
        assert_eq!(future.wait().unwrap(), CallStats::default());
    }

    #[test]
    fn test_armed_future_reports_stats() {
        let mut future = StatsFuture::new();
        future.arm(|| {
            Ok(CallStats {
                start_micros: 10,
                end_micros: 35,
            })
        });
        assert!(future.is_armed());
        assert_eq!(future.wait().unwrap().elapsed_micros(), 25);
    }
}
