//! Strategies for choosing a local size.

use tilekernel_core::error::{Result, TileKernelError};
use tilekernel_core::program::BoundKernel;
use tilekernel_core::runtime::{KernelRuntime, NdRange};

use super::candidates::generate_candidates;
use super::store::TuningStore;
use super::{LocalWorkSize, TuningKey};

/// Everything a strategy may consult for one launch.
pub struct TuningSession<'a> {
    /// Runtime to time candidate launches on.
    pub runtime: &'a dyn KernelRuntime,
    /// Kernel with its arguments bound.
    pub kernel: &'a BoundKernel,
    /// Launch identity.
    pub key: &'a TuningKey,
    /// Global size before padding.
    pub global: [u32; 3],
    /// Local size used when nothing better is known.
    pub default_local: LocalWorkSize,
    /// Shared tuning results.
    pub store: &'a TuningStore,
}

/// Chooses the local size for a launch.
pub trait TuningStrategy: Send + Sync {
    /// Strategy name for logs.
    fn name(&self) -> &'static str;

    /// Returns the local size to run with.
    fn select(&self, session: &TuningSession<'_>) -> Result<LocalWorkSize>;
}

/// Always the default local size.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultOnly;

impl TuningStrategy for DefaultOnly {
    fn name(&self) -> &'static str {
        "default"
    }

    fn select(&self, session: &TuningSession<'_>) -> Result<LocalWorkSize> {
        Ok(session.default_local)
    }
}

/// Previously tuned local size when stored, default otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayCached;

impl TuningStrategy for ReplayCached {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn select(&self, session: &TuningSession<'_>) -> Result<LocalWorkSize> {
        match session.store.lookup(session.key) {
            Some(lws) if lws.is_usable() => {
                tracing::trace!(tuning_key = %session.key, lws = %lws, "Replaying tuned local size");
                Ok(lws)
            }
            Some(lws) => {
                tracing::warn!(
                    tuning_key = %session.key,
                    lws = %lws,
                    "Stored local size is unusable, using default"
                );
                Ok(session.default_local)
            }
            None => Ok(session.default_local),
        }
    }
}

/// Times every candidate local size and records the fastest.
#[derive(Debug, Clone, Copy)]
pub struct MeasureAndPick {
    runs_per_candidate: u32,
    max_kernel_time_us: Option<u64>,
}

impl Default for MeasureAndPick {
    fn default() -> Self {
        Self::new(2)
    }
}

impl MeasureAndPick {
    /// Times each candidate `runs_per_candidate` times.
    pub fn new(runs_per_candidate: u32) -> Self {
        Self {
            runs_per_candidate: runs_per_candidate.max(1),
            max_kernel_time_us: None,
        }
    }

    /// Splits the winner into partitions so each launch stays under
    /// `max_kernel_time_us`.
    #[must_use]
    pub fn with_kernel_time_limit(mut self, max_kernel_time_us: u64) -> Self {
        self.max_kernel_time_us = Some(max_kernel_time_us.max(1));
        self
    }

    /// Average device time of `lws` over the configured runs.
    fn measure(&self, session: &TuningSession<'_>, lws: &LocalWorkSize) -> Result<f64> {
        let range = NdRange::new([0, 0, 0], session.global, lws.local)?;
        let mut total = 0u64;
        for _ in 0..self.runs_per_candidate {
            let event = session.runtime.enqueue(session.kernel, &range)?;
            total += event.wait()?.elapsed_micros();
        }
        Ok(total as f64 / f64::from(self.runs_per_candidate))
    }
}

impl TuningStrategy for MeasureAndPick {
    fn name(&self) -> &'static str {
        "measure"
    }

    fn select(&self, session: &TuningSession<'_>) -> Result<LocalWorkSize> {
        let max_wg = session
            .runtime
            .kernel_max_work_group_size(session.kernel.program());
        let candidates = generate_candidates(session.global, max_wg);

        let mut best: Option<(LocalWorkSize, f64)> = None;
        let mut last_error = None;

        for candidate in candidates {
            match self.measure(session, &candidate) {
                Ok(micros) => {
                    tracing::trace!(
                        tuning_key = %session.key,
                        lws = %candidate,
                        micros,
                        "Measured candidate"
                    );
                    if best.map_or(true, |(_, t)| micros < t) {
                        best = Some((candidate, micros));
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        tuning_key = %session.key,
                        lws = %candidate,
                        error = %e,
                        "Candidate launch failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        let Some((mut lws, micros)) = best else {
            return Err(last_error.unwrap_or_else(|| {
                TileKernelError::LaunchFailed(format!(
                    "no viable local size for {} within {} items",
                    session.key, max_wg
                ))
            }));
        };

        if let Some(limit) = self.max_kernel_time_us {
            let partitions = (micros / limit as f64) as u64 + 1;
            let partitions = partitions.min(u64::from(session.global[2].max(1)));
            lws.partitions = partitions as u32;
        }

        tracing::info!(
            tuning_key = %session.key,
            lws = %lws,
            micros,
            "Tuned launch"
        );
        session.store.record(session.key, lws);
        Ok(lws)
    }
}
