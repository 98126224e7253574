//! Tuner that selects a local size and runs the kernel.

use std::sync::Arc;

use tilekernel_core::config::{TuningConfig, TuningMode};
use tilekernel_core::error::{Result, TileKernelError};
use tilekernel_core::future::{DeviceEvent, StatsFuture};
use tilekernel_core::program::BoundKernel;
use tilekernel_core::runtime::{round_up, KernelRuntime, NdRange};

use super::candidates::generate_candidates;
use super::store::TuningStore;
use super::strategy::{DefaultOnly, MeasureAndPick, ReplayCached, TuningSession, TuningStrategy};
use super::{LaunchTuner, LocalWorkSize, TuningKey};

/// Enqueues `kernel` over `global`, split into `lws.partitions` slices along
/// the third dimension.
///
/// Slice heights are rounded up to the work-group depth so slices never
/// overlap. Returns the event of the last slice.
pub fn run_partitioned(
    runtime: &dyn KernelRuntime,
    kernel: &BoundKernel,
    global: [u32; 3],
    lws: &LocalWorkSize,
) -> Result<Arc<dyn DeviceEvent>> {
    let depth = global[2];
    let partitions = lws.partitions.clamp(1, depth.max(1));
    let slice = round_up(depth.div_ceil(partitions), lws.local[2])
        .ok_or_else(|| {
            TileKernelError::InvalidArgument(format!(
                "slice of {} rows overflows when padded to {}",
                depth.div_ceil(partitions),
                lws.local[2]
            ))
        })?
        .max(1);

    let mut offset = 0;
    let mut last = None;
    loop {
        let extent = slice.min(depth - offset);
        let range = NdRange::new([0, 0, offset], [global[0], global[1], extent], lws.local)?;
        last = Some(runtime.enqueue(kernel, &range)?);
        offset += extent;
        if offset >= depth {
            break;
        }
    }

    last.ok_or_else(|| TileKernelError::LaunchFailed("empty launch".to_string()))
}

/// Replaces a local size the device cannot run with the greedy fill shape,
/// keeping its partition count.
fn fit_to_device(lws: LocalWorkSize, global: [u32; 3], max_work_group_size: u32) -> LocalWorkSize {
    if lws.work_group_size() <= u64::from(max_work_group_size) {
        return lws;
    }
    match generate_candidates(global, max_work_group_size).first() {
        Some(fill) => {
            tracing::debug!(
                requested = %lws,
                max_work_group_size,
                fitted = %fill,
                "Local size exceeds device limit"
            );
            fill.with_partitions(lws.partitions)
        }
        None => lws,
    }
}

/// [`LaunchTuner`] backed by a runtime, a strategy and a tuning store.
pub struct KernelTuner {
    runtime: Arc<dyn KernelRuntime>,
    strategy: Box<dyn TuningStrategy>,
    store: Arc<TuningStore>,
}

impl KernelTuner {
    /// Create a tuner.
    pub fn new(
        runtime: Arc<dyn KernelRuntime>,
        strategy: Box<dyn TuningStrategy>,
        store: Arc<TuningStore>,
    ) -> Self {
        Self {
            runtime,
            strategy,
            store,
        }
    }

    /// Builds the tuner described by `config`, opening its store.
    pub fn from_config(runtime: Arc<dyn KernelRuntime>, config: &TuningConfig) -> Result<Self> {
        let store = match &config.store_path {
            Some(path) => TuningStore::open(path)?,
            None => TuningStore::in_memory(),
        };

        let strategy: Box<dyn TuningStrategy> = match config.mode {
            TuningMode::Off => Box::new(DefaultOnly),
            TuningMode::Replay => Box::new(ReplayCached),
            TuningMode::Tune => {
                let measure = MeasureAndPick::new(config.runs_per_candidate);
                if config.limit_kernel_time {
                    Box::new(measure.with_kernel_time_limit(config.max_kernel_time_us))
                } else {
                    Box::new(measure)
                }
            }
        };

        tracing::debug!(
            strategy = strategy.name(),
            entries = store.len(),
            "Created kernel tuner"
        );

        Ok(Self::new(runtime, strategy, Arc::new(store)))
    }

    /// Shared tuning results.
    pub fn store(&self) -> &Arc<TuningStore> {
        &self.store
    }

    /// Active strategy name.
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }
}

impl LaunchTuner for KernelTuner {
    fn tune_or_run(
        &self,
        kernel: &BoundKernel,
        key: &TuningKey,
        global: [u32; 3],
        default_local: LocalWorkSize,
        future: Option<&mut StatsFuture>,
    ) -> Result<()> {
        let session = TuningSession {
            runtime: self.runtime.as_ref(),
            kernel,
            key,
            global,
            default_local,
            store: &self.store,
        };
        let max_wg = self.runtime.kernel_max_work_group_size(kernel.program());
        let lws = fit_to_device(self.strategy.select(&session)?, global, max_wg);

        tracing::debug!(
            tuning_key = %key,
            strategy = self.strategy.name(),
            global = ?global,
            lws = %lws,
            "Running kernel"
        );

        let event = run_partitioned(self.runtime.as_ref(), kernel, global, &lws)?;
        if let Some(future) = future {
            future.arm(move || event.wait());
        }
        Ok(())
    }
}

impl Drop for KernelTuner {
    fn drop(&mut self) {
        if self.store.is_dirty() {
            if let Err(e) = self.store.persist() {
                tracing::warn!(error = %e, "Failed to persist tuning store");
            }
        }
    }
}
