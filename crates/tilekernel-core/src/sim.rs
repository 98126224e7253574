//! Device-free runtime for tests and benches.
//!
//! `SimRuntime` compiles by resolving registered kernel signatures, validates
//! launches the way a driver would (work-group limit, live surfaces), records
//! every enqueue and reports timings from a pluggable cost model on a
//! virtual clock.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::cache::ProgramCache;
use crate::error::{Result, TileKernelError};
use crate::future::{CallStats, DeviceEvent};
use crate::memory::SurfaceHandle;
use crate::program::{ArgValue, ArgumentList, BoundKernel, BuildOptions, KernelSignature, Program, ProgramKey};
use crate::runtime::{KernelRuntime, NdRange};

type CostModel = Box<dyn Fn(&NdRange) -> u64 + Send + Sync>;

/// One recorded enqueue.
#[derive(Debug, Clone)]
pub struct LaunchRecord {
    /// Kernel entry point.
    pub kernel: String,
    /// Switches of the launched variant.
    pub options: BuildOptions,
    /// Bound arguments.
    pub args: ArgumentList,
    /// Launch range after padding.
    pub range: NdRange,
    /// Simulated timing.
    pub stats: CallStats,
}

struct SimEvent {
    stats: CallStats,
}

impl DeviceEvent for SimEvent {
    fn wait(&self) -> Result<CallStats> {
        Ok(self.stats)
    }
}

/// Default cost: one microsecond per 64 launched items plus a per-group
/// scheduling overhead.
fn default_cost(range: &NdRange) -> u64 {
    let items = range.total_work_items();
    let groups = items / range.work_group_size().max(1);
    1 + items / 64 + groups / 4
}

/// Simulated accelerator runtime.
pub struct SimRuntime {
    signatures: RwLock<HashMap<String, KernelSignature>>,
    failing: RwLock<HashSet<String>>,
    released: RwLock<HashSet<SurfaceHandle>>,
    cache: ProgramCache,
    compiles: AtomicU64,
    max_work_group_size: u32,
    cost: CostModel,
    clock: AtomicU64,
    launches: Mutex<Vec<LaunchRecord>>,
}

impl Default for SimRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl SimRuntime {
    /// Create a runtime with a 256-item work-group limit.
    pub fn new() -> Self {
        Self {
            signatures: RwLock::new(HashMap::new()),
            failing: RwLock::new(HashSet::new()),
            released: RwLock::new(HashSet::new()),
            cache: ProgramCache::new(),
            compiles: AtomicU64::new(0),
            max_work_group_size: 256,
            cost: Box::new(default_cost),
            clock: AtomicU64::new(0),
            launches: Mutex::new(Vec::new()),
        }
    }

    /// Registers the parameter list of a kernel entry point.
    #[must_use]
    pub fn with_signature(self, signature: KernelSignature) -> Self {
        self.signatures
            .write()
            .insert(signature.kernel().to_string(), signature);
        self
    }

    /// Sets the work-group size limit.
    #[must_use]
    pub fn with_max_work_group_size(mut self, size: u32) -> Self {
        self.max_work_group_size = size;
        self
    }

    /// Replaces the cost model (microseconds per launch).
    #[must_use]
    pub fn with_cost_model(mut self, cost: impl Fn(&NdRange) -> u64 + Send + Sync + 'static) -> Self {
        self.cost = Box::new(cost);
        self
    }

    /// Makes every compilation of `kernel` fail.
    pub fn fail_compilation(&self, kernel: &str) {
        self.failing.write().insert(kernel.to_string());
    }

    /// Marks `surface` as released; later launches binding it fail.
    pub fn release_surface(&self, surface: SurfaceHandle) {
        self.released.write().insert(surface);
    }

    /// Number of actual compilations performed.
    pub fn compile_count(&self) -> u64 {
        self.compiles.load(Ordering::Relaxed)
    }

    /// Program cache.
    pub fn cache(&self) -> &ProgramCache {
        &self.cache
    }

    /// Snapshot of recorded launches.
    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.launches.lock().clone()
    }

    /// Forgets recorded launches.
    pub fn clear_launches(&self) {
        self.launches.lock().clear();
    }

    fn compile(&self, key: &ProgramKey) -> Result<Program> {
        if self.failing.read().contains(key.kernel()) {
            return Err(TileKernelError::CompilationFailed {
                program: key.program().to_string(),
                kernel: key.kernel().to_string(),
                reason: "simulated compiler failure".to_string(),
            });
        }
        let signatures = self.signatures.read();
        let signature =
            signatures
                .get(key.kernel())
                .ok_or_else(|| TileKernelError::CompilationFailed {
                    program: key.program().to_string(),
                    kernel: key.kernel().to_string(),
                    reason: "no such kernel in program".to_string(),
                })?;
        self.compiles.fetch_add(1, Ordering::Relaxed);
        Ok(Program::new(key.clone(), signature.resolve(key.options())))
    }
}

impl KernelRuntime for SimRuntime {
    fn build_kernel(
        &self,
        program_name: &str,
        kernel_name: &str,
        options: &BuildOptions,
    ) -> Result<Arc<Program>> {
        let key = ProgramKey::new(program_name, kernel_name, options.clone());
        self.cache.get_or_compile(&key, |k| self.compile(k))
    }

    fn kernel_max_work_group_size(&self, _program: &Program) -> u32 {
        self.max_work_group_size
    }

    fn enqueue(&self, kernel: &BoundKernel, range: &NdRange) -> Result<Arc<dyn DeviceEvent>> {
        if range.work_group_size() > u64::from(self.max_work_group_size) {
            return Err(TileKernelError::LaunchFailed(format!(
                "work-group {:?} exceeds device limit {}",
                range.local, self.max_work_group_size
            )));
        }

        {
            let released = self.released.read();
            for arg in kernel.args().iter() {
                if let ArgValue::Surface(surface) = arg.value {
                    if released.contains(&surface) {
                        return Err(TileKernelError::SurfaceError(format!(
                            "argument `{}` is bound to released {}",
                            arg.name, surface
                        )));
                    }
                }
            }
        }

        let elapsed = (self.cost)(range);
        let start = self.clock.fetch_add(elapsed, Ordering::Relaxed);
        let stats = CallStats {
            start_micros: start,
            end_micros: start + elapsed,
        };

        self.launches.lock().push(LaunchRecord {
            kernel: kernel.program().kernel_name().to_string(),
            options: kernel.program().key().options().clone(),
            args: kernel.args().clone(),
            range: *range,
            stats,
        });

        Ok(Arc::new(SimEvent { stats }))
    }
}
