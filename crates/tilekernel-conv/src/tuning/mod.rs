//! Launch tuning.
//!
//! Dispatch code hands a bound kernel, a tuning key, a global size and a
//! default local size to a [`LaunchTuner`]. The tuner decides the local size
//! through a [`TuningStrategy`] and executes the kernel, possibly split into
//! several launches along the third dimension.
//!
//! # Local size layout
//!
//! A [`LocalWorkSize`] has four components: the 3D work-group size and a
//! partition count. With `partitions > 1` the third global dimension is cut
//! into that many slices, each enqueued separately, which bounds the time a
//! single launch holds the device.

mod candidates;
mod store;
mod strategy;
mod tuner;

use std::fmt;

use serde::{Deserialize, Serialize};

use tilekernel_core::error::Result;
use tilekernel_core::future::StatsFuture;
use tilekernel_core::program::BoundKernel;
use tilekernel_core::types::ActivationKind;

pub use candidates::generate_candidates;
pub use store::TuningStore;
pub use strategy::{DefaultOnly, MeasureAndPick, ReplayCached, TuningSession, TuningStrategy};
pub use tuner::{run_partitioned, KernelTuner};

/// Work-group size plus partition count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalWorkSize {
    /// Work-group extent in each dimension.
    pub local: [u32; 3],
    /// Number of launches the third global dimension is split into.
    pub partitions: u32,
}

impl LocalWorkSize {
    /// Create a local size.
    pub const fn new(x: u32, y: u32, z: u32, partitions: u32) -> Self {
        Self {
            local: [x, y, z],
            partitions,
        }
    }

    /// Builds from the flat `[x, y, z, partitions]` layout.
    pub const fn from_array(values: [u32; 4]) -> Self {
        Self::new(values[0], values[1], values[2], values[3])
    }

    /// Flat `[x, y, z, partitions]` layout.
    pub fn to_array(&self) -> [u32; 4] {
        [self.local[0], self.local[1], self.local[2], self.partitions]
    }

    /// Same work-group with a different partition count.
    #[must_use]
    pub fn with_partitions(mut self, partitions: u32) -> Self {
        self.partitions = partitions;
        self
    }

    /// Work-items per work-group.
    pub fn work_group_size(&self) -> u64 {
        self.local.iter().map(|&l| u64::from(l)).product()
    }

    /// Whether every extent and the partition count are non-zero.
    pub fn is_usable(&self) -> bool {
        self.partitions > 0 && self.local.iter().all(|&l| l > 0)
    }
}

impl fmt::Display for LocalWorkSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}) x{}",
            self.local[0], self.local[1], self.local[2], self.partitions
        )
    }
}

/// Identity of a tuned launch: operator, variant, activation and shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TuningKey(String);

impl TuningKey {
    /// Concatenates operator tag, variant tag, activation and dimensions.
    ///
    /// Dimensions are comma-joined, so the shape part is unambiguous.
    pub fn new(operator: &str, variant: &str, activation: ActivationKind, dims: &[usize]) -> Self {
        let dims = dims
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(",");
        Self(format!("{}_{}_{}_{}", operator, variant, activation, dims))
    }

    /// Key text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TuningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tuning collaborator: picks launch parameters and executes the kernel.
pub trait LaunchTuner: Send + Sync {
    /// Runs `kernel` over `global`, tuning the local size when enabled.
    ///
    /// When `future` is given it is armed to wait for the last launch.
    fn tune_or_run(
        &self,
        kernel: &BoundKernel,
        key: &TuningKey,
        global: [u32; 3],
        default_local: LocalWorkSize,
        future: Option<&mut StatsFuture>,
    ) -> Result<()>;
}
