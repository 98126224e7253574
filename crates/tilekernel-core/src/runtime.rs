//! Accelerator runtime port.
//!
//! The runtime owns program compilation, its cache and the command queue.
//! Dispatch code asks it for a compiled variant and hands back bound kernels
//! for execution.

use std::sync::Arc;

use crate::error::{Result, TileKernelError};
use crate::future::DeviceEvent;
use crate::program::{BoundKernel, BuildOptions, Program};

/// Rounds `value` up to the next multiple of `multiple`.
///
/// Returns `None` when the result does not fit in `u32`.
pub fn round_up(value: u32, multiple: u32) -> Option<u32> {
    if multiple == 0 {
        return Some(value);
    }
    value.div_ceil(multiple).checked_mul(multiple)
}

/// A 3D launch range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdRange {
    /// Global offset.
    pub offset: [u32; 3],
    /// Global size, a multiple of `local` in each dimension.
    pub global: [u32; 3],
    /// Work-group size.
    pub local: [u32; 3],
}

impl NdRange {
    /// Creates a range, padding `global` up to multiples of `local`.
    ///
    /// Kernels receive their true extents as arguments and discard the
    /// padded work-items.
    pub fn new(offset: [u32; 3], global: [u32; 3], local: [u32; 3]) -> Result<Self> {
        if local.iter().any(|&l| l == 0) {
            return Err(TileKernelError::InvalidArgument(format!(
                "local work size {:?} has a zero component",
                local
            )));
        }
        let mut padded = [0u32; 3];
        for (axis, slot) in padded.iter_mut().enumerate() {
            *slot = round_up(global[axis], local[axis]).ok_or_else(|| {
                TileKernelError::InvalidArgument(format!(
                    "global size {} on axis {} overflows when padded to {}",
                    global[axis], axis, local[axis]
                ))
            })?;
        }
        let global = padded;
        Ok(Self {
            offset,
            global,
            local,
        })
    }

    /// Work-items per work-group.
    pub fn work_group_size(&self) -> u64 {
        self.local.iter().map(|&l| u64::from(l)).product()
    }

    /// Total work-items launched.
    pub fn total_work_items(&self) -> u64 {
        self.global.iter().map(|&g| u64::from(g)).product()
    }
}

/// Runtime collaborator: compiles programs and executes bound kernels.
pub trait KernelRuntime: Send + Sync {
    /// Returns the compiled variant for `options`, compiling on first use.
    ///
    /// Repeated calls with an equal option set return the same program.
    fn build_kernel(
        &self,
        program_name: &str,
        kernel_name: &str,
        options: &BuildOptions,
    ) -> Result<Arc<Program>>;

    /// Largest work-group the device accepts for `program`.
    fn kernel_max_work_group_size(&self, program: &Program) -> u32;

    /// Enqueues `kernel` over `range`. Returns without waiting.
    fn enqueue(&self, kernel: &BoundKernel, range: &NdRange) -> Result<Arc<dyn DeviceEvent>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(8, 4), Some(8));
        assert_eq!(round_up(9, 4), Some(12));
        assert_eq!(round_up(1, 15), Some(15));
        assert_eq!(round_up(5, 0), Some(5));
        assert_eq!(round_up(u32::MAX, 1), Some(u32::MAX));
        assert_eq!(round_up(u32::MAX - 2, 8), None);
    }

    #[test]
    fn test_nd_range_rejects_overflowing_padding() {
        let err = NdRange::new([0, 0, 0], [1, 1, u32::MAX - 2], [1, 1, 8]).unwrap_err();
        assert!(matches!(err, TileKernelError::InvalidArgument(_)));
    }

    #[test]
    fn test_nd_range_pads_global() {
        let range = NdRange::new([0, 0, 0], [1, 2, 8], [4, 15, 8]).unwrap();
        assert_eq!(range.global, [4, 15, 8]);
        assert_eq!(range.work_group_size(), 480);
        assert_eq!(range.total_work_items(), 480);
    }

    #[test]
    fn test_nd_range_rejects_zero_local() {
        assert!(NdRange::new([0, 0, 0], [4, 4, 4], [0, 1, 1]).is_err());
    }
}
