//! Opaque handles to device-resident storage.
//!
//! Dispatch code never touches device memory. It reads descriptor metadata
//! and forwards the handle into the kernel argument list.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Handle to a device image or buffer owned by the tensor allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceHandle(u64);

impl SurfaceHandle {
    /// Wrap a raw handle value issued by the allocator.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Issue a fresh process-unique handle.
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw handle value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SurfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface#{}", self.0)
    }
}
