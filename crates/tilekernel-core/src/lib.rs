//! # TileKernel Core
//!
//! Shared types and collaborator ports for dispatching tiled compute kernels
//! on an image-oriented accelerator.
//!
//! ## Core Abstractions
//!
//! - [`TensorDesc`] - Shape, precision and device surface of a tensor
//! - [`BuildOptions`] / [`ProgramKey`] - Canonical identity of a program variant
//! - [`ArgumentList`] / [`BoundKernel`] - Named kernel arguments checked at bind time
//! - [`KernelRuntime`] - Runtime port: compile-or-fetch and enqueue
//! - [`StatsFuture`] - Completion sink reporting device timing
//! - [`ProgramCache`] - Memoizing cache used by runtime implementations
//!
//! ## Example
//!
//! ```ignore
//! use tilekernel_core::prelude::*;
//!
//! let runtime = SimRuntime::new().with_signature(signature);
//! let program = runtime.build_kernel("conv_2d_3x3", "conv_2d_3x3", &options)?;
//! let kernel = BoundKernel::bind(program, args)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod error;
pub mod future;
pub mod memory;
pub mod program;
pub mod runtime;
pub mod sim;
pub mod types;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cache::{ProgramCache, ProgramCacheStats};
    pub use crate::config::{ProgramConfig, TileKernelConfig, TuningConfig, TuningMode};
    pub use crate::error::{ErrorKind, Result, TileKernelError};
    pub use crate::future::{CallStats, DeviceEvent, StatsFuture};
    pub use crate::memory::SurfaceHandle;
    pub use crate::program::{
        obfuscate_symbol, ArgValue, ArgumentList, BoundKernel, BuildOptions, KernelArg,
        KernelParam, KernelSignature, Program, ProgramKey,
    };
    pub use crate::runtime::{round_up, KernelRuntime, NdRange};
    pub use crate::sim::{LaunchRecord, SimRuntime};
    pub use crate::types::{ActivationKind, Conv2dParams, DataType, TensorDesc};
}

// Re-exports for convenience
pub use cache::ProgramCache;
pub use config::{TileKernelConfig, TuningMode};
pub use error::{ErrorKind, Result, TileKernelError};
pub use future::{CallStats, DeviceEvent, StatsFuture};
pub use memory::SurfaceHandle;
pub use program::{ArgValue, ArgumentList, BoundKernel, BuildOptions, Program, ProgramKey};
pub use runtime::{KernelRuntime, NdRange};
pub use types::{ActivationKind, Conv2dParams, DataType, TensorDesc};
