//! # TileKernel Conv
//!
//! Dispatch of the 3x3 stride-1/stride-2 convolution kernel.
//!
//! A convolution request is turned into a specialized program variant, a
//! bound argument list and a launch geometry. The launch itself goes through
//! a [`LaunchTuner`], which either replays a previously measured local size
//! or searches for one.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tilekernel_conv::prelude::*;
//!
//! let runtime = Arc::new(SimRuntime::new().with_signature(conv2d_k3x3_signature(false)));
//! let ctx = DispatchContext::from_config(runtime, &TileKernelConfig::default())?;
//!
//! let params = Conv2dParams::default().with_padding([2, 2]);
//! conv2d_k3x3_s1(
//!     &ctx,
//!     &Conv2dOperands::new(&input, &filter),
//!     &params,
//!     DataType::Float,
//!     &mut output,
//!     None,
//! )?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod conv2d;
pub mod tuning;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::context::DispatchContext;
    pub use crate::conv2d::{
        conv2d_k3x3, conv2d_k3x3_s1, conv2d_k3x3_s2, conv2d_k3x3_signature, plan_conv2d_k3x3,
        Conv2dK3x3Variant, Conv2dOperands, LaunchPlan, Stride,
    };
    pub use crate::tuning::{
        KernelTuner, LaunchTuner, LocalWorkSize, MeasureAndPick, ReplayCached, TuningKey,
        TuningStore, TuningStrategy,
    };
    pub use tilekernel_core::prelude::*;
}

// Re-exports for convenience
pub use context::DispatchContext;
pub use conv2d::{conv2d_k3x3_s1, conv2d_k3x3_s2, Conv2dOperands, Stride};
pub use tuning::{KernelTuner, LaunchTuner, LocalWorkSize, TuningKey, TuningStore};
