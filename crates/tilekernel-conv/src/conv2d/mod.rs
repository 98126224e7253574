//! 3x3 convolution dispatch.
//!
//! A call flows through three steps:
//!
//! 1. [`Conv2dK3x3Variant::build_options`] derives the compile-time switches
//!    and the runtime builds or fetches the matching program.
//! 2. [`plan_conv2d_k3x3`] validates shapes, binds arguments, computes the
//!    launch geometry and the tuning key.
//! 3. The context's [`LaunchTuner`](crate::tuning::LaunchTuner) picks the
//!    local size and enqueues the kernel.
//!
//! Configuration errors are raised before any shape is looked at, and shape
//! errors before any program is built.

mod plan;
mod variant;

use tilekernel_core::error::Result;
use tilekernel_core::future::StatsFuture;
use tilekernel_core::program::BoundKernel;
use tilekernel_core::types::{Conv2dParams, DataType, TensorDesc};

use crate::context::DispatchContext;

pub use plan::{
    conv2d_k3x3_signature, output_extent, plan_conv2d_k3x3, Conv2dOperands, LaunchPlan,
    CHANNEL_BLOCK, DEFAULT_LOCAL_WORK_SIZE, KERNEL_SIZE, TUNING_OPERATOR, WIDTH_BLOCK,
};
pub use variant::{Conv2dK3x3Variant, Stride, KERNEL_NAME, PROGRAM_NAME};

/// Runs a 3x3 stride-1 convolution writing into `output`.
pub fn conv2d_k3x3_s1(
    ctx: &DispatchContext,
    operands: &Conv2dOperands<'_>,
    params: &Conv2dParams,
    dtype: DataType,
    output: &mut TensorDesc,
    future: Option<&mut StatsFuture>,
) -> Result<()> {
    conv2d_k3x3(ctx, operands, params, Stride::One, dtype, output, future)
}

/// Runs a 3x3 stride-2 convolution writing into `output`.
pub fn conv2d_k3x3_s2(
    ctx: &DispatchContext,
    operands: &Conv2dOperands<'_>,
    params: &Conv2dParams,
    dtype: DataType,
    output: &mut TensorDesc,
    future: Option<&mut StatsFuture>,
) -> Result<()> {
    conv2d_k3x3(ctx, operands, params, Stride::Two, dtype, output, future)
}

/// Runs a 3x3 convolution with the given stride.
///
/// `output` is borrowed mutably for the duration of the launch because the
/// kernel writes its surface.
pub fn conv2d_k3x3(
    ctx: &DispatchContext,
    operands: &Conv2dOperands<'_>,
    params: &Conv2dParams,
    stride: Stride,
    dtype: DataType,
    output: &mut TensorDesc,
    future: Option<&mut StatsFuture>,
) -> Result<()> {
    let variant = Conv2dK3x3Variant::new(dtype, operands.bias.is_some(), stride, params.activation);
    let options = variant.build_options(ctx.obfuscate_symbols())?;

    let plan = plan_conv2d_k3x3(operands, params, stride, dtype, output)?;

    let kernel_name = Conv2dK3x3Variant::kernel_name(ctx.obfuscate_symbols());
    let program = ctx
        .runtime()
        .build_kernel(PROGRAM_NAME, &kernel_name, &options)?;
    let kernel = BoundKernel::bind(program, plan.arguments)?;

    tracing::debug!(
        tuning_key = %plan.tuning_key,
        program = %kernel.program().key().digest(),
        global = ?plan.global_size,
        "Dispatching conv2d 3x3"
    );

    ctx.tuner().tune_or_run(
        &kernel,
        &plan.tuning_key,
        plan.global_size,
        plan.default_local,
        future,
    )
}
