//! Launch planning for the 3x3 convolution kernel.
//!
//! The kernel reads tensors from a packed image layout: 4 channels share one
//! texel and each work-item produces 5 adjacent output columns. The global
//! size therefore counts channel blocks, width blocks and output rows of
//! every batch.

use tilekernel_core::error::{Result, TileKernelError};
use tilekernel_core::program::{ArgumentList, KernelParam, KernelSignature};
use tilekernel_core::types::{Conv2dParams, DataType, TensorDesc};

use super::variant::{Conv2dK3x3Variant, Stride};
use crate::tuning::{LocalWorkSize, TuningKey};

/// Channels packed per texel.
pub const CHANNEL_BLOCK: usize = 4;

/// Output columns computed per work-item.
pub const WIDTH_BLOCK: usize = 5;

/// Filter height and width.
pub const KERNEL_SIZE: usize = 3;

/// Local size handed to the tuner when nothing better is known.
pub const DEFAULT_LOCAL_WORK_SIZE: LocalWorkSize = LocalWorkSize::new(4, 15, 8, 1);

/// Operator tag of tuning keys.
pub const TUNING_OPERATOR: &str = "conv2d_3x3_kernel";

/// Read-only tensors of a convolution call.
#[derive(Debug, Clone, Copy)]
pub struct Conv2dOperands<'a> {
    /// NHWC input.
    pub input: &'a TensorDesc,
    /// Filter laid out as `[3, 3, out_channels, in_channels]`.
    pub filter: &'a TensorDesc,
    /// Per-output-channel bias.
    pub bias: Option<&'a TensorDesc>,
}

impl<'a> Conv2dOperands<'a> {
    /// Operands without bias.
    pub fn new(input: &'a TensorDesc, filter: &'a TensorDesc) -> Self {
        Self {
            input,
            filter,
            bias: None,
        }
    }

    /// Builder method to attach a bias.
    #[must_use]
    pub fn with_bias(mut self, bias: &'a TensorDesc) -> Self {
        self.bias = Some(bias);
        self
    }
}

/// Everything needed to launch one convolution.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    /// `ceil(output channels / 4)`.
    pub channel_blocks: u32,
    /// `ceil(input channels / 4)`.
    pub input_channel_blocks: u32,
    /// `ceil(output width / 5)`.
    pub width_blocks: u32,
    /// `(channel_blocks, width_blocks, output height * batch)`.
    pub global_size: [u32; 3],
    /// Starting point for the tuner.
    pub default_local: LocalWorkSize,
    /// Identity of the launch for tuning.
    pub tuning_key: TuningKey,
    /// Kernel arguments in declaration order.
    pub arguments: ArgumentList,
}

/// Parameter list of the 3x3 convolution kernel.
///
/// The bias parameter exists only in variants compiled with `BIAS`.
pub fn conv2d_k3x3_signature(obfuscate: bool) -> KernelSignature {
    KernelSignature::new(
        Conv2dK3x3Variant::kernel_name(obfuscate),
        vec![
            KernelParam::new("input"),
            KernelParam::new("filter"),
            KernelParam::when("bias", "BIAS"),
            KernelParam::new("output"),
            KernelParam::new("relux_max_limit"),
            KernelParam::new("prelu_alpha"),
            KernelParam::new("in_height"),
            KernelParam::new("in_width"),
            KernelParam::new("in_ch_blks"),
            KernelParam::new("height"),
            KernelParam::new("width"),
            KernelParam::new("padding_top"),
            KernelParam::new("padding_left"),
            KernelParam::new("dilation_h"),
            KernelParam::new("dilation_w"),
        ],
    )
}

/// Output extent of a 3x3 window along one axis.
///
/// Returns `None` when the padded input is smaller than the dilated window.
pub fn output_extent(
    input: usize,
    padding_total: usize,
    dilation: usize,
    stride: Stride,
) -> Option<usize> {
    let window = dilation.checked_mul(KERNEL_SIZE - 1)?.checked_add(1)?;
    let span = input.checked_add(padding_total)?.checked_sub(window)?;
    Some(span / stride.value() as usize + 1)
}

/// Validates the call and computes arguments, geometry and tuning key.
///
/// Every shape problem is reported before any argument is bound.
pub fn plan_conv2d_k3x3(
    operands: &Conv2dOperands<'_>,
    params: &Conv2dParams,
    stride: Stride,
    dtype: DataType,
    output: &TensorDesc,
) -> Result<LaunchPlan> {
    let Conv2dOperands {
        input,
        filter,
        bias,
    } = *operands;

    check_rank("input", input, 4)?;
    check_rank("filter", filter, 4)?;
    check_rank("output", output, 4)?;
    if let Some(bias) = bias {
        check_rank("bias", bias, 1)?;
    }

    let tensors = [
        Some(("input", input)),
        Some(("filter", filter)),
        Some(("output", output)),
        bias.map(|b| ("bias", b)),
    ];
    for (role, tensor) in tensors.into_iter().flatten() {
        if tensor.shape().contains(&0) {
            return Err(TileKernelError::InvalidArgument(format!(
                "{} has an empty dimension: {:?}",
                role,
                tensor.shape()
            )));
        }
        if tensor.dtype() != dtype {
            return Err(TileKernelError::InvalidArgument(format!(
                "{} is {}, kernel runs in {}",
                role,
                tensor.dtype(),
                dtype
            )));
        }
    }

    check_dim("filter height", KERNEL_SIZE, filter.dim(0))?;
    check_dim("filter width", KERNEL_SIZE, filter.dim(1))?;
    check_dim("filter output channels", output.channels(), filter.dim(2))?;
    check_dim("filter input channels", input.channels(), filter.dim(3))?;
    check_dim("output batch", input.batch(), output.batch())?;
    if let Some(bias) = bias {
        check_dim("bias length", output.channels(), bias.dim(0))?;
    }

    let [pad_h, pad_w] = params.padding;
    let [dil_h, dil_w] = params.dilations;
    if pad_h < 0 || pad_w < 0 {
        return Err(TileKernelError::InvalidArgument(format!(
            "padding must be non-negative, got {:?}",
            params.padding
        )));
    }
    if dil_h < 1 || dil_w < 1 {
        return Err(TileKernelError::InvalidArgument(format!(
            "dilations must be at least 1, got {:?}",
            params.dilations
        )));
    }

    let expected_height = output_extent(input.height(), pad_h as usize, dil_h as usize, stride)
        .ok_or_else(|| window_error("height", input.height(), pad_h, dil_h))?;
    let expected_width = output_extent(input.width(), pad_w as usize, dil_w as usize, stride)
        .ok_or_else(|| window_error("width", input.width(), pad_w, dil_w))?;
    check_dim("output height", expected_height, output.height())?;
    check_dim("output width", expected_width, output.width())?;

    let channel_blocks = to_u32("channel blocks", output.channels().div_ceil(CHANNEL_BLOCK))?;
    let input_channel_blocks =
        to_u32("input channel blocks", input.channels().div_ceil(CHANNEL_BLOCK))?;
    let width_blocks = to_u32("width blocks", output.width().div_ceil(WIDTH_BLOCK))?;
    let rows = output
        .height()
        .checked_mul(output.batch())
        .ok_or_else(|| TileKernelError::InvalidArgument("output rows overflow".to_string()))?;
    let global_size = [channel_blocks, width_blocks, to_u32("output rows", rows)?];

    let mut arguments = ArgumentList::new();
    arguments
        .surface("input", input.surface())
        .surface("filter", filter.surface());
    if let Some(bias) = bias {
        arguments.surface("bias", bias.surface());
    }
    arguments
        .surface("output", output.surface())
        .f32("relux_max_limit", params.relux_max_limit)
        .f32("prelu_alpha", params.prelu_alpha)
        .i32("in_height", to_i32("input height", input.height())?)
        .i32("in_width", to_i32("input width", input.width())?)
        .i32(
            "in_ch_blks",
            to_i32("input channel blocks", input_channel_blocks as usize)?,
        )
        .i32("height", to_i32("output height", output.height())?)
        .i32("width", to_i32("output width", output.width())?)
        .i32("padding_top", pad_h / 2)
        .i32("padding_left", pad_w / 2)
        .i32("dilation_h", dil_h)
        .i32("dilation_w", dil_w);

    let tuning_key = TuningKey::new(
        TUNING_OPERATOR,
        stride.tag(),
        params.activation,
        output.shape(),
    );

    Ok(LaunchPlan {
        channel_blocks,
        input_channel_blocks,
        width_blocks,
        global_size,
        default_local: DEFAULT_LOCAL_WORK_SIZE,
        tuning_key,
        arguments,
    })
}

fn check_rank(tensor: &'static str, desc: &TensorDesc, expected: usize) -> Result<()> {
    if desc.rank() != expected {
        return Err(TileKernelError::RankMismatch {
            tensor,
            expected,
            actual: desc.rank(),
        });
    }
    Ok(())
}

fn check_dim(what: &str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(TileKernelError::ShapeMismatch {
            what: what.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

fn window_error(axis: &str, input: usize, padding: i32, dilation: i32) -> TileKernelError {
    TileKernelError::InvalidArgument(format!(
        "input {} {} with padding {} is smaller than the 3x3 window at dilation {}",
        axis, input, padding, dilation
    ))
}

fn to_u32(what: &str, value: usize) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| TileKernelError::InvalidArgument(format!("{} {} exceeds u32", what, value)))
}

fn to_i32(what: &str, value: usize) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| TileKernelError::InvalidArgument(format!("{} {} exceeds i32", what, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilekernel_core::error::ErrorKind;
    use tilekernel_core::memory::SurfaceHandle;
    use tilekernel_core::program::{ArgValue, BuildOptions};
    use tilekernel_core::types::ActivationKind;

    fn nhwc(b: usize, h: usize, w: usize, c: usize) -> TensorDesc {
        TensorDesc::nhwc(b, h, w, c, DataType::Float, SurfaceHandle::next())
    }

    fn filter(out_c: usize, in_c: usize) -> TensorDesc {
        TensorDesc::new(vec![3, 3, out_c, in_c], DataType::Float, SurfaceHandle::next())
    }

    fn same_params() -> Conv2dParams {
        Conv2dParams::default().with_padding([2, 2])
    }

    #[test]
    fn test_basic_geometry() {
        let input = nhwc(1, 8, 8, 4);
        let filter = filter(4, 4);
        let output = nhwc(1, 8, 8, 4);
        let plan = plan_conv2d_k3x3(
            &Conv2dOperands::new(&input, &filter),
            &same_params(),
            Stride::One,
            DataType::Float,
            &output,
        )
        .unwrap();

        assert_eq!(plan.channel_blocks, 1);
        assert_eq!(plan.input_channel_blocks, 1);
        assert_eq!(plan.width_blocks, 2);
        assert_eq!(plan.global_size, [1, 2, 8]);
        assert_eq!(plan.default_local, LocalWorkSize::new(4, 15, 8, 1));
        assert_eq!(plan.tuning_key.as_str(), "conv2d_3x3_kernel_s1_none_1,8,8,4");
        assert_eq!(plan.arguments.len(), 14);
    }

    #[test]
    fn test_tile_rounding() {
        for channels in 1..=17 {
            for width in 1..=17 {
                let input = nhwc(2, 6, width + 2, channels);
                let filter = filter(channels, channels);
                let output = nhwc(2, 4, width, channels);
                let plan = plan_conv2d_k3x3(
                    &Conv2dOperands::new(&input, &filter),
                    &Conv2dParams::default(),
                    Stride::One,
                    DataType::Float,
                    &output,
                )
                .unwrap();
                let cb = plan.channel_blocks as usize;
                let wb = plan.width_blocks as usize;
                assert!(cb * CHANNEL_BLOCK >= channels);
                assert!((cb - 1) * CHANNEL_BLOCK < channels);
                assert_eq!(cb * CHANNEL_BLOCK == channels, channels % CHANNEL_BLOCK == 0);
                assert!(wb * WIDTH_BLOCK >= width);
                assert_eq!(wb * WIDTH_BLOCK == width, width % WIDTH_BLOCK == 0);
                assert_eq!(plan.global_size[2], 8);
            }
        }
    }

    #[test]
    fn test_argument_values() {
        let input = nhwc(1, 9, 9, 8);
        let filter = filter(4, 8);
        let bias = TensorDesc::new(vec![4], DataType::Float, SurfaceHandle::next());
        let output = nhwc(1, 5, 5, 4);
        let params = Conv2dParams::default()
            .with_padding([2, 2])
            .with_activation(ActivationKind::ReluX)
            .with_relux_max_limit(6.0);
        let plan = plan_conv2d_k3x3(
            &Conv2dOperands::new(&input, &filter).with_bias(&bias),
            &params,
            Stride::Two,
            DataType::Float,
            &output,
        )
        .unwrap();

        let args = &plan.arguments;
        assert_eq!(args.get("bias"), Some(ArgValue::Surface(bias.surface())));
        assert_eq!(args.get("relux_max_limit"), Some(ArgValue::F32(6.0)));
        assert_eq!(args.get("in_ch_blks"), Some(ArgValue::I32(2)));
        assert_eq!(args.get("padding_top"), Some(ArgValue::I32(1)));
        assert_eq!(args.get("padding_left"), Some(ArgValue::I32(1)));
        assert_eq!(args.get("height"), Some(ArgValue::I32(5)));
        assert_eq!(plan.global_size, [1, 1, 5]);
        assert_eq!(plan.tuning_key.as_str(), "conv2d_3x3_kernel_s2_relux_1,5,5,4");
    }

    #[test]
    fn test_asymmetric_padding_and_dilation() {
        let input = nhwc(1, 10, 10, 4);
        let filter = filter(4, 4);
        let output = nhwc(1, 10, 8, 4);
        let params = Conv2dParams::default()
            .with_padding([4, 0])
            .with_dilations([2, 1])
            .with_activation(ActivationKind::PRelu)
            .with_prelu_alpha(0.25);
        let plan = plan_conv2d_k3x3(
            &Conv2dOperands::new(&input, &filter),
            &params,
            Stride::One,
            DataType::Float,
            &output,
        )
        .unwrap();

        let args = &plan.arguments;
        assert_eq!(args.get("prelu_alpha"), Some(ArgValue::F32(0.25)));
        assert_eq!(args.get("padding_top"), Some(ArgValue::I32(2)));
        assert_eq!(args.get("padding_left"), Some(ArgValue::I32(0)));
        assert_eq!(args.get("dilation_h"), Some(ArgValue::I32(2)));
        assert_eq!(args.get("dilation_w"), Some(ArgValue::I32(1)));
        assert_eq!(args.position("prelu_alpha"), Some(4));
        assert_eq!(args.position("padding_top"), Some(10));
        assert_eq!(args.position("padding_left"), Some(11));
        assert_eq!(args.position("dilation_h"), Some(12));
        assert_eq!(args.position("dilation_w"), Some(13));
        assert_eq!(plan.global_size, [1, 2, 10]);

        // Swapping the axes changes the required output shape.
        let swapped = params.with_padding([0, 4]).with_dilations([1, 2]);
        let err = plan_conv2d_k3x3(
            &Conv2dOperands::new(&input, &filter),
            &swapped,
            Stride::One,
            DataType::Float,
            &output,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Shape);
    }

    #[test]
    fn test_bias_shifts_following_slots() {
        let input = nhwc(1, 8, 8, 4);
        let filter = filter(4, 4);
        let bias = TensorDesc::new(vec![4], DataType::Float, SurfaceHandle::next());
        let output = nhwc(1, 8, 8, 4);

        let plain = plan_conv2d_k3x3(
            &Conv2dOperands::new(&input, &filter),
            &same_params(),
            Stride::One,
            DataType::Float,
            &output,
        )
        .unwrap();
        let biased = plan_conv2d_k3x3(
            &Conv2dOperands::new(&input, &filter).with_bias(&bias),
            &same_params(),
            Stride::One,
            DataType::Float,
            &output,
        )
        .unwrap();

        assert_eq!(plain.arguments.position("bias"), None);
        assert_eq!(biased.arguments.position("bias"), Some(2));
        assert_eq!(biased.arguments.len(), plain.arguments.len() + 1);
        for name in plain.arguments.names() {
            let before = plain.arguments.position(name).unwrap();
            let after = biased.arguments.position(name).unwrap();
            let shift = usize::from(before >= 2);
            assert_eq!(after, before + shift, "{}", name);
        }
    }

    #[test]
    fn test_arguments_match_signature() {
        let signature = conv2d_k3x3_signature(false);
        let mut with_bias = BuildOptions::new();
        with_bias.define("BIAS");

        let input = nhwc(1, 8, 8, 4);
        let filter = filter(4, 4);
        let bias = TensorDesc::new(vec![4], DataType::Float, SurfaceHandle::next());
        let output = nhwc(1, 8, 8, 4);

        let plain = plan_conv2d_k3x3(
            &Conv2dOperands::new(&input, &filter),
            &same_params(),
            Stride::One,
            DataType::Float,
            &output,
        )
        .unwrap();
        assert_eq!(plain.arguments.names(), signature.resolve(&BuildOptions::new()));

        let biased = plan_conv2d_k3x3(
            &Conv2dOperands::new(&input, &filter).with_bias(&bias),
            &same_params(),
            Stride::One,
            DataType::Float,
            &output,
        )
        .unwrap();
        assert_eq!(biased.arguments.names(), signature.resolve(&with_bias));
    }

    #[test]
    fn test_tuning_key_distinguishes_components() {
        let mut keys = std::collections::HashSet::new();
        for (stride, in_hw, out_hw) in [(Stride::One, 8, 8), (Stride::Two, 9, 5)] {
            for activation in ActivationKind::ALL {
                for (batch, channels) in [(1, 4), (2, 4), (1, 8)] {
                    let input = nhwc(batch, in_hw, in_hw, channels);
                    let filter = filter(channels, channels);
                    let output = nhwc(batch, out_hw, out_hw, channels);
                    let plan = plan_conv2d_k3x3(
                        &Conv2dOperands::new(&input, &filter),
                        &same_params().with_activation(activation),
                        stride,
                        DataType::Float,
                        &output,
                    )
                    .unwrap();
                    assert!(keys.insert(plan.tuning_key));
                }
            }
        }
        assert_eq!(keys.len(), 2 * 6 * 3);
    }

    #[test]
    fn test_output_extent() {
        assert_eq!(output_extent(8, 2, 1, Stride::One), Some(8));
        assert_eq!(output_extent(8, 0, 1, Stride::One), Some(6));
        assert_eq!(output_extent(8, 2, 1, Stride::Two), Some(4));
        assert_eq!(output_extent(9, 2, 1, Stride::Two), Some(5));
        assert_eq!(output_extent(8, 4, 2, Stride::One), Some(8));
        assert_eq!(output_extent(2, 0, 1, Stride::One), None);
    }

    #[test]
    fn test_shape_errors() {
        let input = nhwc(1, 8, 8, 4);
        let good_filter = filter(4, 4);
        let output = nhwc(1, 8, 8, 4);
        let run = |input: &TensorDesc,
                   filter: &TensorDesc,
                   bias: Option<&TensorDesc>,
                   params: Conv2dParams,
                   output: &TensorDesc| {
            let operands = Conv2dOperands {
                input,
                filter,
                bias,
            };
            plan_conv2d_k3x3(&operands, &params, Stride::One, DataType::Float, output).unwrap_err()
        };

        let rank3 = TensorDesc::new(vec![8, 8, 4], DataType::Float, SurfaceHandle::next());
        assert!(matches!(
            run(&rank3, &good_filter, None, same_params(), &output),
            TileKernelError::RankMismatch { tensor: "input", .. }
        ));

        let wrong_out_c = nhwc(1, 8, 8, 8);
        assert!(matches!(
            run(&input, &good_filter, None, same_params(), &wrong_out_c),
            TileKernelError::ShapeMismatch { .. }
        ));

        let five_by_five = TensorDesc::new(vec![5, 5, 4, 4], DataType::Float, SurfaceHandle::next());
        assert!(matches!(
            run(&input, &five_by_five, None, same_params(), &output),
            TileKernelError::ShapeMismatch { expected: 3, actual: 5, .. }
        ));

        let short_bias = TensorDesc::new(vec![3], DataType::Float, SurfaceHandle::next());
        assert!(matches!(
            run(&input, &good_filter, Some(&short_bias), same_params(), &output),
            TileKernelError::ShapeMismatch { expected: 4, actual: 3, .. }
        ));

        let wrong_height = nhwc(1, 7, 8, 4);
        assert!(matches!(
            run(&input, &good_filter, None, same_params(), &wrong_height),
            TileKernelError::ShapeMismatch { expected: 8, actual: 7, .. }
        ));

        let empty = nhwc(1, 0, 8, 4);
        assert_eq!(run(&empty, &good_filter, None, same_params(), &output).kind(), ErrorKind::Shape);

        let negative = Conv2dParams::default().with_padding([-2, 0]);
        assert_eq!(run(&input, &good_filter, None, negative, &output).kind(), ErrorKind::Shape);

        let zero_dilation = same_params().with_dilations([0, 1]);
        assert_eq!(
            run(&input, &good_filter, None, zero_dilation, &output).kind(),
            ErrorKind::Shape
        );

        let half = TensorDesc::nhwc(1, 8, 8, 4, DataType::Half, SurfaceHandle::next());
        assert_eq!(run(&input, &good_filter, None, same_params(), &half).kind(), ErrorKind::Shape);

        let tiny = nhwc(1, 1, 1, 4);
        assert_eq!(
            run(&tiny, &good_filter, None, Conv2dParams::default(), &output).kind(),
            ErrorKind::Shape
        );
    }
}
