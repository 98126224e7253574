//! Program variants of the 3x3 convolution kernel.
//!
//! A variant is the tuple (precision, bias presence, stride, activation). It
//! maps to exactly one canonical [`BuildOptions`] set, so equal tuples share
//! a compiled program and distinct tuples never collide.

use std::fmt;

use tilekernel_core::error::{Result, TileKernelError};
use tilekernel_core::program::{obfuscate_symbol, BuildOptions};
use tilekernel_core::types::{ActivationKind, DataType};

/// Program source holding the kernel.
pub const PROGRAM_NAME: &str = "conv_2d_3x3";

/// Unobfuscated kernel entry point.
pub const KERNEL_NAME: &str = "conv_2d_3x3";

/// Supported convolution strides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stride {
    /// Stride 1.
    One,
    /// Stride 2.
    Two,
}

impl Stride {
    /// Numeric stride.
    pub fn value(&self) -> u32 {
        match self {
            Stride::One => 1,
            Stride::Two => 2,
        }
    }

    /// Short tag used in tuning keys.
    pub fn tag(&self) -> &'static str {
        match self {
            Stride::One => "s1",
            Stride::Two => "s2",
        }
    }
}

impl TryFrom<u32> for Stride {
    type Error = TileKernelError;

    fn try_from(stride: u32) -> Result<Self> {
        match stride {
            1 => Ok(Stride::One),
            2 => Ok(Stride::Two),
            other => Err(TileKernelError::UnsupportedStride {
                kernel: KERNEL_NAME,
                stride: other,
            }),
        }
    }
}

impl fmt::Display for Stride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// One specialization of the 3x3 convolution kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Conv2dK3x3Variant {
    /// Storage precision of every tensor.
    pub dtype: DataType,
    /// Whether a bias tensor is bound.
    pub has_bias: bool,
    /// Convolution stride.
    pub stride: Stride,
    /// Fused activation.
    pub activation: ActivationKind,
}

impl Conv2dK3x3Variant {
    /// Create a variant.
    pub fn new(dtype: DataType, has_bias: bool, stride: Stride, activation: ActivationKind) -> Self {
        Self {
            dtype,
            has_bias,
            stride,
            activation,
        }
    }

    /// Builds a variant from untyped stride and activation codes, as found
    /// in serialized operator graphs.
    pub fn from_codes(
        dtype: DataType,
        has_bias: bool,
        stride: u32,
        activation: u32,
    ) -> Result<Self> {
        let stride = Stride::try_from(stride);
        let activation = ActivationKind::try_from(activation);
        match (stride, activation) {
            (Ok(stride), Ok(activation)) => Ok(Self::new(dtype, has_bias, stride, activation)),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(error = %e, "Rejected conv2d 3x3 variant");
                Err(e)
            }
        }
    }

    /// Exported kernel symbol.
    pub fn kernel_name(obfuscate: bool) -> String {
        obfuscate_symbol(KERNEL_NAME, obfuscate)
    }

    /// Canonical compile-time switches for this variant.
    ///
    /// Fails with a configuration error when the precision has no kernel
    /// storage type.
    pub fn build_options(&self, obfuscate: bool) -> Result<BuildOptions> {
        let (storage, command) = match (self.dtype.storage_type(), self.dtype.command_suffix()) {
            (Ok(storage), Ok(command)) => (storage, command),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(dtype = %self.dtype, error = %e, "Unsupported conv2d 3x3 precision");
                return Err(e);
            }
        };

        let mut options = BuildOptions::new();
        options
            .define_value(KERNEL_NAME, Self::kernel_name(obfuscate))
            .define_value("DATA_TYPE", storage)
            .define_value("CMD_DATA_TYPE", command)
            .define_value("STRIDE", self.stride);
        if self.has_bias {
            options.define("BIAS");
        }
        if let Some(switch) = activation_switch(self.activation) {
            options.define(switch);
        }
        Ok(options)
    }
}

/// Define selecting the fused activation, none for identity.
fn activation_switch(activation: ActivationKind) -> Option<&'static str> {
    match activation {
        ActivationKind::None => None,
        ActivationKind::Relu => Some("USE_RELU"),
        ActivationKind::ReluX => Some("USE_RELUX"),
        ActivationKind::PRelu => Some("USE_PRELU"),
        ActivationKind::Tanh => Some("USE_TANH"),
        ActivationKind::Sigmoid => Some("USE_SIGMOID"),
    }
}
