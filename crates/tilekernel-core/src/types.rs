//! Tensor descriptors and operator parameter types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TileKernelError};
use crate::memory::SurfaceHandle;

/// Element precision of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// 16-bit floating point.
    Half,
    /// 32-bit floating point.
    Float,
    /// 32-bit signed integer.
    Int32,
    /// 8-bit unsigned integer.
    UInt8,
}

impl DataType {
    /// Kernel storage type name used in the `DATA_TYPE` switch.
    pub fn storage_type(&self) -> Result<&'static str> {
        match self {
            DataType::Float => Ok("float"),
            DataType::Half => Ok("half"),
            other => Err(TileKernelError::UnsupportedDataType(other.to_string())),
        }
    }

    /// Image read/write command suffix used in the `CMD_DATA_TYPE` switch.
    pub fn command_suffix(&self) -> Result<&'static str> {
        match self {
            DataType::Float => Ok("f"),
            DataType::Half => Ok("h"),
            other => Err(TileKernelError::UnsupportedDataType(other.to_string())),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Half => write!(f, "f16"),
            DataType::Float => write!(f, "f32"),
            DataType::Int32 => write!(f, "i32"),
            DataType::UInt8 => write!(f, "u8"),
        }
    }
}

/// Fused activation applied by the kernel after accumulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationKind {
    /// Identity.
    None,
    /// `max(x, 0)`.
    Relu,
    /// `min(max(x, 0), limit)`.
    ReluX,
    /// `x` if positive, `alpha * x` otherwise.
    PRelu,
    /// Hyperbolic tangent.
    Tanh,
    /// Logistic sigmoid.
    Sigmoid,
}

impl ActivationKind {
    /// All supported activations.
    pub const ALL: [ActivationKind; 6] = [
        ActivationKind::None,
        ActivationKind::Relu,
        ActivationKind::ReluX,
        ActivationKind::PRelu,
        ActivationKind::Tanh,
        ActivationKind::Sigmoid,
    ];

    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivationKind::None => "none",
            ActivationKind::Relu => "relu",
            ActivationKind::ReluX => "relux",
            ActivationKind::PRelu => "prelu",
            ActivationKind::Tanh => "tanh",
            ActivationKind::Sigmoid => "sigmoid",
        }
    }

    /// Numeric code used by serialized operator graphs.
    pub fn code(&self) -> u32 {
        match self {
            ActivationKind::None => 0,
            ActivationKind::Relu => 1,
            ActivationKind::ReluX => 2,
            ActivationKind::PRelu => 3,
            ActivationKind::Tanh => 4,
            ActivationKind::Sigmoid => 5,
        }
    }
}

impl fmt::Display for ActivationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivationKind {
    type Err = TileKernelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "noop" => Ok(ActivationKind::None),
            "relu" => Ok(ActivationKind::Relu),
            "relux" => Ok(ActivationKind::ReluX),
            "prelu" => Ok(ActivationKind::PRelu),
            "tanh" => Ok(ActivationKind::Tanh),
            "sigmoid" => Ok(ActivationKind::Sigmoid),
            _ => Err(TileKernelError::UnsupportedActivation(s.to_string())),
        }
    }
}

impl TryFrom<u32> for ActivationKind {
    type Error = TileKernelError;

    fn try_from(code: u32) -> Result<Self> {
        ActivationKind::ALL
            .into_iter()
            .find(|a| a.code() == code)
            .ok_or_else(|| TileKernelError::UnsupportedActivation(format!("code {}", code)))
    }
}

/// Parameters of a 2D convolution, excluding the stride.
///
/// `padding` holds the total padding per spatial axis (both sides summed);
/// kernels consume `padding / 2` as the leading-edge offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conv2dParams {
    /// Total padding along height and width.
    pub padding: [i32; 2],
    /// Dilation along height and width.
    pub dilations: [i32; 2],
    /// Fused activation.
    pub activation: ActivationKind,
    /// Upper clip for [`ActivationKind::ReluX`].
    pub relux_max_limit: f32,
    /// Negative slope for [`ActivationKind::PRelu`].
    pub prelu_alpha: f32,
}

impl Default for Conv2dParams {
    fn default() -> Self {
        Self {
            padding: [0, 0],
            dilations: [1, 1],
            activation: ActivationKind::None,
            relux_max_limit: 0.0,
            prelu_alpha: 0.0,
        }
    }
}

impl Conv2dParams {
    /// Builder method to set total padding.
    #[must_use]
    pub fn with_padding(mut self, padding: [i32; 2]) -> Self {
        self.padding = padding;
        self
    }

    /// Builder method to set dilations.
    #[must_use]
    pub fn with_dilations(mut self, dilations: [i32; 2]) -> Self {
        self.dilations = dilations;
        self
    }

    /// Builder method to set the activation.
    #[must_use]
    pub fn with_activation(mut self, activation: ActivationKind) -> Self {
        self.activation = activation;
        self
    }

    /// Builder method to set the ReluX clip limit.
    #[must_use]
    pub fn with_relux_max_limit(mut self, limit: f32) -> Self {
        self.relux_max_limit = limit;
        self
    }

    /// Builder method to set the PRelu slope.
    #[must_use]
    pub fn with_prelu_alpha(mut self, alpha: f32) -> Self {
        self.prelu_alpha = alpha;
        self
    }
}

/// Shape, precision and device storage of a tensor.
///
/// Image tensors are NHWC; the last dimension is always channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorDesc {
    shape: Vec<usize>,
    dtype: DataType,
    surface: SurfaceHandle,
}

impl TensorDesc {
    /// Create a descriptor.
    pub fn new(shape: impl Into<Vec<usize>>, dtype: DataType, surface: SurfaceHandle) -> Self {
        Self {
            shape: shape.into(),
            dtype,
            surface,
        }
    }

    /// Create an NHWC descriptor.
    pub fn nhwc(
        batch: usize,
        height: usize,
        width: usize,
        channels: usize,
        dtype: DataType,
        surface: SurfaceHandle,
    ) -> Self {
        Self::new(vec![batch, height, width, channels], dtype, surface)
    }

    /// Full shape.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Extent of dimension `index`, zero when out of range.
    pub fn dim(&self, index: usize) -> usize {
        self.shape.get(index).copied().unwrap_or(0)
    }

    /// Element precision.
    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    /// Backing device surface.
    pub fn surface(&self) -> SurfaceHandle {
        self.surface
    }

    /// Batch extent of an NHWC tensor.
    pub fn batch(&self) -> usize {
        self.dim(0)
    }

    /// Height extent of an NHWC tensor.
    pub fn height(&self) -> usize {
        self.dim(1)
    }

    /// Width extent of an NHWC tensor.
    pub fn width(&self) -> usize {
        self.dim(2)
    }

    /// Channel extent (last dimension).
    pub fn channels(&self) -> usize {
        self.shape.last().copied().unwrap_or(0)
    }
}
