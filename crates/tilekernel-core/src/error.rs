//! Error types for kernel dispatch.
//!
//! Every error belongs to one of three kinds. Configuration errors are fatal:
//! the request named a variant that cannot be specialized and retrying cannot
//! help. Resource errors come from the runtime or the tuning store and may be
//! answered by falling back to another implementation. Shape errors reject
//! tensors that do not fit together before any argument is bound.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for dispatch operations.
pub type Result<T> = std::result::Result<T, TileKernelError>;

/// Coarse classification of a [`TileKernelError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unsupported variant or invalid configuration. Never retried.
    Configuration,
    /// Compilation, launch, surface or store failure. Caller may fall back.
    Resource,
    /// Tensors or arguments that do not match the kernel's expectations.
    Shape,
}

/// Dispatch errors.
#[derive(Debug, Error)]
pub enum TileKernelError {
    /// Activation name or code outside the supported set.
    #[error("Unsupported activation: {0}")]
    UnsupportedActivation(String),

    /// Element precision without a kernel type mapping.
    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),

    /// Stride the kernel family was not built for.
    #[error("Unsupported stride {stride} for kernel {kernel}")]
    UnsupportedStride {
        /// Kernel name.
        kernel: &'static str,
        /// Requested stride.
        stride: u32,
    },

    /// Invalid configuration value or unreadable configuration file.
    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    /// Program compilation failed.
    #[error("Failed to compile {kernel} in {program}: {reason}")]
    CompilationFailed {
        /// Program (source) name.
        program: String,
        /// Kernel entry point.
        kernel: String,
        /// Compiler diagnostic.
        reason: String,
    },

    /// Kernel enqueue failed.
    #[error("Launch failed: {0}")]
    LaunchFailed(String),

    /// Device surface is missing or was released.
    #[error("Device surface error: {0}")]
    SurfaceError(String),

    /// Tuning store could not be read or written.
    #[error("Tuning store error at {path}: {reason}")]
    TuningStore {
        /// Store location.
        path: PathBuf,
        /// Underlying failure.
        reason: String,
    },

    /// Tensor has the wrong number of dimensions.
    #[error("Tensor {tensor} must have rank {expected}, got {actual}")]
    RankMismatch {
        /// Tensor role.
        tensor: &'static str,
        /// Expected rank.
        expected: usize,
        /// Actual rank.
        actual: usize,
    },

    /// Two tensors disagree on a dimension.
    #[error("Shape mismatch on {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// Which dimension was compared.
        what: String,
        /// Expected extent.
        expected: usize,
        /// Actual extent.
        actual: usize,
    },

    /// Any other malformed argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Bound argument list does not match the compiled kernel's parameters.
    #[error("Kernel {kernel} expects {expected} arguments, got {actual}")]
    ArgumentCountMismatch {
        /// Kernel name.
        kernel: String,
        /// Parameter count reported by the program.
        expected: usize,
        /// Arguments supplied.
        actual: usize,
    },

    /// Argument at `index` is not the parameter the kernel declares there.
    #[error("Kernel {kernel} argument {index}: expected `{expected}`, got `{actual}`")]
    ArgumentNameMismatch {
        /// Kernel name.
        kernel: String,
        /// Slot index.
        index: usize,
        /// Declared parameter name.
        expected: String,
        /// Supplied argument name.
        actual: String,
    },
}

impl TileKernelError {
    /// Returns the error classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TileKernelError::UnsupportedActivation(_)
            | TileKernelError::UnsupportedDataType(_)
            | TileKernelError::UnsupportedStride { .. }
            | TileKernelError::InvalidConfig(_) => ErrorKind::Configuration,
            TileKernelError::CompilationFailed { .. }
            | TileKernelError::LaunchFailed(_)
            | TileKernelError::SurfaceError(_)
            | TileKernelError::TuningStore { .. } => ErrorKind::Resource,
            TileKernelError::RankMismatch { .. }
            | TileKernelError::ShapeMismatch { .. }
            | TileKernelError::InvalidArgument(_)
            | TileKernelError::ArgumentCountMismatch { .. }
            | TileKernelError::ArgumentNameMismatch { .. } => ErrorKind::Shape,
        }
    }

    /// Whether the error is a fatal configuration error.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }

    /// Whether a caller may retry with a fallback implementation.
    pub fn is_recoverable(&self) -> bool {
        self.kind() == ErrorKind::Resource
    }
}

impl From<config::ConfigError> for TileKernelError {
    fn from(err: config::ConfigError) -> Self {
        TileKernelError::InvalidConfig(err.to_string())
    }
}
