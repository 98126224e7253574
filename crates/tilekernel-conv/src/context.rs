//! Dispatch context shared by convolution calls.

use std::sync::Arc;

use tilekernel_core::config::{ProgramConfig, TileKernelConfig};
use tilekernel_core::error::Result;
use tilekernel_core::runtime::KernelRuntime;

use crate::tuning::{KernelTuner, LaunchTuner};

/// Runtime, tuner and program settings used by every dispatch.
///
/// Created once by the owner of the device and shared read-only.
#[derive(Clone)]
pub struct DispatchContext {
    runtime: Arc<dyn KernelRuntime>,
    tuner: Arc<dyn LaunchTuner>,
    program: ProgramConfig,
}

impl DispatchContext {
    /// Create a context from explicit collaborators.
    pub fn new(runtime: Arc<dyn KernelRuntime>, tuner: Arc<dyn LaunchTuner>) -> Self {
        Self {
            runtime,
            tuner,
            program: ProgramConfig::default(),
        }
    }

    /// Builds a context with a [`KernelTuner`] configured from `config`.
    pub fn from_config(runtime: Arc<dyn KernelRuntime>, config: &TileKernelConfig) -> Result<Self> {
        config.validate()?;
        let tuner = KernelTuner::from_config(runtime.clone(), &config.tuning)?;
        Ok(Self::new(runtime, Arc::new(tuner)).with_program_config(config.program.clone()))
    }

    /// Builder method to set program options.
    #[must_use]
    pub fn with_program_config(mut self, program: ProgramConfig) -> Self {
        self.program = program;
        self
    }

    /// Accelerator runtime.
    pub fn runtime(&self) -> &dyn KernelRuntime {
        self.runtime.as_ref()
    }

    /// Launch tuner.
    pub fn tuner(&self) -> &dyn LaunchTuner {
        self.tuner.as_ref()
    }

    /// Whether kernels are exported under digest-derived names.
    pub fn obfuscate_symbols(&self) -> bool {
        self.program.obfuscate_symbols
    }
}

impl std::fmt::Debug for DispatchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchContext")
            .field("program", &self.program)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilekernel_core::config::TuningMode;
    use tilekernel_core::sim::SimRuntime;

    #[test]
    fn test_from_config_carries_program_options() {
        let config = TileKernelConfig::default()
            .with_tuning_mode(TuningMode::Off)
            .with_obfuscated_symbols(true);
        let ctx = DispatchContext::from_config(Arc::new(SimRuntime::new()), &config).unwrap();
        assert!(ctx.obfuscate_symbols());
        assert!(format!("{:?}", ctx).contains("obfuscate_symbols: true"));
    }

    #[test]
    fn test_from_config_rejects_invalid() {
        let mut config = TileKernelConfig::default();
        config.tuning.runs_per_candidate = 0;
        let err = DispatchContext::from_config(Arc::new(SimRuntime::new()), &config).unwrap_err();
        assert!(err.is_fatal());
    }
}
