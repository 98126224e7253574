//! Dispatch configuration.
//!
//! Loaded from TOML and `TILEKERNEL_`-prefixed environment variables through
//! the `config` crate. The prefix is followed by a single underscore and
//! nested keys use a double underscore, e.g. `TILEKERNEL_TUNING__MODE=tune`.
//!
//! ```toml
//! [tuning]
//! mode = "tune"
//! limit_kernel_time = true
//! store_path = "/data/local/tmp/tuned.json"
//!
//! [program]
//! obfuscate_symbols = true
//! ```

use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TileKernelError};

/// How launch parameters are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TuningMode {
    /// Always launch with the kernel's default local size.
    Off,
    /// Launch with a previously tuned local size when one is stored.
    #[default]
    Replay,
    /// Measure candidate local sizes and record the fastest.
    Tune,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TileKernelConfig {
    /// Launch tuning.
    #[serde(default)]
    pub tuning: TuningConfig,

    /// Program building.
    #[serde(default)]
    pub program: ProgramConfig,
}

/// Launch tuning configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningConfig {
    /// Tuning mode.
    #[serde(default)]
    pub mode: TuningMode,

    /// Split long launches into partitions along the third dimension.
    #[serde(default)]
    pub limit_kernel_time: bool,

    /// Target upper bound for a single launch, in microseconds.
    #[serde(default = "default_max_kernel_time_us")]
    pub max_kernel_time_us: u64,

    /// Timed runs per candidate during a search.
    #[serde(default = "default_runs_per_candidate")]
    pub runs_per_candidate: u32,

    /// Location of the persisted tuning store.
    #[serde(default)]
    pub store_path: Option<PathBuf>,
}

fn default_max_kernel_time_us() -> u64 {
    1000
}

fn default_runs_per_candidate() -> u32 {
    2
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            mode: TuningMode::default(),
            limit_kernel_time: false,
            max_kernel_time_us: default_max_kernel_time_us(),
            runs_per_candidate: default_runs_per_candidate(),
            store_path: None,
        }
    }
}

/// Program building configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgramConfig {
    /// Export kernels under digest-derived names.
    #[serde(default)]
    pub obfuscate_symbols: bool,
}

impl TileKernelConfig {
    /// Load configuration from a TOML file with environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let builder = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(env_source());

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self> {
        let builder = Config::builder().add_source(env_source());

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.tuning.max_kernel_time_us == 0 {
            return Err(TileKernelError::InvalidConfig(
                "tuning.max_kernel_time_us must be positive".to_string(),
            ));
        }
        if self.tuning.runs_per_candidate == 0 {
            return Err(TileKernelError::InvalidConfig(
                "tuning.runs_per_candidate must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Builder method to set the tuning mode.
    #[must_use]
    pub fn with_tuning_mode(mut self, mode: TuningMode) -> Self {
        self.tuning.mode = mode;
        self
    }

    /// Builder method to enable launch partitioning.
    #[must_use]
    pub fn with_kernel_time_limit(mut self, max_kernel_time_us: u64) -> Self {
        self.tuning.limit_kernel_time = true;
        self.tuning.max_kernel_time_us = max_kernel_time_us;
        self
    }

    /// Builder method to set the tuning store location.
    #[must_use]
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.tuning.store_path = Some(path.into());
        self
    }

    /// Builder method to enable symbol obfuscation.
    #[must_use]
    pub fn with_obfuscated_symbols(mut self, enabled: bool) -> Self {
        self.program.obfuscate_symbols = enabled;
        self
    }
}

/// Environment overrides: `TILEKERNEL_<SECTION>__<KEY>`.
fn env_source() -> Environment {
    Environment::with_prefix("TILEKERNEL")
        .prefix_separator("_")
        .separator("__")
}

/// Load configuration from a file path.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<TileKernelConfig> {
    TileKernelConfig::load(path)
}

/// Load configuration from a TOML string.
pub fn load_config_from_str(content: &str) -> Result<TileKernelConfig> {
    let builder = Config::builder()
        .add_source(File::from_str(content, FileFormat::Toml))
        .add_source(env_source());

    let config: TileKernelConfig = builder.build()?.try_deserialize()?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = TileKernelConfig::default();
        assert_eq!(config.tuning.mode, TuningMode::Replay);
        assert!(!config.tuning.limit_kernel_time);
        assert_eq!(config.tuning.max_kernel_time_us, 1000);
        assert_eq!(config.tuning.runs_per_candidate, 2);
        assert!(config.tuning.store_path.is_none());
        assert!(!config.program.obfuscate_symbols);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_str() {
        let toml = r#"
            [tuning]
            mode = "tune"
            limit_kernel_time = true
            max_kernel_time_us = 500

            [program]
            obfuscate_symbols = true
        "#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.tuning.mode, TuningMode::Tune);
        assert!(config.tuning.limit_kernel_time);
        assert_eq!(config.tuning.max_kernel_time_us, 500);
        assert_eq!(config.tuning.runs_per_candidate, 2);
        assert!(config.program.obfuscate_symbols);
    }

    #[test]
    fn test_invalid_mode_is_configuration_error() {
        let err = load_config_from_str("[tuning]\nmode = \"sometimes\"\n").unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_validation_rejects_zero_runs() {
        let err = load_config_from_str("[tuning]\nruns_per_candidate = 0\n").unwrap_err();
        assert!(matches!(err, TileKernelError::InvalidConfig(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[tuning]\nmode = \"off\"\nstore_path = \"/tmp/tuned.json\"").unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.tuning.mode, TuningMode::Off);
        assert_eq!(
            config.tuning.store_path.as_deref(),
            Some(Path::new("/tmp/tuned.json"))
        );
    }

    #[test]
    fn test_env_overrides_use_single_underscore_prefix() {
        let mut vars = config::Map::new();
        vars.insert("TILEKERNEL_TUNING__MODE".to_string(), "tune".to_string());
        vars.insert(
            "TILEKERNEL_TUNING__STORE_PATH".to_string(),
            "/tmp/env_tuned.json".to_string(),
        );
        vars.insert(
            "TILEKERNEL_PROGRAM__OBFUSCATE_SYMBOLS".to_string(),
            "true".to_string(),
        );

        let config: TileKernelConfig = Config::builder()
            .add_source(File::from_str("[tuning]\nmode = \"replay\"\n", FileFormat::Toml))
            .add_source(env_source().source(Some(vars)))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.tuning.mode, TuningMode::Tune);
        assert_eq!(
            config.tuning.store_path.as_deref(),
            Some(Path::new("/tmp/env_tuned.json"))
        );
        assert!(config.program.obfuscate_symbols);
    }

    #[test]
    fn test_builder_methods() {
        let config = TileKernelConfig::default()
            .with_tuning_mode(TuningMode::Tune)
            .with_kernel_time_limit(250)
            .with_store_path("/tmp/store.json")
            .with_obfuscated_symbols(true);
        assert_eq!(config.tuning.mode, TuningMode::Tune);
        assert!(config.tuning.limit_kernel_time);
        assert_eq!(config.tuning.max_kernel_time_us, 250);
        assert!(config.program.obfuscate_symbols);
    }
}
