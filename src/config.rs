//! Configuration types for background removal jobs

use crate::error::{Result, SegmentError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Phase key the engine uses for its inference stage
pub const INFERENCE_PHASE_KEY: &str = "compute:inference";

/// Configuration for progress synthesis and job orchestration
///
/// All fields have defaults, so a config file only needs the keys it
/// overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Minimum spacing between two applied progress samples (milliseconds)
    pub throttle_window_ms: u64,

    /// Period of the extrapolation timer (milliseconds)
    pub extrapolation_tick_ms: u64,

    /// Wall-clock time over which extrapolation approaches the cap (milliseconds)
    pub extrapolation_horizon_ms: u64,

    /// Highest percentage extrapolation may report (1-99)
    pub extrapolation_cap: u8,

    /// Number of download sub-phases; each one is worth `100 / download_phases` percent
    pub download_phases: u32,

    /// Phase key that marks the inference stage
    pub inference_key: String,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            throttle_window_ms: 1000,
            extrapolation_tick_ms: 1000,
            extrapolation_horizon_ms: 30_000,
            extrapolation_cap: 99,
            download_phases: 6,
            inference_key: INFERENCE_PHASE_KEY.to_string(),
        }
    }
}

impl SegmentConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    ///
    /// ```rust
    /// use bgremove_jobs::SegmentConfig;
    ///
    /// let config = SegmentConfig::builder()
    ///     .throttle_window_ms(250)
    ///     .extrapolation_cap(95)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.extrapolation_cap, 95);
    /// ```
    #[must_use]
    pub fn builder() -> SegmentConfigBuilder {
        SegmentConfigBuilder::default()
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - Zero throttle window, tick period or horizon
    /// - Extrapolation cap outside 1-99
    /// - Zero or more than 100 download phases
    /// - Empty inference key
    pub fn validate(&self) -> Result<()> {
        if self.throttle_window_ms == 0 {
            return Err(SegmentError::config_value_error(
                "throttle window (ms)",
                self.throttle_window_ms,
                ">= 1",
                Some(1000),
            ));
        }

        if self.extrapolation_tick_ms == 0 {
            return Err(SegmentError::config_value_error(
                "extrapolation tick (ms)",
                self.extrapolation_tick_ms,
                ">= 1",
                Some(1000),
            ));
        }

        if self.extrapolation_horizon_ms == 0 {
            return Err(SegmentError::config_value_error(
                "extrapolation horizon (ms)",
                self.extrapolation_horizon_ms,
                ">= 1",
                Some(30_000),
            ));
        }

        if !(1..=99).contains(&self.extrapolation_cap) {
            return Err(SegmentError::config_value_error(
                "extrapolation cap",
                self.extrapolation_cap,
                "1-99",
                Some(99),
            ));
        }

        if !(1..=100).contains(&self.download_phases) {
            return Err(SegmentError::config_value_error(
                "download phases",
                self.download_phases,
                "1-100",
                Some(6),
            ));
        }

        if self.inference_key.trim().is_empty() {
            return Err(SegmentError::invalid_config("inference key must not be empty"));
        }

        Ok(())
    }

    #[must_use]
    pub fn throttle_window(&self) -> Duration {
        Duration::from_millis(self.throttle_window_ms)
    }

    #[must_use]
    pub fn extrapolation_tick(&self) -> Duration {
        Duration::from_millis(self.extrapolation_tick_ms)
    }

    #[must_use]
    pub fn extrapolation_horizon(&self) -> Duration {
        Duration::from_millis(self.extrapolation_horizon_ms)
    }

    /// Percentage one download sub-phase is worth, `floor(100 / download_phases)`
    #[must_use]
    pub fn download_step(&self) -> u8 {
        (100 / self.download_phases.max(1)) as u8
    }

    /// Load and validate a configuration from a JSON file
    ///
    /// # Errors
    /// - File cannot be read
    /// - File is not valid JSON for this structure
    /// - Resulting configuration fails validation
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SegmentError::file_io_error("read config", path, &e))?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "Loaded segment configuration");
        Ok(config)
    }

    /// Default configuration file location
    ///
    /// - Linux: `~/.config/bgremove-jobs/config.json`
    /// - macOS: `~/Library/Application Support/bgremove-jobs/config.json`
    /// - Windows: `%APPDATA%\bgremove-jobs\config.json`
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("bgremove-jobs").join("config.json"))
    }

    /// Load `explicit` if given, otherwise the default file if it exists,
    /// otherwise the built-in defaults
    ///
    /// # Errors
    /// - An explicit or existing default file cannot be loaded
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_json_file(path);
        }
        match Self::default_path() {
            Some(path) if path.is_file() => Self::from_json_file(path),
            _ => Ok(Self::default()),
        }
    }
}

/// Builder for `SegmentConfig`
#[derive(Debug, Default)]
pub struct SegmentConfigBuilder {
    config: SegmentConfig,
}

impl SegmentConfigBuilder {
    #[must_use]
    pub fn throttle_window_ms(mut self, ms: u64) -> Self {
        self.config.throttle_window_ms = ms;
        self
    }

    #[must_use]
    pub fn extrapolation_tick_ms(mut self, ms: u64) -> Self {
        self.config.extrapolation_tick_ms = ms;
        self
    }

    #[must_use]
    pub fn extrapolation_horizon_ms(mut self, ms: u64) -> Self {
        self.config.extrapolation_horizon_ms = ms;
        self
    }

    /// Set the extrapolation cap (clamped to 1-99)
    #[must_use]
    pub fn extrapolation_cap(mut self, cap: u8) -> Self {
        self.config.extrapolation_cap = cap.clamp(1, 99);
        self
    }

    /// Set the number of download sub-phases (clamped to 1-100)
    #[must_use]
    pub fn download_phases(mut self, phases: u32) -> Self {
        self.config.download_phases = phases.clamp(1, 100);
        self
    }

    #[must_use]
    pub fn inference_key<S: Into<String>>(mut self, key: S) -> Self {
        self.config.inference_key = key.into();
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    /// - Configuration validation failures
    pub fn build(self) -> Result<SegmentConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Per-call options forwarded to the removal engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentOptions {
    /// Location the engine should load its model assets from
    pub public_path: Option<String>,
}

impl SegmentOptions {
    #[must_use]
    pub fn with_public_path<S: Into<String>>(mut self, public_path: S) -> Self {
        self.public_path = Some(public_path.into());
        self
    }
}
