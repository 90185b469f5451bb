//! Engine configuration.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration:
//!
//! ```toml
//! grading = "descriptive"
//!
//! [estimation]
//! max_iter = 100
//! tolerance = 1e-6
//! lambda = 0.05
//!
//! [backend]
//! enabled = false
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::scoring::GradeScheme;
use crate::utils::{ABILITY_BOUND, LOGIT_CLAMP};

/// Settings for the internal JMLE estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimationConfig {
    /// Hard cap on Newton-Raphson sweeps.
    pub max_iter: usize,
    /// Convergence threshold on the largest parameter update in a sweep.
    pub tolerance: f64,
    /// L2 penalty on abilities and difficulties.
    pub lambda: f64,
    /// Abilities and difficulties are clamped to `[-bound, bound]`.
    pub ability_bound: f64,
    /// Magnitude limit applied to `θ - β` before the sigmoid.
    pub logit_clamp: f64,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            max_iter: 100,
            tolerance: 1e-6,
            lambda: 0.05,
            ability_bound: ABILITY_BOUND,
            logit_clamp: LOGIT_CLAMP,
        }
    }
}

impl EstimationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iter == 0 {
            return Err(invalid("estimation.max_iter", "must be greater than zero"));
        }
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(invalid("estimation.tolerance", "must be positive and finite"));
        }
        if !self.lambda.is_finite() || self.lambda < 0.0 {
            return Err(invalid("estimation.lambda", "must be non-negative and finite"));
        }
        if !self.ability_bound.is_finite() || self.ability_bound <= 0.0 {
            return Err(invalid("estimation.ability_bound", "must be positive and finite"));
        }
        if !self.logit_clamp.is_finite() || self.logit_clamp <= 0.0 {
            return Err(invalid("estimation.logit_clamp", "must be positive and finite"));
        }
        Ok(())
    }
}

/// Settings for the external eRm backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// When false the backend is never probed and JMLE is used directly.
    pub enabled: bool,
    /// `Rscript` executable, resolved through `PATH` when relative.
    pub rscript: PathBuf,
    /// Wall-clock limit for the probe and for each fit.
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rscript: PathBuf::from("Rscript"),
            timeout_secs: 30,
        }
    }
}

impl BackendConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.timeout_secs == 0 {
            return Err(invalid("backend.timeout_secs", "must be greater than zero"));
        }
        if self.enabled && self.rscript.as_os_str().is_empty() {
            return Err(invalid("backend.rscript", "must not be empty"));
        }
        Ok(())
    }
}

/// Top-level configuration for [`crate::engine::RaschEngine`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub estimation: EstimationConfig,
    pub backend: BackendConfig,
    pub grading: GradeScheme,
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.estimation.validate()?;
        self.backend.validate()
    }

    /// Configuration that never touches the external backend.
    pub fn internal_only() -> Self {
        Self {
            backend: BackendConfig {
                enabled: false,
                ..BackendConfig::default()
            },
            ..Self::default()
        }
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}
