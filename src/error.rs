//! Error taxonomy for matrix construction, estimation and configuration.
//!
//! Shape problems ([`MatrixError`]) are rejected immediately. Backend
//! failures ([`BackendError`]) never leave the estimator chain: they are
//! logged and the internal JMLE path takes over. Only when every estimator
//! fails does the caller see [`RaschError::EstimationFailed`].

use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide result alias for the public entry points.
pub type Result<T> = std::result::Result<T, RaschError>;

/// Input-shape errors raised while building a response matrix.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatrixError {
    #[error("response matrix is empty ({n_students} students x {n_items} items)")]
    EmptyInput { n_students: usize, n_items: usize },

    #[error("row {row} has {found} responses, expected {expected}")]
    RaggedMatrix {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("response at row {row}, column {col} is {value}; only 0 and 1 are allowed")]
    InvalidValue { row: usize, col: usize, value: i64 },
}

/// Failures of the external estimation backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("estimation backend unavailable: {0}")]
    Unavailable(String),

    #[error("failed to launch backend process: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("failed to marshal data for the backend: {0}")]
    Marshal(String),

    #[error("backend did not finish within {secs}s")]
    Timeout { secs: u64 },

    #[error("backend reported a failed fit: {0}")]
    Failed(String),

    #[error("backend returned malformed output: {0}")]
    Malformed(String),
}

/// Failure of a single estimator.
#[derive(Debug, Error)]
pub enum EstimationError {
    #[error("non-finite {what} at index {index}")]
    NonFinite { what: &'static str, index: usize },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Errors surfaced to callers of the engine.
#[derive(Debug, Error)]
pub enum RaschError {
    #[error(transparent)]
    Matrix(#[from] MatrixError),

    #[error("estimation failed: {primary}; fallback also failed: {fallback}")]
    EstimationFailed {
        primary: EstimationError,
        fallback: EstimationError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("estimation did not finish within {millis}ms")]
    Timeout { millis: u64 },

    #[error("estimation worker exited without reporting a result")]
    WorkerLost,
}

impl RaschError {
    /// Returns `true` for errors caused by the shape of the caller's input,
    /// which a retry with the same data cannot fix.
    pub fn is_input_error(&self) -> bool {
        matches!(self, RaschError::Matrix(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_errors_are_input_errors() {
        let err: RaschError = MatrixError::EmptyInput {
            n_students: 0,
            n_items: 4,
        }
        .into();
        assert!(err.is_input_error());
        assert!(err.to_string().contains("0 students"));
    }

    #[test]
    fn estimation_failure_reports_both_causes() {
        let err = RaschError::EstimationFailed {
            primary: BackendError::Unavailable("Rscript not found".into()).into(),
            fallback: EstimationError::NonFinite {
                what: "theta",
                index: 2,
            },
        };
        assert!(!err.is_input_error());
        let msg = err.to_string();
        assert!(msg.contains("Rscript not found"));
        assert!(msg.contains("theta at index 2"));
    }
}
