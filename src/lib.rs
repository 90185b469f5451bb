//! Rasch model estimation and scoring.
//!
//! This crate turns a matrix of correct/incorrect answers into:
//! - Person abilities and item difficulties on the logit scale (JMLE, or
//!   conditional ML through R's eRm package when it is installed)
//! - Standard errors and infit/outfit fit statistics
//! - T-scores and grades from a configurable threshold table
//!
//! [`engine::RaschEngine`] is the entry point; everything else is exposed
//! for callers that need a single stage.

#[cfg(feature = "python")]
use pyo3::prelude::*;

pub mod utils;

pub mod config;
pub mod engine;
pub mod erm;
pub mod error;
pub mod estimator;
pub mod fit;
pub mod jmle;
pub mod matrix;
pub mod scoring;
pub mod simulation;

#[cfg(feature = "python")]
pub mod python;

pub use config::EngineConfig;
pub use engine::{EstimationResult, RaschEngine, spawn_estimate};
pub use error::{RaschError, Result};
pub use matrix::{ResponseMatrix, StudentRecord};
pub use scoring::GradeScheme;

/// Python module for rasch_rs
#[cfg(feature = "python")]
#[pymodule]
fn rasch_rs(m: &Bound<'_, PyModule>) -> PyResult<()> {
    python::register(m)?;
    Ok(())
}
