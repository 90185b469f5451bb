//! Python bindings (feature `python`).

use std::sync::OnceLock;

use numpy::{PyArray1, PyReadonlyArray2};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::config::{BackendConfig, EstimationConfig};
use crate::engine::RaschEngine;
use crate::erm::ErmBackend;
use crate::estimator::{FallbackEstimator, RaschEstimator};
use crate::jmle::JmleEstimator;
use crate::matrix::{ResponseMatrix, StudentRecord};
use crate::scoring::GradeScheme;

/// Probed on first use and shared by every later call.
static ERM_BACKEND: OnceLock<Option<ErmBackend>> = OnceLock::new();

fn erm_backend() -> Option<ErmBackend> {
    ERM_BACKEND
        .get_or_init(|| {
            ErmBackend::probe(&BackendConfig::default(), &EstimationConfig::default())
                .map_err(|err| log::warn!("external backend disabled: {err}"))
                .ok()
        })
        .clone()
}

fn value_error(err: impl std::fmt::Display) -> PyErr {
    PyValueError::new_err(err.to_string())
}

/// Fit the Rasch model with JMLE.
///
/// Returns `(theta, beta, se_theta, se_beta, iterations, converged)`.
#[pyfunction]
#[pyo3(signature = (responses, max_iter=100, tol=1e-6, lambda=0.05))]
#[allow(clippy::type_complexity)]
pub fn fit_rasch<'py>(
    py: Python<'py>,
    responses: PyReadonlyArray2<i32>,
    max_iter: usize,
    tol: f64,
    lambda: f64,
) -> PyResult<(
    Bound<'py, PyArray1<f64>>,
    Bound<'py, PyArray1<f64>>,
    Bound<'py, PyArray1<f64>>,
    Bound<'py, PyArray1<f64>>,
    usize,
    bool,
)> {
    let matrix = ResponseMatrix::from_array(responses.as_array()).map_err(value_error)?;
    let config = EstimationConfig {
        max_iter,
        tolerance: tol,
        lambda,
        ..EstimationConfig::default()
    };
    config.validate().map_err(value_error)?;
    let estimator = JmleEstimator::new(config);

    let fit = py.detach(|| estimator.fit(&matrix)).map_err(value_error)?;

    Ok((
        PyArray1::from_vec(py, fit.theta),
        PyArray1::from_vec(py, fit.beta),
        PyArray1::from_vec(py, fit.se_theta),
        PyArray1::from_vec(py, fit.se_beta),
        fit.iterations,
        fit.converged,
    ))
}

/// Score a cohort: one dict per student plus a summary dict.
#[pyfunction]
#[pyo3(signature = (ids, responses, scheme="letter", use_backend=true))]
pub fn score_students<'py>(
    py: Python<'py>,
    ids: Vec<String>,
    responses: PyReadonlyArray2<i32>,
    scheme: &str,
    use_backend: bool,
) -> PyResult<(Vec<Bound<'py, PyDict>>, Bound<'py, PyDict>)> {
    let grading = GradeScheme::preset(scheme)
        .ok_or_else(|| PyValueError::new_err(format!("unknown grading scheme `{scheme}`")))?;
    let matrix = ResponseMatrix::from_array(responses.as_array()).map_err(value_error)?;
    if ids.len() != matrix.n_students() {
        return Err(PyValueError::new_err(format!(
            "{} ids for {} response rows",
            ids.len(),
            matrix.n_students()
        )));
    }

    let records: Vec<StudentRecord> = ids
        .into_iter()
        .enumerate()
        .map(|(i, id)| StudentRecord::new(id, matrix.row(i).iter().map(|&x| x == 1).collect()))
        .collect();

    let primary = if use_backend {
        erm_backend().map(|b| Box::new(b) as Box<dyn RaschEstimator>)
    } else {
        None
    };
    let engine = RaschEngine::with_estimator(FallbackEstimator::new(
        primary,
        Box::new(JmleEstimator::default()),
    ))
    .with_grading(grading);

    let result = py.detach(|| engine.estimate(&records)).map_err(value_error)?;

    let mut students = Vec::with_capacity(result.students.len());
    for s in &result.students {
        let d = PyDict::new(py);
        d.set_item("id", &s.id)?;
        d.set_item("correct_count", s.correct_count)?;
        d.set_item("total", s.total)?;
        d.set_item("percentage", s.percentage)?;
        d.set_item("ability", s.ability)?;
        d.set_item("ability_se", s.ability_se)?;
        d.set_item("t_score", s.t_score)?;
        d.set_item("grade", &s.grade)?;
        d.set_item("infit", s.infit)?;
        d.set_item("outfit", s.outfit)?;
        students.push(d);
    }

    let summary = &result.summary;
    let items = summary
        .items
        .iter()
        .map(|item| {
            let d = PyDict::new(py);
            d.set_item("difficulty", item.difficulty)?;
            d.set_item("se", item.se)?;
            d.set_item("p_value", item.p_value)?;
            d.set_item("infit", item.infit)?;
            d.set_item("outfit", item.outfit)?;
            Ok(d)
        })
        .collect::<PyResult<Vec<_>>>()?;

    let s = PyDict::new(py);
    s.set_item("n_students", summary.n_students)?;
    s.set_item("n_items", summary.n_items)?;
    s.set_item("mean_ability", summary.mean_ability)?;
    s.set_item("std_ability", summary.std_ability)?;
    s.set_item("mean_t_score", summary.mean_t_score)?;
    s.set_item("mean_percentage", summary.mean_percentage)?;
    s.set_item("min_ability", summary.min_ability)?;
    s.set_item("max_ability", summary.max_ability)?;
    s.set_item("item_difficulties", summary.item_difficulties.clone())?;
    s.set_item("items", items)?;

    Ok((students, s))
}

pub fn register(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(fit_rasch, m)?)?;
    m.add_function(wrap_pyfunction!(score_students, m)?)?;
    Ok(())
}
