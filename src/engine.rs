//! Result aggregation: the single entry point callers use.
//!
//! [`RaschEngine::estimate`] builds the response matrix, runs the estimator
//! chain, standardizes abilities into T-scores, grades them and attaches
//! fit statistics. Backend failures are absorbed by the chain; callers see
//! only input-shape errors or [`RaschError::EstimationFailed`].

use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use serde::Serialize;

use crate::config::EngineConfig;
use crate::erm::ErmBackend;
use crate::error::{RaschError, Result};
use crate::estimator::{FallbackEstimator, RaschEstimator};
use crate::fit::{item_fit, person_fit};
use crate::jmle::JmleEstimator;
use crate::matrix::{ResponseMatrix, StudentRecord};
use crate::scoring::{GradeScheme, t_scores};
use crate::utils::{LOGIT_CLAMP, mean, population_std};

/// Per-student outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentResult {
    pub id: String,
    pub correct_count: usize,
    pub total: usize,
    pub percentage: f64,
    pub ability: f64,
    /// Infinite (serialized as `null`) for students pinned to the boundary.
    pub ability_se: f64,
    pub t_score: f64,
    pub grade: String,
    pub infit: f64,
    pub outfit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemSummary {
    pub difficulty: f64,
    pub se: f64,
    /// Proportion of students answering correctly.
    pub p_value: f64,
    pub infit: f64,
    pub outfit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    pub n_students: usize,
    pub n_items: usize,
    /// Mean over every student. Estimable abilities are centered on 0 but
    /// zero and perfect scores stay at the boundary, so this is non-zero
    /// when those are unbalanced, e.g. one perfect score and no zero.
    pub mean_ability: f64,
    pub std_ability: f64,
    pub mean_t_score: f64,
    pub mean_percentage: f64,
    pub min_ability: f64,
    pub max_ability: f64,
    pub item_difficulties: Vec<f64>,
    pub items: Vec<ItemSummary>,
}

/// Everything one fit produces. Built fresh per call and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EstimationResult {
    pub students: Vec<StudentResult>,
    pub summary: GroupSummary,
}

impl EstimationResult {
    /// Students by descending T-score; ties keep input order.
    pub fn ranked(&self) -> Vec<&StudentResult> {
        let mut ranked: Vec<&StudentResult> = self.students.iter().collect();
        ranked.sort_by(|a, b| b.t_score.total_cmp(&a.t_score));
        ranked
    }
}

#[derive(Debug)]
pub struct RaschEngine {
    estimator: FallbackEstimator,
    grading: GradeScheme,
    logit_clamp: f64,
}

impl RaschEngine {
    /// Validate `config` and assemble the estimator chain.
    ///
    /// When the backend is enabled it is probed here, once; a failed probe
    /// is logged and the engine runs on JMLE alone.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let primary: Option<Box<dyn RaschEstimator>> = if config.backend.enabled {
            match ErmBackend::probe(&config.backend, &config.estimation) {
                Ok(backend) => Some(Box::new(backend)),
                Err(err) => {
                    log::warn!("external backend disabled: {err}");
                    None
                }
            }
        } else {
            None
        };
        let fallback = Box::new(JmleEstimator::new(config.estimation.clone()));
        Ok(Self {
            estimator: FallbackEstimator::new(primary, fallback),
            grading: config.grading,
            logit_clamp: config.estimation.logit_clamp,
        })
    }

    /// Engine around an explicit estimator chain, letter grades.
    pub fn with_estimator(estimator: FallbackEstimator) -> Self {
        Self {
            estimator,
            grading: GradeScheme::default(),
            logit_clamp: LOGIT_CLAMP,
        }
    }

    pub fn with_grading(mut self, grading: GradeScheme) -> Self {
        self.grading = grading;
        self
    }

    pub fn has_external_backend(&self) -> bool {
        self.estimator.has_primary()
    }

    pub fn estimate(&self, records: &[StudentRecord]) -> Result<EstimationResult> {
        let (ids, responses) = ResponseMatrix::from_records(records)?;
        self.estimate_matrix(ids, &responses)
    }

    /// `ids` has one entry per row of `responses`.
    fn estimate_matrix(
        &self,
        ids: Vec<String>,
        responses: &ResponseMatrix,
    ) -> Result<EstimationResult> {
        let fit = self.estimator.fit(responses)?;
        let n_students = responses.n_students();
        let n_items = responses.n_items();

        let mean_ability = mean(&fit.theta);
        let std_ability = population_std(&fit.theta);
        let t = t_scores(&fit.theta, mean_ability, std_ability);

        let model_theta = fit.model_abilities(&responses.extreme_students());
        let persons = person_fit(responses, &model_theta, &fit.beta, self.logit_clamp);
        let item_stats = item_fit(responses, &model_theta, &fit.beta, self.logit_clamp);

        let students: Vec<StudentResult> = ids
            .into_iter()
            .zip(responses.row_scores())
            .enumerate()
            .map(|(i, (id, correct_count))| StudentResult {
                id,
                correct_count,
                total: n_items,
                percentage: 100.0 * correct_count as f64 / n_items as f64,
                ability: fit.theta[i],
                ability_se: fit.se_theta[i],
                t_score: t[i],
                grade: self.grading.classify(t[i]).to_string(),
                infit: persons[i].infit,
                outfit: persons[i].outfit,
            })
            .collect();

        let items = responses
            .item_scores()
            .into_iter()
            .enumerate()
            .map(|(j, correct)| ItemSummary {
                difficulty: fit.beta[j],
                se: fit.se_beta[j],
                p_value: correct as f64 / n_students as f64,
                infit: item_stats[j].infit,
                outfit: item_stats[j].outfit,
            })
            .collect();

        let percentages: Vec<f64> = students.iter().map(|s| s.percentage).collect();
        let summary = GroupSummary {
            n_students,
            n_items,
            mean_ability,
            std_ability,
            mean_t_score: mean(&t),
            mean_percentage: mean(&percentages),
            min_ability: fit.theta.iter().copied().fold(f64::INFINITY, f64::min),
            max_ability: fit.theta.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            item_difficulties: fit.beta.clone(),
            items,
        };

        log::debug!(
            "scored {n_students} students on {n_items} items: mean T {:.2}, std θ {:.3}",
            summary.mean_t_score,
            std_ability
        );

        Ok(EstimationResult { students, summary })
    }
}

/// Run [`RaschEngine::estimate`] on a worker thread and wait at most
/// `timeout` for it.
///
/// A timed out computation keeps running in the background but its result
/// is discarded.
pub fn spawn_estimate(
    engine: Arc<RaschEngine>,
    records: Vec<StudentRecord>,
    timeout: Duration,
) -> Result<EstimationResult> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("rasch-estimate".to_string())
        .spawn(move || {
            let _ = tx.send(engine.estimate(&records));
        })
        .map_err(|err| {
            log::error!("failed to start estimation worker: {err}");
            RaschError::WorkerLost
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            let millis = timeout.as_millis() as u64;
            log::warn!("estimation exceeded {millis}ms, discarding");
            Err(RaschError::Timeout { millis })
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(RaschError::WorkerLost),
    }
}
