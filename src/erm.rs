//! Conditional maximum likelihood through R's `eRm` package.
//!
//! The backend runs `Rscript` as a child process. The response matrix goes
//! in as headerless CSV on stdin and the fit comes back as a single JSON
//! object on stdout, produced with `jsonlite`. Availability is probed once
//! by [`ErmBackend::probe`]; an [`ErmBackend`] value is proof that the probe
//! succeeded, so there is no global capability flag.
//!
//! `eRm::RM` parameterizes items by easiness, which is negated here into
//! difficulty. Abilities that come back missing or non-finite are replaced
//! by the same boundary rule the internal estimator uses.
//!
//! Each call drives the child on a current-thread tokio runtime; a call that
//! outlives the configured timeout drops the child, which kills it.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use crate::config::{BackendConfig, EstimationConfig};
use crate::error::{BackendError, EstimationError};
use crate::estimator::{
    EstimationMethod, RaschEstimator, RaschFit, boundary_ability, recenter_abilities,
};
use crate::matrix::ResponseMatrix;

const PROBE_SCRIPT: &str = "suppressMessages({library(eRm); library(jsonlite)})";

const FIT_SCRIPT: &str = r#"
suppressMessages({library(eRm); library(jsonlite)})
X <- as.matrix(read.csv(file("stdin"), header = FALSE))
ids <- paste0("P", seq_len(nrow(X)))
rownames(X) <- ids
out <- tryCatch({
  fit <- RM(X)
  pp <- person.parameter(fit)
  th <- coef(pp)
  se <- unlist(pp$se.theta, use.names = FALSE)
  theta <- rep(NA_real_, nrow(X))
  se_theta <- rep(NA_real_, nrow(X))
  idx <- match(names(th), ids)
  theta[idx] <- as.numeric(th)
  if (length(se) == length(th)) se_theta[idx] <- se
  list(
    success = TRUE,
    item = I(as.numeric(coef(fit))),
    se_item = I(as.numeric(fit$se.beta)),
    theta = I(theta),
    se_theta = I(se_theta),
    iterations = fit$iter
  )
}, error = function(e) list(success = FALSE, error = conditionMessage(e)))
cat(toJSON(out, auto_unbox = TRUE, digits = NA, na = "null"), "\n")
"#;

/// External estimator backed by `eRm::RM`.
#[derive(Debug, Clone)]
pub struct ErmBackend {
    rscript: PathBuf,
    timeout: Duration,
    bound: f64,
}

impl ErmBackend {
    /// Check that `Rscript` runs and can load `eRm` and `jsonlite`.
    pub fn probe(
        backend: &BackendConfig,
        estimation: &EstimationConfig,
    ) -> Result<Self, BackendError> {
        let candidate = Self {
            rscript: backend.rscript.clone(),
            timeout: Duration::from_secs(backend.timeout_secs),
            bound: estimation.ability_bound,
        };
        match candidate.run(PROBE_SCRIPT, Vec::new()) {
            Ok(_) => {
                log::info!("eRm backend available via {}", candidate.rscript.display());
                Ok(candidate)
            }
            Err(BackendError::Failed(reason)) => Err(BackendError::Unavailable(format!(
                "eRm or jsonlite could not be loaded: {reason}"
            ))),
            Err(err) => Err(err),
        }
    }

    fn run(&self, script: &str, input: Vec<u8>) -> Result<String, BackendError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let mut cmd = Command::new(&self.rscript);
        cmd.args(["--vanilla", "-e", script])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let (written, output) = rt.block_on(async {
            let mut child = cmd.spawn().map_err(|err| match err.kind() {
                std::io::ErrorKind::NotFound => {
                    BackendError::Unavailable(format!("{} not found", self.rscript.display()))
                }
                _ => BackendError::Spawn(err),
            })?;

            // Dropping the child on timeout kills the R process.
            timeout(self.timeout, async {
                let written = match child.stdin.take() {
                    Some(mut stdin) => stdin.write_all(&input).await,
                    None => Ok(()),
                };
                let output = child.wait_with_output().await?;
                Ok::<_, BackendError>((written, output))
            })
            .await
            .map_err(|_| BackendError::Timeout {
                secs: self.timeout.as_secs(),
            })?
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("no diagnostic output");
            return Err(BackendError::Failed(format!(
                "Rscript exited with {}: {detail}",
                output.status
            )));
        }
        written.map_err(|err| BackendError::Marshal(err.to_string()))?;
        String::from_utf8(output.stdout).map_err(|err| BackendError::Malformed(err.to_string()))
    }
}

impl RaschEstimator for ErmBackend {
    fn name(&self) -> &'static str {
        "eRm"
    }

    fn fit(&self, responses: &ResponseMatrix) -> Result<RaschFit, EstimationError> {
        let stdout = self.run(FIT_SCRIPT, to_csv(responses))?;
        let reply = parse_reply(&stdout)?;
        Ok(reply.into_fit(responses, self.bound)?)
    }
}

/// Headerless CSV, one row per student.
fn to_csv(responses: &ResponseMatrix) -> Vec<u8> {
    let mut out = String::with_capacity(responses.n_students() * (2 * responses.n_items() + 1));
    for row in responses.view().rows() {
        for (j, value) in row.iter().enumerate() {
            if j > 0 {
                out.push(',');
            }
            out.push(if *value == 1 { '1' } else { '0' });
        }
        out.push('\n');
    }
    out.into_bytes()
}

#[derive(Debug, Deserialize)]
struct ErmReply {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    item: Vec<Option<f64>>,
    #[serde(default)]
    se_item: Vec<Option<f64>>,
    #[serde(default)]
    theta: Vec<Option<f64>>,
    #[serde(default)]
    se_theta: Vec<Option<f64>>,
    #[serde(default)]
    iterations: Option<usize>,
}

/// The JSON object is the last non-empty line; anything R printed before
/// it is ignored.
fn parse_reply(stdout: &str) -> Result<ErmReply, BackendError> {
    let line = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| BackendError::Malformed("empty output".to_string()))?;
    serde_json::from_str(line).map_err(|err| BackendError::Malformed(err.to_string()))
}

impl ErmReply {
    fn into_fit(self, responses: &ResponseMatrix, bound: f64) -> Result<RaschFit, BackendError> {
        if !self.success {
            return Err(BackendError::Failed(
                self.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }

        let n_students = responses.n_students();
        let n_items = responses.n_items();
        if self.item.len() != n_items {
            return Err(BackendError::Malformed(format!(
                "{} item parameters for {n_items} items",
                self.item.len()
            )));
        }
        if self.theta.len() != n_students {
            return Err(BackendError::Malformed(format!(
                "{} person parameters for {n_students} students",
                self.theta.len()
            )));
        }

        let beta = self
            .item
            .iter()
            .enumerate()
            .map(|(j, easiness)| match easiness {
                Some(e) if e.is_finite() => Ok((-e).clamp(-bound, bound)),
                _ => Err(BackendError::Malformed(format!("missing parameter for item {j}"))),
            })
            .collect::<Result<Vec<f64>, _>>()?;

        let pinned = responses.extreme_students();
        let mut theta: Vec<f64> = self
            .theta
            .iter()
            .zip(&pinned)
            .map(|(value, extreme)| match (extreme, value) {
                (Some(e), _) => boundary_ability(*e, bound),
                (None, Some(t)) if t.is_finite() => t.clamp(-bound, bound),
                (None, _) => 0.0,
            })
            .collect();
        let scale = recenter_abilities(&mut theta, &pinned, bound);

        let mut se_theta: Vec<f64> = (0..n_students)
            .map(|i| match pinned[i] {
                Some(_) => f64::INFINITY,
                None => finite_or_infinite(self.se_theta.get(i)),
            })
            .collect();
        let se_beta = (0..n_items)
            .map(|j| finite_or_infinite(self.se_item.get(j)))
            .collect();
        scale.rescale_errors(&mut se_theta);

        Ok(RaschFit {
            theta,
            beta,
            se_theta,
            se_beta,
            scale,
            iterations: self.iterations.unwrap_or(0),
            converged: true,
            method: EstimationMethod::Erm,
        })
    }
}

fn finite_or_infinite(value: Option<&Option<f64>>) -> f64 {
    match value {
        Some(Some(v)) if v.is_finite() => *v,
        _ => f64::INFINITY,
    }
}
