//! Processing orchestrator.
//!
//! Runs clean → repair → decimate → smooth → score as an explicit state machine:
//!
//! ```text
//! Init → Cleaning → Repairing → Decimating → Smoothing → Scored
//!   Scored → Accepted                      (score ≥ min_quality)
//!   Scored → Retrying → Cleaning           (attempts remain, target × 0.8)
//!   Scored → Exhausted                     (best attempt returned)
//! ```
//!
//! Every attempt starts again from the input mesh. The loop is bounded by
//! `max_retries` total attempts.

use std::fmt;

use tracing::{debug, info};

use crate::Mesh;
use crate::cleanup::{CleanParams, clean_mesh};
use crate::decimate::{DEFAULT_TARGET_FACES, DecimateParams, decimate};
use crate::error::{Annotation, MeshResult};
use crate::io::{MeshFormat, decode, encode};
use crate::quality::{QualityMetrics, ScoreParams, score_mesh};
use crate::repair::{RepairParams, compute_vertex_normals, remove_unreferenced_vertices, repair_mesh};
use crate::smooth::{SmoothParams, smooth_mesh};
use crate::tracing_ext::{OperationTimer, log_annotation, log_metrics};

/// Configuration for [`process_mesh`].
///
/// # Example
///
/// ```
/// use mesh_forge::ProcessConfig;
///
/// let config = ProcessConfig {
///     min_quality: 8.0,
///     smooth: false,
///     ..ProcessConfig::with_target_faces(10_000)
/// };
/// assert_eq!(config.max_retries, 3);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct ProcessConfig {
    /// Face budget for the first attempt. Default: 50 000
    pub target_faces: usize,
    /// Score an attempt must reach to be accepted. Default: 7.0
    pub min_quality: f64,
    /// Total attempts, including the first. Clamped to at least 1. Default: 3
    pub max_retries: usize,
    /// Multiplier applied to the face budget on each retry. Default: 0.8
    pub retry_target_factor: f64,

    /// Run the cleanup stage. Default: true
    pub clean: bool,
    /// Run the repair stage. Default: true
    pub repair: bool,
    /// Run the decimation stage. Default: true
    pub decimate: bool,
    /// Run the smoothing stage. Default: true
    pub smooth: bool,

    pub clean_params: CleanParams,
    pub repair_params: RepairParams,
    /// `target_faces` here is overwritten by each attempt's budget.
    pub decimate_params: DecimateParams,
    pub smooth_params: SmoothParams,
    /// `target_faces` here is overwritten by each attempt's budget.
    pub score_params: ScoreParams,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            target_faces: DEFAULT_TARGET_FACES,
            min_quality: 7.0,
            max_retries: 3,
            retry_target_factor: 0.8,
            clean: true,
            repair: true,
            decimate: true,
            smooth: true,
            clean_params: CleanParams::default(),
            repair_params: RepairParams::default(),
            decimate_params: DecimateParams::default(),
            smooth_params: SmoothParams::default(),
            score_params: ScoreParams::default(),
        }
    }
}

impl ProcessConfig {
    /// Defaults with a different face budget.
    pub fn with_target_faces(target_faces: usize) -> Self {
        Self {
            target_faces,
            ..Default::default()
        }
    }

    /// Only score; every stage disabled and a single attempt.
    pub fn score_only() -> Self {
        Self {
            clean: false,
            repair: false,
            decimate: false,
            smooth: false,
            max_retries: 1,
            min_quality: 0.0,
            ..Default::default()
        }
    }

    /// Face budget for a 1-based attempt number.
    pub fn target_for_attempt(&self, attempt: usize) -> usize {
        let factor = self.retry_target_factor.clamp(0.0, 1.0);
        let mut target = self.target_faces;
        for _ in 1..attempt {
            target = ((target as f64 * factor).round() as usize).max(4);
        }
        target
    }
}

/// Orchestrator states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum ProcessState {
    Init,
    Cleaning,
    Repairing,
    Decimating,
    Smoothing,
    Scored,
    Retrying,
    /// Terminal: an attempt reached `min_quality`.
    Accepted,
    /// Terminal: attempts ran out; the best one was returned.
    Exhausted,
}

impl ProcessState {
    /// Whether the state machine stops here.
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessState::Accepted | ProcessState::Exhausted)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessState::Init => "init",
            ProcessState::Cleaning => "cleaning",
            ProcessState::Repairing => "repairing",
            ProcessState::Decimating => "decimating",
            ProcessState::Smoothing => "smoothing",
            ProcessState::Scored => "scored",
            ProcessState::Retrying => "retrying",
            ProcessState::Accepted => "accepted",
            ProcessState::Exhausted => "exhausted",
        };
        f.write_str(name)
    }
}

/// Summary of one attempt.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub attempt: usize,
    pub target_faces: usize,
    pub score: f64,
    pub face_count: usize,
}

/// Result of [`process_mesh`].
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub mesh: Mesh,
    pub metrics: QualityMetrics,
    /// `Accepted` or `Exhausted`.
    pub state: ProcessState,
    pub attempts: Vec<AttemptRecord>,
    /// Annotations of the returned attempt, plus `QualityBelowThreshold` when exhausted.
    pub annotations: Vec<Annotation>,
}

impl ProcessOutcome {
    pub fn accepted(&self) -> bool {
        self.state == ProcessState::Accepted
    }
}

/// Result of [`process`].
#[derive(Debug, Clone)]
pub struct ProcessedOutput {
    pub bytes: Vec<u8>,
    pub format: MeshFormat,
    pub metrics: QualityMetrics,
    pub annotations: Vec<Annotation>,
    pub attempts: Vec<AttemptRecord>,
}

/// A finished attempt kept as the best-so-far candidate.
struct Candidate {
    mesh: Mesh,
    metrics: QualityMetrics,
    annotations: Vec<Annotation>,
}

/// Mutable state of the attempt in flight.
struct Attempt {
    number: usize,
    target_faces: usize,
    mesh: Mesh,
    annotations: Vec<Annotation>,
    metrics: Option<QualityMetrics>,
}

impl Attempt {
    fn start(number: usize, input: &Mesh, config: &ProcessConfig) -> Self {
        Self {
            number,
            target_faces: config.target_for_attempt(number),
            mesh: input.clone(),
            annotations: Vec::new(),
            metrics: None,
        }
    }
}

fn transition(from: ProcessState, to: ProcessState, attempt: usize) -> ProcessState {
    debug!(attempt, "Orchestrator: {} → {}", from, to);
    to
}

/// Run the processing state machine on a mesh.
///
/// Never fails: every stage absorbs its own failures into annotations.
pub fn process_mesh(input: &Mesh, config: &ProcessConfig) -> ProcessOutcome {
    let _timer = OperationTimer::with_context("process", input.face_count(), input.vertex_count());
    let max_attempts = config.max_retries.max(1);

    let mut state = ProcessState::Init;
    let mut attempt = Attempt::start(1, input, config);
    let mut best: Option<Candidate> = None;
    let mut records: Vec<AttemptRecord> = Vec::with_capacity(max_attempts);

    while !state.is_terminal() {
        state = match state {
            ProcessState::Init => transition(state, ProcessState::Cleaning, attempt.number),
            ProcessState::Cleaning => {
                if config.clean {
                    clean_mesh(&mut attempt.mesh, &config.clean_params);
                }
                transition(state, ProcessState::Repairing, attempt.number)
            }
            ProcessState::Repairing => {
                if config.repair {
                    let result = repair_mesh(&mut attempt.mesh, &config.repair_params);
                    attempt.annotations.extend(result.annotation);
                }
                transition(state, ProcessState::Decimating, attempt.number)
            }
            ProcessState::Decimating => {
                if config.decimate {
                    let params = DecimateParams {
                        target_faces: attempt.target_faces,
                        ..config.decimate_params.clone()
                    };
                    let outcome = decimate(&attempt.mesh, &params);
                    attempt.annotations.extend(outcome.annotation);
                    attempt.mesh = outcome.mesh;
                }
                transition(state, ProcessState::Smoothing, attempt.number)
            }
            ProcessState::Smoothing => {
                if config.smooth {
                    let result = smooth_mesh(&mut attempt.mesh, &config.smooth_params);
                    attempt.annotations.extend(result.annotation);
                }
                remove_unreferenced_vertices(&mut attempt.mesh);
                compute_vertex_normals(&mut attempt.mesh);
                transition(state, ProcessState::Scored, attempt.number)
            }
            ProcessState::Scored => {
                let params = ScoreParams {
                    target_faces: attempt.target_faces,
                    ..config.score_params.clone()
                };
                let metrics = score_mesh(&attempt.mesh, &params);
                log_metrics(&metrics, "attempt");
                records.push(AttemptRecord {
                    attempt: attempt.number,
                    target_faces: attempt.target_faces,
                    score: metrics.overall_score,
                    face_count: metrics.face_count,
                });

                let accepted = metrics.meets(config.min_quality);
                attempt.metrics = Some(metrics);

                if accepted {
                    transition(state, ProcessState::Accepted, attempt.number)
                } else if attempt.number < max_attempts {
                    transition(state, ProcessState::Retrying, attempt.number)
                } else {
                    transition(state, ProcessState::Exhausted, attempt.number)
                }
            }
            ProcessState::Retrying => {
                keep_if_better(&mut best, &mut attempt);
                attempt = Attempt::start(attempt.number + 1, input, config);
                transition(state, ProcessState::Cleaning, attempt.number)
            }
            ProcessState::Accepted | ProcessState::Exhausted => state,
        };
    }

    let attempts_made = records.len();
    let chosen = if state == ProcessState::Accepted {
        take_candidate(attempt)
    } else {
        keep_if_better(&mut best, &mut attempt);
        best.unwrap_or_else(|| take_candidate(attempt))
    };

    let Candidate {
        mesh,
        metrics,
        mut annotations,
    } = chosen;

    if state == ProcessState::Exhausted {
        let annotation = Annotation::QualityBelowThreshold {
            best_score: metrics.overall_score,
            min_quality: config.min_quality,
            attempts: attempts_made,
        };
        log_annotation(&annotation);
        annotations.push(annotation);
    }

    info!(
        "Processing {} after {} attempt(s): score {:.1}, {} faces",
        state, attempts_made, metrics.overall_score, metrics.face_count
    );

    ProcessOutcome {
        mesh,
        metrics,
        state,
        attempts: records,
        annotations,
    }
}

fn take_candidate(attempt: Attempt) -> Candidate {
    let metrics = attempt
        .metrics
        .unwrap_or_else(|| score_mesh(&attempt.mesh, &ScoreParams::default()));
    Candidate {
        mesh: attempt.mesh,
        metrics,
        annotations: attempt.annotations,
    }
}

/// Move the finished attempt into `best` if it scores strictly higher.
fn keep_if_better(best: &mut Option<Candidate>, attempt: &mut Attempt) {
    let Some(metrics) = attempt.metrics.take() else {
        return;
    };
    let better = best
        .as_ref()
        .is_none_or(|b| metrics.overall_score > b.metrics.overall_score);
    if better {
        *best = Some(Candidate {
            mesh: std::mem::take(&mut attempt.mesh),
            metrics,
            annotations: std::mem::take(&mut attempt.annotations),
        });
    }
}

/// Decode, process, and re-encode in the input format.
///
/// Fails only with `ValidationFailure` (undecodable input) or
/// `UnsupportedFormat` (export-only formats).
pub fn process(bytes: &[u8], format: MeshFormat, config: &ProcessConfig) -> MeshResult<ProcessedOutput> {
    let mesh = decode(bytes, format)?;
    let outcome = process_mesh(&mesh, config);
    let bytes = encode(&outcome.mesh, format)?;

    Ok(ProcessedOutput {
        bytes,
        format,
        metrics: outcome.metrics,
        annotations: outcome.annotations,
        attempts: outcome.attempts,
    })
}
