//! Trajectory verification against real transitions.
//!
//! After every real environment step, the [`VerificationEngine`] replays the
//! transition against every pooled trajectory: a step predicting the action
//! that was actually executed is checked by comparing the trajectory's anchor
//! observation with the real previous observation (`begin_sim`) and the
//! step's predicted observation with the real resulting observation
//! (`end_sim`). A confirmed step raises trust in the plan; a contradicted one
//! refutes the step *and everything after it* -- a diverged plan cannot be
//! trusted further.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::embedding::{max_score, SimilarityOracle};
use crate::trajectory::types::{TrajectoryPool, Verification};

/// The most recent real transition, as reported by the environment loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    /// The observation before the action was executed.
    pub previous_observation: String,
    /// The action actually executed.
    pub action: String,
    /// The observation the action produced.
    pub observation: String,
}

/// How far a verification pass scans within one trajectory.
///
/// In the permissive mode a repeated action string can be matched (and
/// re-verified) several times in one pass; the strict mode stops at the
/// first match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Check every step whose action matches the executed one.
    #[default]
    AllMatches,
    /// Stop scanning a trajectory after its first matching step.
    FirstMatchOnly,
}

/// Updates tri-state verification flags across the pool.
#[derive(Debug, Clone, Copy)]
pub struct VerificationEngine {
    /// Similarity above which two observations count as the same state.
    pub threshold: f64,
    /// Per-trajectory scanning behavior.
    pub scan_mode: ScanMode,
}

impl VerificationEngine {
    /// Create an engine with the given threshold and scan mode.
    pub fn new(threshold: f64, scan_mode: ScanMode) -> Self {
        Self {
            threshold,
            scan_mode,
        }
    }

    /// Verify every pooled trajectory against `transition`.
    ///
    /// For each trajectory, steps predicting the executed action (and
    /// carrying an observation) are checked:
    ///
    /// 1. `begin_sim > threshold && end_sim > threshold` -- the step is
    ///    confirmed (unless already refuted by an earlier pass; refutation
    ///    is final so the propagation invariant survives multiple turns).
    /// 2. `begin_sim > threshold && end_sim <= threshold` -- the step and
    ///    every later step are refuted in one pass, and scanning of that
    ///    trajectory stops.
    /// 3. `begin_sim <= threshold` -- no update; the match is against an
    ///    unrelated prior context.
    ///
    /// A step missing its action or observation is simply not updatable.
    /// Returns the number of steps whose flag changed.
    pub async fn verify_pool<S: SimilarityOracle>(
        &self,
        oracle: &S,
        pool: &mut TrajectoryPool,
        transition: &Transition,
    ) -> Result<usize> {
        let mut updated = 0usize;

        for trajectory in pool.iter_mut() {
            let Some(anchor) = trajectory.anchor_observation().map(str::to_string) else {
                continue;
            };

            let begin_matrix = oracle
                .similarity(
                    &[anchor],
                    std::slice::from_ref(&transition.previous_observation),
                )
                .await?;
            let begin_sim = max_score(&begin_matrix);

            if begin_sim <= self.threshold {
                // Rollout anchored in an unrelated state; nothing to learn.
                continue;
            }

            let len = trajectory.steps.len();
            'steps: for id in 0..len {
                let step = &trajectory.steps[id];
                let matches_action = step.action.as_deref() == Some(transition.action.as_str());
                let Some(end_observation) = step.observation.clone() else {
                    continue;
                };
                if !matches_action {
                    continue;
                }

                let end_matrix = oracle
                    .similarity(
                        &[end_observation],
                        std::slice::from_ref(&transition.observation),
                    )
                    .await?;
                let end_sim = max_score(&end_matrix);

                if end_sim > self.threshold {
                    if trajectory.steps[id].verified != Verification::Refuted {
                        if trajectory.steps[id].verified != Verification::Confirmed {
                            updated += 1;
                        }
                        trajectory.steps[id].verified = Verification::Confirmed;
                    }
                    if self.scan_mode == ScanMode::FirstMatchOnly {
                        break 'steps;
                    }
                } else {
                    // The plan diverged here: refute this step and everything
                    // downstream, then stop scanning this trajectory.
                    for later in &mut trajectory.steps[id..] {
                        if later.verified != Verification::Refuted {
                            updated += 1;
                        }
                        later.verified = Verification::Refuted;
                    }
                    break 'steps;
                }
            }
        }

        debug!(
            action = %transition.action,
            updated, "verification pass complete"
        );
        Ok(updated)
    }
}
