//! Stagnation detection and self-reflection hints.
//!
//! When the decision selector comes up empty, the [`ReflectionMonitor`]
//! inspects the action history and the trajectory pool for signs that the
//! agent is stuck and, if it finds one, emits a short corrective hint. The
//! hint is advisory text concatenated into the next generation prompt; it
//! never mutates pool or history state.
//!
//! Rules are evaluated in order, first match wins:
//! 1. repetition -- the agent keeps re-issuing recent actions;
//! 2. plan contradicted -- the recent actions walked into a refuted window;
//! 3. plan reward insufficient -- the recent actions follow a window whose
//!    reward is below threshold.
//!
//! The program-synthesis variant adds [`exhausted_plans_note`], a commentary
//! line inserted in-context when every generated plan has been tried and
//! rejected.

use tracing::debug;

use crate::trajectory::types::TrajectoryPool;

/// Detects repetition and low-reward stagnation.
#[derive(Debug, Clone, Copy)]
pub struct ReflectionMonitor {
    /// Reward below which a matched plan counts as insufficient.
    pub reward_threshold: f64,
    /// How many trailing real actions to match against pool windows.
    pub window_size: usize,
}

impl ReflectionMonitor {
    /// Create a monitor.
    pub fn new(reward_threshold: f64, window_size: usize) -> Self {
        Self {
            reward_threshold,
            window_size,
        }
    }

    /// Produce a corrective hint for the next generation, if one applies.
    pub fn advise(&self, history: &[String], pool: &TrajectoryPool) -> Option<String> {
        // Rule 1: repetition. Checked before any trajectory scan.
        if history.len() >= 2 {
            let last = &history[history.len() - 1];
            let previous = &history[history.len() - 2];
            let occurrences = |a: &String| history.iter().filter(|h| *h == a).count();
            if occurrences(last) > 1 && occurrences(previous) > 1 {
                debug!("repetition detected in action history");
                return Some(
                    "I have been repeating the same action, and it is not helping me to \
                     reach the goal. I need to perform diverse exploration."
                        .to_string(),
                );
            }
        }

        // Rules 2 and 3: the recent actions retrace a pool window that is
        // either contradicted by execution or not rewarding enough.
        let w = self.window_size;
        if history.len() < w || w == 0 {
            return None;
        }
        let recent = &history[history.len() - w..];

        for trajectory in pool.iter() {
            let plan = trajectory.plan();
            if plan.len() < w {
                continue;
            }
            for id in 0..=plan.len() - w {
                let window = &plan[id..id + w];

                let matches = window
                    .iter()
                    .zip(recent)
                    .all(|(step, expected)| step.action.as_deref() == Some(expected.as_str()));
                if !matches {
                    continue;
                }

                if let Some(refuted) = window.iter().find(|s| s.verified.is_refuted()) {
                    let name = refuted.action.as_deref().unwrap_or("that action");
                    debug!(action = name, "matched window contains a refuted step");
                    return Some(format!(
                        "The execution of {name} is not as expected. I need to try \
                         something different."
                    ));
                }

                let Some(reward) = window.last().and_then(|s| s.reward) else {
                    continue;
                };
                if reward <= self.reward_threshold {
                    debug!(reward, "matched window reward below threshold");
                    return Some(
                        "My original plan could not reach the goal. I should change my \
                         policy."
                            .to_string(),
                    );
                }
            }
        }

        None
    }
}

/// Commentary for the synthesis loop once every plan has been rejected.
///
/// Enumerates the distinct final actions attempted across the pool and
/// formats the note as an in-context comment (`comment_indent` + `# `), so
/// it reads as a note to the model rather than an executable step. Returns
/// `None` when the pool is empty (nothing was attempted yet).
pub fn exhausted_plans_note(
    pool: &TrajectoryPool,
    question: &str,
    comment_indent: &str,
) -> Option<String> {
    if pool.is_empty() {
        return None;
    }

    let mut attempted: Vec<String> = Vec::new();
    for trajectory in pool.iter() {
        if let Some(action) = trajectory.final_action() {
            let trimmed = action.trim_end_matches('\n').to_string();
            if !trimmed.is_empty() && !attempted.contains(&trimmed) {
                attempted.push(trimmed);
            }
        }
    }
    if attempted.is_empty() {
        return None;
    }

    let reflection = format!(
        "I have generated {}, but none of them are correct. I need to revise them to \
         solve the problem {question}.",
        attempted.join(", ")
    );
    let commented = format!(
        "{comment_indent}# {}",
        reflection.replace('\n', &format!("\n{comment_indent}# "))
    );
    Some(commented)
}
