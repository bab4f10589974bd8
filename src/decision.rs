//! N-gram decision selection over the trajectory pool.
//!
//! Both policies slide fixed-length windows of predicted actions over every
//! pooled trajectory and keep the windows whose prefix equals the tail of the
//! real action history:
//!
//! - [`best_cached_action`] is the deterministic evaluation-agent policy:
//!   first pool-order window that is refutation-free and clears the reward
//!   threshold wins, and its last action is returned.
//! - [`gather_candidates`] + [`select_weighted`] form the program-synthesis
//!   policy: every matching window contributes a `(action, reward)`
//!   candidate, and the winner is either the reward argmax or a draw from a
//!   softmax-with-temperature distribution whose duplicate actions have been
//!   merged into one probability mass.
//!
//! Everything here is a pure function over `(pool, history, config)`; no
//! caller state is touched, which is what makes the policies testable.

use ordered_float::OrderedFloat;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use tracing::debug;

use crate::trajectory::types::{RolloutStep, TrajectoryPool};

// ---------------------------------------------------------------------------
// Deterministic best-match policy
// ---------------------------------------------------------------------------

/// Return the next action cached in the pool, if a trustworthy one exists.
///
/// A window of exactly `n_gram` consecutive plan steps (the anchor is
/// excluded) matches when its first `n_gram - 1` action strings equal, in
/// order, the last `n_gram - 1` entries of `history`. The first matching
/// window -- pool order, then step order -- that contains no refuted step and
/// whose final reward exceeds `reward_threshold` supplies the decision.
/// Windows may touch the trajectory tail; an exactly n-long plan is eligible.
///
/// `None` means "no decision": the caller falls back to a fresh generation.
pub fn best_cached_action(
    pool: &TrajectoryPool,
    history: &[String],
    n_gram: usize,
    reward_threshold: f64,
) -> Option<String> {
    if n_gram == 0 {
        return None;
    }
    let prefix_len = n_gram - 1;
    if history.len() < prefix_len {
        return None;
    }
    let tail = &history[history.len() - prefix_len..];

    for trajectory in pool.iter() {
        let plan = trajectory.plan();
        if plan.len() < n_gram {
            continue;
        }
        for id in 0..=plan.len() - n_gram {
            let window = &plan[id..id + n_gram];
            if !prefix_matches(window, tail) {
                continue;
            }
            if window.iter().any(|s| s.verified.is_refuted()) {
                continue;
            }
            let last = window.last().expect("window is non-empty");
            let (Some(action), Some(reward)) = (last.action.as_deref(), last.reward) else {
                continue;
            };
            if reward > reward_threshold {
                debug!(action, reward, "cached action selected");
                return Some(action.to_string());
            }
        }
    }

    None
}

/// Whether the window's leading actions equal the history tail, in order.
fn prefix_matches(window: &[RolloutStep], tail: &[String]) -> bool {
    window
        .iter()
        .take(tail.len())
        .zip(tail)
        .all(|(step, expected)| step.action.as_deref() == Some(expected.as_str()))
}

// ---------------------------------------------------------------------------
// Weighted / sampled policy
// ---------------------------------------------------------------------------

/// Collect every `(action, reward)` candidate whose window prefix matches the
/// history tail.
///
/// The history uses `Option<String>` entries so the leading `None` sentinel
/// can line up with a trajectory's anchor step. Window length at each start
/// offset is the minimum of the remaining trajectory length, `n_gram`, and
/// `history.len() + 1`, so windows clamp at trajectory edges instead of
/// being skipped.
pub fn gather_candidates(
    pool: &TrajectoryPool,
    history: &[Option<String>],
    n_gram: usize,
) -> Vec<(String, f64)> {
    let mut candidates = Vec::new();
    if n_gram == 0 {
        return candidates;
    }

    for trajectory in pool.iter() {
        let steps = &trajectory.steps;
        let start_count = steps.len().saturating_sub(n_gram - 1).max(1);

        for id in 0..start_count {
            let n = (steps.len() - id).min(n_gram).min(history.len() + 1);
            // A window needs at least one prefix step plus the candidate
            // step; an empty prefix would match any history trivially.
            if n < 2 {
                continue;
            }
            let window = &steps[id..id + n];
            let prefix_len = n - 1;
            let tail = &history[history.len() - prefix_len..];

            let matches = window
                .iter()
                .take(prefix_len)
                .zip(tail)
                .all(|(step, expected)| step.action == *expected);
            if !matches {
                continue;
            }

            let last = window.last().expect("window is non-empty");
            let (Some(action), Some(reward)) = (last.action.clone(), last.reward) else {
                continue;
            };
            candidates.push((action, reward));
        }
    }

    candidates
}

/// Softmax-with-temperature over candidates, duplicate actions merged.
///
/// Each candidate weighs `exp(reward / temperature)`; weights of candidates
/// sharing the identical action string are summed before normalisation, so
/// an action discovered through several trajectories gets one combined
/// probability mass. The returned masses sum to 1.
pub fn merged_distribution(candidates: &[(String, f64)], temperature: f64) -> Vec<(String, f64)> {
    let total: f64 = candidates
        .iter()
        .map(|(_, reward)| (reward / temperature).exp())
        .sum();
    if total == 0.0 {
        return Vec::new();
    }

    let mut merged: Vec<(String, f64)> = Vec::new();
    for (action, reward) in candidates {
        let weight = (reward / temperature).exp() / total;
        match merged.iter_mut().find(|(a, _)| a == action) {
            Some((_, mass)) => *mass += weight,
            None => merged.push((action.clone(), weight)),
        }
    }
    merged
}

/// Choose an action from the candidate set, or return "no decision".
///
/// Returns `None` when there are no candidates or the best reward falls
/// below `reward_threshold`. Otherwise, deterministic mode returns the
/// candidate with the globally maximum reward (first occurrence wins ties);
/// sampling mode draws from [`merged_distribution`].
pub fn select_weighted<R: Rng>(
    candidates: &[(String, f64)],
    reward_threshold: f64,
    temperature: f64,
    do_sample: bool,
    rng: &mut R,
) -> Option<String> {
    if candidates.is_empty() {
        return None;
    }

    let best = candidates
        .iter()
        .map(|(_, r)| OrderedFloat(*r))
        .max()
        .expect("candidates are non-empty");
    if best.0 < reward_threshold {
        return None;
    }

    if do_sample {
        let distribution = merged_distribution(candidates, temperature);
        debug!(options = distribution.len(), "sampling cached action");
        let weights: Vec<f64> = distribution.iter().map(|(_, w)| *w).collect();
        let index = WeightedIndex::new(&weights).ok()?.sample(rng);
        Some(distribution[index].0.clone())
    } else {
        let mut winner: Option<(&str, f64)> = None;
        for (action, reward) in candidates {
            if winner.map_or(true, |(_, r)| *reward > r) {
                winner = Some((action, *reward));
            }
        }
        winner.map(|(action, _)| action.to_string())
    }
}
