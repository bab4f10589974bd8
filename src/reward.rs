//! Trajectory reward models.
//!
//! A trajectory is scored exactly once, when it enters the pool, and the
//! scalar is stamped onto every step (see
//! [`Trajectory::stamp_reward`](crate::trajectory::Trajectory::stamp_reward)).
//! Two interchangeable signals exist:
//!
//! - **Goal similarity** -- how close the rollout's predicted observations
//!   get to the episode goal, measured by the similarity oracle. Used by the
//!   interactive lookahead planner.
//! - **Sequence log-probability** -- `exp(sum(logprobs))` over the tokens of
//!   the generated action chain. Used by the program synthesizer, where no
//!   goal observation exists.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::embedding::{max_score, SimilarityOracle};

/// Which reward signal scores freshly created trajectories.
///
/// The kind is fixed per episode; an engine given a kind it cannot honour
/// fails fast with a configuration error before mutating any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardKind {
    /// Maximum semantic similarity of recorded observations to the goal.
    GoalSimilarity,
    /// Joint probability of the generated action chain.
    SequenceLogProb,
}

/// Score a trajectory's observations against the goal description.
///
/// The reward is the maximum pairwise similarity between any recorded
/// observation (anchor included) and the goal: the rollout is worth as much
/// as its most goal-like predicted state. Returns 0.0 when there are no
/// observations to score.
pub async fn goal_similarity_reward<S: SimilarityOracle>(
    oracle: &S,
    observations: &[String],
    goal: &str,
) -> Result<f64> {
    if observations.is_empty() {
        return Ok(0.0);
    }

    let matrix = oracle
        .similarity(observations, &[goal.to_string()])
        .await?;
    let reward = max_score(&matrix);

    debug!(
        observations = observations.len(),
        reward, "computed goal-similarity reward"
    );
    Ok(reward)
}

/// The joint probability of a token sequence: `exp(sum(logprobs))`.
///
/// An empty sequence scores `exp(0) = 1.0`; otherwise the result lies in
/// `(0, 1]`.
pub fn sequence_probability(logprobs: &[f64]) -> f64 {
    logprobs.iter().sum::<f64>().exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Oracle scoring 1.0 for equal strings and 0.0 otherwise.
    struct ExactMatchOracle;

    impl SimilarityOracle for ExactMatchOracle {
        async fn similarity(
            &self,
            sources: &[String],
            targets: &[String],
        ) -> Result<Vec<Vec<f64>>> {
            Ok(sources
                .iter()
                .map(|s| {
                    targets
                        .iter()
                        .map(|t| if s == t { 1.0 } else { 0.0 })
                        .collect()
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_goal_similarity_takes_the_maximum() {
        let oracle = ExactMatchOracle;
        let observations = vec![
            "a hallway".to_string(),
            "the goal room".to_string(),
            "a cupboard".to_string(),
        ];
        let reward = goal_similarity_reward(&oracle, &observations, "the goal room")
            .await
            .unwrap();
        assert!((reward - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_goal_similarity_empty_observations() {
        let oracle = ExactMatchOracle;
        let reward = goal_similarity_reward(&oracle, &[], "goal").await.unwrap();
        assert_eq!(reward, 0.0);
    }

    #[test]
    fn test_sequence_probability_is_exp_of_sum() {
        let p = sequence_probability(&[-0.5, -0.5]);
        assert!((p - (-1.0f64).exp()).abs() < 1e-12);
        assert!(p > 0.0 && p <= 1.0);
    }

    #[test]
    fn test_sequence_probability_empty_is_one() {
        assert_eq!(sequence_probability(&[]), 1.0);
    }
}
