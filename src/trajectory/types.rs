//! Core data types for cached lookahead trajectories.
//!
//! A [`Trajectory`] is the stored form of one multi-step rollout predicted by
//! a single generation call, anchored to the real observation the agent saw
//! when the rollout was produced. The [`TrajectoryPool`] collects every
//! trajectory generated during an episode so that later turns can reuse
//! predicted actions instead of calling the model again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Verification tri-state
// ---------------------------------------------------------------------------

/// Whether a predicted step has been checked against reality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verification {
    /// Not yet checked.
    Unknown,
    /// The predicted transition matched what actually happened.
    Confirmed,
    /// The predicted transition diverged from reality. Once a step is
    /// refuted, every later step in the same trajectory is refuted too.
    Refuted,
}

impl Verification {
    /// Whether this flag disqualifies a window from being trusted.
    pub fn is_refuted(self) -> bool {
        matches!(self, Verification::Refuted)
    }
}

// ---------------------------------------------------------------------------
// Single rollout step
// ---------------------------------------------------------------------------

/// One predicted (or replayed) turn inside a trajectory.
///
/// Optional fields stay `None` when the model did not emit them; matching and
/// verification treat a missing field as "does not match" rather than as an
/// error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutStep {
    /// The predicted action text. `None` only for the anchor step.
    pub action: Option<String>,
    /// Verification state of the predicted transition.
    pub verified: Verification,
    /// The observation the model predicted to follow the action.
    pub observation: Option<String>,
    /// The trajectory-level reward, stamped onto every step once computed.
    pub reward: Option<f64>,
}

impl RolloutStep {
    /// A fresh step for a predicted action; unverified, no reward yet.
    pub fn from_action(action: impl Into<String>) -> Self {
        Self {
            action: Some(action.into()),
            verified: Verification::Unknown,
            observation: None,
            reward: None,
        }
    }

    /// The synthetic anchor step: action-less, pre-confirmed, recording the
    /// real observation at the moment the trajectory was created.
    pub fn anchor(observation: impl Into<String>) -> Self {
        Self {
            action: None,
            verified: Verification::Confirmed,
            observation: Some(observation.into()),
            reward: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Trajectory
// ---------------------------------------------------------------------------

/// The parsed, stored form of one rollout, anchored to the real state it was
/// generated from.
///
/// After creation a trajectory is only ever mutated by the verification
/// engine (the `verified` flags) and by the one-time reward stamp; steps are
/// never reordered or removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trajectory {
    /// Unique identifier (UUID v4).
    pub id: String,
    /// When the rollout was generated.
    pub created_at: DateTime<Utc>,
    /// Anchor step followed by the predicted steps, in rollout order.
    pub steps: Vec<RolloutStep>,
    /// The single scalar reward for the whole rollout, once computed.
    pub reward: Option<f64>,
}

impl Trajectory {
    /// Build a trajectory from an anchor observation and parsed steps.
    pub fn new(anchor_observation: impl Into<String>, steps: Vec<RolloutStep>) -> Self {
        let mut all = Vec::with_capacity(steps.len() + 1);
        all.push(RolloutStep::anchor(anchor_observation));
        all.extend(steps);
        Self::from_steps(all)
    }

    /// Build a trajectory from a fully prepared step list (anchor included).
    pub fn from_steps(steps: Vec<RolloutStep>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            steps,
            reward: None,
        }
    }

    /// Stamp `reward` onto the trajectory and every one of its steps.
    ///
    /// Reward is per-trajectory, not per-step: every step carries the same
    /// scalar so that any window read out of this trajectory sees it.
    pub fn stamp_reward(&mut self, reward: f64) {
        self.reward = Some(reward);
        for step in &mut self.steps {
            step.reward = Some(reward);
        }
    }

    /// The predicted steps, excluding the anchor.
    pub fn plan(&self) -> &[RolloutStep] {
        if self.steps.is_empty() {
            &self.steps
        } else {
            &self.steps[1..]
        }
    }

    /// The anchor observation, if present.
    pub fn anchor_observation(&self) -> Option<&str> {
        self.steps.first().and_then(|s| s.observation.as_deref())
    }

    /// Every observation recorded in the trajectory, anchor included.
    pub fn observations(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter_map(|s| s.observation.clone())
            .collect()
    }

    /// The action of the final step, if any.
    pub fn final_action(&self) -> Option<&str> {
        self.steps.last().and_then(|s| s.action.as_deref())
    }
}

// ---------------------------------------------------------------------------
// Trajectory pool
// ---------------------------------------------------------------------------

/// The per-episode collection of trajectories, in creation order.
///
/// Append-only during an episode; cleared only by an episode reset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrajectoryPool {
    trajectories: Vec<Trajectory>,
}

impl TrajectoryPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of trajectories in the pool.
    pub fn len(&self) -> usize {
        self.trajectories.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.trajectories.is_empty()
    }

    /// Append a trajectory.
    pub fn push(&mut self, trajectory: Trajectory) {
        self.trajectories.push(trajectory);
    }

    /// Clear the pool (episode reset).
    pub fn clear(&mut self) {
        self.trajectories.clear();
    }

    /// Iterate over trajectories in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Trajectory> {
        self.trajectories.iter()
    }

    /// Mutable iteration, used by the verification engine.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Trajectory> {
        self.trajectories.iter_mut()
    }

    /// The reward of each trajectory, in creation order.
    pub fn rewards(&self) -> Vec<Option<f64>> {
        self.trajectories.iter().map(|t| t.reward).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchor_step_shape() {
        let anchor = RolloutStep::anchor("a dark hallway");
        assert!(anchor.action.is_none());
        assert_eq!(anchor.verified, Verification::Confirmed);
        assert_eq!(anchor.observation.as_deref(), Some("a dark hallway"));
        assert!(anchor.reward.is_none());
    }

    #[test]
    fn test_stamp_reward_is_homogeneous() {
        let mut t = Trajectory::new(
            "start",
            vec![
                RolloutStep::from_action("open door"),
                RolloutStep::from_action("enter room"),
            ],
        );
        t.stamp_reward(0.8);

        assert_eq!(t.reward, Some(0.8));
        for step in &t.steps {
            assert_eq!(step.reward, Some(0.8));
        }
    }

    #[test]
    fn test_plan_excludes_anchor() {
        let t = Trajectory::new("start", vec![RolloutStep::from_action("look")]);
        assert_eq!(t.steps.len(), 2);
        assert_eq!(t.plan().len(), 1);
        assert_eq!(t.plan()[0].action.as_deref(), Some("look"));
    }

    #[test]
    fn test_observations_include_anchor_and_skip_missing() {
        let mut step_with_obs = RolloutStep::from_action("open door");
        step_with_obs.observation = Some("the door creaks open".into());
        let t = Trajectory::new(
            "start",
            vec![step_with_obs, RolloutStep::from_action("enter room")],
        );

        let obs = t.observations();
        assert_eq!(
            obs,
            vec!["start".to_string(), "the door creaks open".to_string()]
        );
    }

    #[test]
    fn test_pool_preserves_insertion_order() {
        let mut pool = TrajectoryPool::new();
        pool.push(Trajectory::new("a", vec![RolloutStep::from_action("x")]));
        pool.push(Trajectory::new("b", vec![RolloutStep::from_action("y")]));

        let anchors: Vec<_> = pool
            .iter()
            .map(|t| t.anchor_observation().unwrap().to_string())
            .collect();
        assert_eq!(anchors, vec!["a", "b"]);

        pool.clear();
        assert!(pool.is_empty());
    }
}
