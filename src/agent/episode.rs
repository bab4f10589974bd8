//! Per-episode state for the interactive lookahead planner.
//!
//! An [`Episode`] owns everything that resets between tasks: the goal, the
//! transcript of real executed steps, and the trajectory pool of cached
//! rollouts. The planner borrows it mutably each turn; nothing here talks to
//! a model or an environment.

use serde::{Deserialize, Serialize};

use crate::trajectory::types::TrajectoryPool;

/// The live state of one planning episode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Episode {
    /// Natural-language description of what the agent should achieve.
    pub goal: String,
    /// The observation the environment produced at reset.
    pub init_observation: String,
    /// Real `(action, observation)` pairs executed so far, oldest first.
    pub transcript: Vec<(String, String)>,
    /// Cached rollouts generated during this episode.
    pub pool: TrajectoryPool,
    /// Number of real steps taken.
    pub steps_taken: usize,
    /// How many decisions were served from the pool instead of a generation.
    pub cache_hits: usize,
}

impl Episode {
    /// Start a fresh episode from the environment's reset output.
    pub fn new(goal: impl Into<String>, init_observation: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            init_observation: init_observation.into(),
            ..Self::default()
        }
    }

    /// Reinitialise for a new task, dropping the pool, transcript, and
    /// counters. Nothing survives across episodes.
    pub fn reset(&mut self, goal: impl Into<String>, init_observation: impl Into<String>) {
        *self = Self::new(goal, init_observation);
    }

    /// Record a real executed step.
    pub fn record(&mut self, action: impl Into<String>, observation: impl Into<String>) {
        self.transcript.push((action.into(), observation.into()));
        self.steps_taken += 1;
    }

    /// The real actions executed so far, oldest first.
    pub fn action_history(&self) -> Vec<String> {
        self.transcript.iter().map(|(a, _)| a.clone()).collect()
    }

    /// The most recent observation: the last transcript entry, or the reset
    /// observation before any step was taken.
    pub fn last_observation(&self) -> &str {
        self.transcript
            .last()
            .map(|(_, o)| o.as_str())
            .unwrap_or(&self.init_observation)
    }

    /// The observation the agent saw just before its latest action, if a
    /// step has been taken at all.
    pub fn previous_observation(&self) -> Option<&str> {
        match self.transcript.len() {
            0 => None,
            1 => Some(&self.init_observation),
            n => Some(&self.transcript[n - 2].1),
        }
    }

    /// The most recent executed action, if any.
    pub fn last_action(&self) -> Option<&str> {
        self.transcript.last().map(|(a, _)| a.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_episode_reports_reset_observation() {
        let ep = Episode::new("find the key", "a hallway");
        assert_eq!(ep.last_observation(), "a hallway");
        assert_eq!(ep.previous_observation(), None);
        assert!(ep.action_history().is_empty());
        assert_eq!(ep.steps_taken, 0);
    }

    #[test]
    fn test_reset_drops_everything() {
        use crate::trajectory::types::{RolloutStep, Trajectory};

        let mut ep = Episode::new("old goal", "old start");
        ep.record("look", "a room");
        ep.cache_hits = 3;
        ep.pool
            .push(Trajectory::new("a room", vec![RolloutStep::from_action("go")]));

        ep.reset("new goal", "new start");
        assert_eq!(ep.goal, "new goal");
        assert_eq!(ep.last_observation(), "new start");
        assert!(ep.pool.is_empty());
        assert!(ep.transcript.is_empty());
        assert_eq!(ep.steps_taken, 0);
        assert_eq!(ep.cache_hits, 0);
    }

    #[test]
    fn test_record_advances_observations() {
        let mut ep = Episode::new("goal", "start");
        ep.record("open door", "the door opens");
        assert_eq!(ep.last_observation(), "the door opens");
        assert_eq!(ep.previous_observation(), Some("start"));
        assert_eq!(ep.last_action(), Some("open door"));

        ep.record("enter room", "inside");
        assert_eq!(ep.last_observation(), "inside");
        assert_eq!(ep.previous_observation(), Some("the door opens"));
        assert_eq!(ep.steps_taken, 2);
        assert_eq!(
            ep.action_history(),
            vec!["open door".to_string(), "enter room".to_string()]
        );
    }
}
