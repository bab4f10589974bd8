//! Environment seam for the interactive planning loop.
//!
//! The planner itself never talks to an environment; the driver in `main`
//! does, through the [`Environment`] trait. A scripted in-memory
//! implementation is provided for demos and tests.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// An observation returned by the environment after a reset or step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvObservation {
    /// The textual observation the agent sees.
    pub text: String,
    /// Whether the episode has terminated.
    pub done: bool,
    /// The scalar reward for the transition that produced this observation.
    pub reward: f64,
}

/// The environment contract the episode driver runs against.
#[allow(async_fn_in_trait)]
pub trait Environment: Send + Sync {
    /// Reset the environment and start a new episode.
    async fn reset(&mut self) -> anyhow::Result<EnvObservation>;

    /// Execute an action and return the resulting observation.
    async fn step(&mut self, action: &str) -> anyhow::Result<EnvObservation>;

    /// Natural-language description of the episode goal.
    fn goal(&self) -> &str;

    /// The maximum number of steps allowed in an episode.
    fn max_steps(&self) -> usize;
}

/// A deterministic text environment driven by a canned action table.
///
/// Each known action maps to a fixed observation; anything else yields
/// "Nothing happens.". The episode succeeds (reward 1.0, done) when a step
/// produces the goal observation.
#[derive(Debug, Clone)]
pub struct ScriptedEnv {
    goal: String,
    init_observation: String,
    responses: HashMap<String, String>,
    max_steps: usize,
    current_step: usize,
}

impl ScriptedEnv {
    /// Build a scripted environment from `(action, observation)` pairs.
    pub fn new(
        goal: impl Into<String>,
        init_observation: impl Into<String>,
        responses: impl IntoIterator<Item = (String, String)>,
        max_steps: usize,
    ) -> Self {
        Self {
            goal: goal.into(),
            init_observation: init_observation.into(),
            responses: responses.into_iter().collect(),
            max_steps,
            current_step: 0,
        }
    }

    /// A small household demo episode.
    pub fn demo() -> Self {
        let responses = [
            ("open door", "The door creaks open."),
            ("enter room", "You are in a small study. A key glints on the desk."),
            ("take key", "You pick up the key."),
            ("look", "You are in a dark hallway. A door leads north."),
        ]
        .into_iter()
        .map(|(a, o)| (a.to_string(), o.to_string()));

        Self::new(
            "You pick up the key.",
            "You are in a dark hallway. A door leads north.",
            responses,
            10,
        )
    }
}

impl Environment for ScriptedEnv {
    async fn reset(&mut self) -> anyhow::Result<EnvObservation> {
        self.current_step = 0;
        Ok(EnvObservation {
            text: self.init_observation.clone(),
            done: false,
            reward: 0.0,
        })
    }

    async fn step(&mut self, action: &str) -> anyhow::Result<EnvObservation> {
        self.current_step += 1;
        let text = self
            .responses
            .get(action.trim())
            .cloned()
            .unwrap_or_else(|| "Nothing happens.".to_string());

        let success = text == self.goal;
        let done = success || self.current_step >= self.max_steps;
        Ok(EnvObservation {
            text,
            done,
            reward: if success { 1.0 } else { 0.0 },
        })
    }

    fn goal(&self) -> &str {
        &self.goal
    }

    fn max_steps(&self) -> usize {
        self.max_steps
    }
}
