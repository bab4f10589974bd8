//! The interactive lookahead planner.
//!
//! Each turn runs a fixed pipeline over the episode state:
//!
//! 1. verify the pool against the latest real transition;
//! 2. try to serve the next action from a cached rollout;
//! 3. on a miss, consult the reflection monitor, build a context-budgeted
//!    prompt, generate a fresh rollout, score it, and pool it.
//!
//! A generation failure surfaces as an `Err` without touching the pool, so a
//! transient API error never corrupts episode state.

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

use crate::agent::episode::Episode;
use crate::config::PlanningConfig;
use crate::decision::best_cached_action;
use crate::model::api::CompletionModel;
use crate::model::embedding::SimilarityOracle;
use crate::model::prompt::trimmed_lookahead_prompt;
use crate::reflect::ReflectionMonitor;
use crate::reward::{goal_similarity_reward, RewardKind};
use crate::trajectory::parser::parse_rollout;
use crate::trajectory::types::Trajectory;
use crate::verify::{Transition, VerificationEngine};

/// The outcome of one planning turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// The action the agent should execute next.
    pub action: String,
    /// Whether the action came from the pool rather than a fresh generation.
    pub from_cache: bool,
}

/// Drives the verify / reuse / generate cycle for interactive episodes.
pub struct LookaheadPlanner<M, S> {
    model: M,
    oracle: S,
    config: PlanningConfig,
    verifier: VerificationEngine,
    monitor: ReflectionMonitor,
}

impl<M: CompletionModel, S: SimilarityOracle> LookaheadPlanner<M, S> {
    /// Create a planner over a completion model and a similarity oracle.
    pub fn new(model: M, oracle: S, config: PlanningConfig) -> Self {
        let verifier = VerificationEngine::new(config.similarity_threshold, config.scan_mode);
        let monitor = ReflectionMonitor::new(config.reward_threshold, config.reflection_window);
        Self {
            model,
            oracle,
            config,
            verifier,
            monitor,
        }
    }

    /// Decide the next action for `episode`.
    ///
    /// Mutates the episode's pool (verification flags, and a new trajectory
    /// on a cache miss) but never its transcript; the caller records the real
    /// step via [`Episode::record`] once the environment has answered.
    pub async fn decide(&self, episode: &mut Episode) -> Result<Decision> {
        // Verification needs a completed real transition to replay.
        if let (Some(previous), Some(action)) = (
            episode.previous_observation().map(str::to_string),
            episode.last_action().map(str::to_string),
        ) {
            let transition = Transition {
                previous_observation: previous,
                action,
                observation: episode.last_observation().to_string(),
            };
            self.verifier
                .verify_pool(&self.oracle, &mut episode.pool, &transition)
                .await?;
        }

        let history = episode.action_history();
        if let Some(action) = best_cached_action(
            &episode.pool,
            &history,
            self.config.n_gram,
            self.config.reward_threshold,
        ) {
            episode.cache_hits += 1;
            info!(action = %action, "serving cached action");
            return Ok(Decision {
                action,
                from_cache: true,
            });
        }

        let tip = self.monitor.advise(&history, &episode.pool);
        if let Some(tip) = &tip {
            debug!(tip = %tip, "reflection hint attached");
        }

        let window = episode
            .transcript
            .len()
            .saturating_sub(self.config.memory_size);
        let prompt = trimmed_lookahead_prompt(
            &self.model,
            &self.config.prompt,
            &episode.goal,
            &episode.init_observation,
            &episode.transcript[window..],
            tip.as_deref(),
        );

        let completion = self
            .model
            .generate(&self.config.prompt.system_message, &prompt)
            .await
            .context("rollout generation failed")?;

        let rollout = parse_rollout(&completion);
        if rollout.steps.is_empty() {
            bail!("model produced no parseable action lines");
        }
        let first_action = rollout.first_action.clone();

        let mut trajectory = Trajectory::new(episode.last_observation(), rollout.steps);
        let reward = match self.config.reward_kind {
            RewardKind::GoalSimilarity => {
                goal_similarity_reward(&self.oracle, &trajectory.observations(), &episode.goal)
                    .await?
            }
            RewardKind::SequenceLogProb => {
                bail!("sequence log-probability reward requires scored completions; \
                       the lookahead planner generates plain text")
            }
        };
        trajectory.stamp_reward(reward);

        info!(
            reward,
            steps = trajectory.plan().len(),
            pool = episode.pool.len() + 1,
            "pooled fresh rollout"
        );
        episode.pool.push(trajectory);

        Ok(Decision {
            action: first_action,
            from_cache: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PromptConfig;
    use crate::model::api::{GenerationOptions, RawCompletion};
    use crate::trajectory::types::{RolloutStep, Verification};
    use std::sync::Mutex;

    /// Scripted model: returns canned completions in order, records prompts.
    struct ScriptedModel {
        completions: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn new(completions: Vec<&str>) -> Self {
            Self {
                completions: Mutex::new(completions.iter().rev().map(|s| s.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    impl CompletionModel for ScriptedModel {
        async fn generate(&self, _system: &str, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.completions
                .lock()
                .unwrap()
                .pop()
                .context("scripted model exhausted")
        }
        async fn generate_batch(
            &self,
            _: &str,
            _: &str,
            _: &GenerationOptions,
        ) -> Result<Vec<RawCompletion>> {
            unreachable!()
        }
        fn context_length(&self) -> usize {
            8192
        }
        fn max_completion_tokens(&self) -> usize {
            1024
        }
    }

    /// Oracle scoring 1.0 for equal strings, 0.0 otherwise.
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

    fn planner(completions: Vec<&str>) -> LookaheadPlanner<ScriptedModel, ExactMatchOracle> {
        LookaheadPlanner::new(
            ScriptedModel::new(completions),
            ExactMatchOracle,
            PlanningConfig {
                prompt: PromptConfig {
                    instruction: "Solve the task.".into(),
                    ..PromptConfig::default()
                },
                ..PlanningConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_first_turn_generates_and_pools_a_rollout() {
        let rollout = "Action: open door\nObservation: the door opens\n\
                       Action: enter room\nObservation: the goal room\n";
        let planner = planner(vec![rollout]);
        let mut episode = Episode::new("the goal room", "a hallway");

        let decision = planner.decide(&mut episode).await.unwrap();
        assert_eq!(decision.action, "open door");
        assert!(!decision.from_cache);
        assert_eq!(episode.pool.len(), 1);

        // Goal similarity: one predicted observation equals the goal.
        let t = episode.pool.iter().next().unwrap();
        assert_eq!(t.reward, Some(1.0));
    }

    #[tokio::test]
    async fn test_matching_history_serves_from_cache() {
        let rollout = "Action: open door\nObservation: the door opens\n\
                       Action: enter room\nObservation: inside\n\
                       Action: take key\nObservation: the goal room\n";
        // A one-action history is too short for a 3-gram prefix, so the
        // second turn still generates.
        let second_rollout = "Action: enter room\nObservation: inside\n";
        let planner = planner(vec![rollout, second_rollout]);
        let mut episode = Episode::new("the goal room", "a hallway");

        let first = planner.decide(&mut episode).await.unwrap();
        assert!(!first.from_cache);
        episode.record(first.action, "the door opens");
        let second = planner.decide(&mut episode).await.unwrap();
        assert!(!second.from_cache);
        episode.record(second.action, "inside");

        // History ["open door", "enter room"] matches the cached 3-gram.
        let third = planner.decide(&mut episode).await.unwrap();
        assert_eq!(third.action, "take key");
        assert!(third.from_cache);
        assert_eq!(episode.cache_hits, 1);
    }

    #[tokio::test]
    async fn test_contradicted_rollout_is_refuted_not_reused() {
        let rollout = "Action: open door\nObservation: the door opens\n\
                       Action: enter room\nObservation: the goal room\n";
        let fallback = "Action: look\nObservation: the goal room\n";
        let planner = planner(vec![rollout, fallback]);
        let mut episode = Episode::new("the goal room", "a hallway");

        let first = planner.decide(&mut episode).await.unwrap();
        // Reality contradicts the prediction.
        episode.record(first.action, "the door is stuck");

        let second = planner.decide(&mut episode).await.unwrap();
        assert!(!second.from_cache);
        assert_eq!(second.action, "look");

        let original = episode.pool.iter().next().unwrap();
        assert_eq!(original.steps[1].verified, Verification::Refuted);
        assert_eq!(original.steps[2].verified, Verification::Refuted);
    }

    #[tokio::test]
    async fn test_generation_failure_leaves_pool_untouched() {
        let planner = planner(vec![]);
        let mut episode = Episode::new("goal", "start");
        episode.pool.push(Trajectory::new(
            "start",
            vec![RolloutStep::from_action("look")],
        ));

        let err = planner.decide(&mut episode).await;
        assert!(err.is_err());
        assert_eq!(episode.pool.len(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_completion_is_an_error() {
        let planner = planner(vec!["I have no idea what to do."]);
        let mut episode = Episode::new("goal", "start");
        let err = planner.decide(&mut episode).await;
        assert!(err.is_err());
        assert!(episode.pool.is_empty());
    }

    #[tokio::test]
    async fn test_logprob_reward_kind_fails_fast() {
        let model = ScriptedModel::new(vec!["Action: look\nObservation: x\n"]);
        let planner = LookaheadPlanner::new(
            model,
            ExactMatchOracle,
            PlanningConfig {
                reward_kind: RewardKind::SequenceLogProb,
                ..PlanningConfig::default()
            },
        );
        let mut episode = Episode::new("goal", "start");
        assert!(planner.decide(&mut episode).await.is_err());
        assert!(episode.pool.is_empty());
    }
}
