//! Line-by-line program synthesis via sampled lookahead.
//!
//! Each iteration samples a batch of scored continuations, parses every one
//! into an action chain, pools the chains as trajectories rewarded by their
//! joint token probability, and then selects the next program line through
//! the weighted n-gram policy. Accepted lines accumulate in a fixed-size
//! memory that is replayed into every subsequent prompt. When no candidate
//! clears the threshold, the exhausted-plans note is appended as an
//! in-context comment and the loop terminates instead of spinning.

use anyhow::{bail, Context, Result};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::SynthesisConfig;
use crate::decision::{gather_candidates, select_weighted};
use crate::model::api::{CompletionModel, GenerationOptions};
use crate::model::prompt::synthesis_prompt;
use crate::reflect::exhausted_plans_note;
use crate::reward::RewardKind;
use crate::trajectory::parser::parse_action_chain;
use crate::trajectory::types::{RolloutStep, Trajectory, TrajectoryPool, Verification};

const SYSTEM_MESSAGE: &str = "You are a helpful assistant.";

/// The outcome of one synthesis run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedProgram {
    /// The assembled program, scaffold included.
    pub program: String,
    /// How many lines were accepted before the loop stopped.
    pub accepted_lines: usize,
    /// Whether the loop stopped on an end suffix rather than by exhaustion.
    pub completed: bool,
}

/// Builds programs one accepted line at a time.
pub struct ProgramSynthesizer<M> {
    model: M,
    config: SynthesisConfig,
}

impl<M: CompletionModel> ProgramSynthesizer<M> {
    /// Create a synthesizer over a completion model.
    pub fn new(model: M, config: SynthesisConfig) -> Self {
        Self { model, config }
    }

    /// Synthesize a program for `question`, seeding the prompt with
    /// `examples_prompt` few-shot material.
    pub async fn synthesize<R: Rng>(
        &self,
        question: &str,
        examples_prompt: &str,
        rng: &mut R,
    ) -> Result<SynthesizedProgram> {
        if self.config.reward_kind != RewardKind::SequenceLogProb {
            bail!("program synthesis scores chains by sequence log-probability; \
                   goal similarity has no goal observation to compare against");
        }

        let cfg = &self.config;
        let options = GenerationOptions {
            n: cfg.samples_per_step,
            max_tokens: cfg
                .lookahead_token_window
                .unwrap_or(30 * cfg.lookahead_depth),
            temperature: cfg.beam_temperature,
            top_p: 1.0,
            stop: Vec::new(),
            logprobs: true,
        };

        // The per-question state: a fixed-size line memory and a fresh pool.
        let mut memory: Vec<Option<String>> = vec![None; cfg.max_steps];
        let mut pool = TrajectoryPool::new();
        let mut completed = false;
        let mut accepted = 0usize;

        while accepted < cfg.max_steps {
            let prompt = synthesis_prompt(examples_prompt, question, &cfg.scaffold, &memory);
            let completions = self
                .model
                .generate_batch(SYSTEM_MESSAGE, &prompt, &options)
                .await
                .context("chain sampling failed")?;

            let accepted_lines: Vec<String> =
                memory.iter().flatten().cloned().collect();
            let mut known_prefixes = vec![cfg.scaffold.clone()];
            known_prefixes.extend(accepted_lines.iter().cloned());

            for completion in &completions {
                let chain = parse_action_chain(
                    completion,
                    &known_prefixes,
                    cfg.lookahead_depth,
                    cfg.lookahead_token_window,
                );
                if chain.lines.is_empty() {
                    continue;
                }
                let Some(probability) = chain.probability else {
                    warn!("sampled completion carried no log-probabilities; skipping");
                    continue;
                };

                // Anchor, then the already-accepted lines as confirmed steps,
                // then the fresh lookahead lines as unknown ones.
                let mut steps: Vec<RolloutStep> = Vec::new();
                for line in &accepted_lines {
                    let mut step = RolloutStep::from_action(line.clone());
                    step.verified = Verification::Confirmed;
                    steps.push(step);
                }
                steps.extend(chain.lines.iter().map(RolloutStep::from_action));

                let mut trajectory = Trajectory::new("", steps);
                trajectory.stamp_reward(probability);
                pool.push(trajectory);
            }

            // The leading None lines up with trajectory anchors.
            let mut history: Vec<Option<String>> = vec![None];
            history.extend(accepted_lines.iter().cloned().map(Some));

            let candidates = gather_candidates(&pool, &history, cfg.max_steps);
            debug!(
                candidates = candidates.len(),
                pool = pool.len(),
                accepted, "selecting next program line"
            );

            match select_weighted(
                &candidates,
                cfg.reward_threshold,
                cfg.select_temperature,
                cfg.do_sample,
                rng,
            ) {
                Some(line) => {
                    let terminal = cfg
                        .end_suffix
                        .as_deref()
                        .is_some_and(|suffix| line.contains(suffix));
                    memory[accepted] = Some(line);
                    accepted += 1;
                    if terminal {
                        completed = true;
                        break;
                    }
                }
                None => {
                    if let Some(note) =
                        exhausted_plans_note(&pool, question, &cfg.comment_indent)
                    {
                        memory[accepted] = Some(note);
                        accepted += 1;
                    }
                    break;
                }
            }
        }

        let mut program = cfg.scaffold.clone();
        for line in memory.iter().flatten() {
            program.push_str(line);
            if !line.ends_with('\n') {
                program.push('\n');
            }
        }

        info!(accepted, completed, "synthesis run finished");
        Ok(SynthesizedProgram {
            program,
            accepted_lines: accepted,
            completed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::api::RawCompletion;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Mutex;

    /// Model that replays canned batches of scored completions, in order.
    struct BatchModel {
        batches: Mutex<Vec<Vec<RawCompletion>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl BatchModel {
        fn new(mut batches: Vec<Vec<RawCompletion>>) -> Self {
            batches.reverse();
            Self {
                batches: Mutex::new(batches),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    impl CompletionModel for BatchModel {
        async fn generate(&self, _: &str, _: &str) -> Result<String> {
            unreachable!()
        }
        async fn generate_batch(
            &self,
            _system: &str,
            prompt: &str,
            _options: &GenerationOptions,
        ) -> Result<Vec<RawCompletion>> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.batches
                .lock()
                .unwrap()
                .pop()
                .context("batch model exhausted")
        }
        fn context_length(&self) -> usize {
            8192
        }
        fn max_completion_tokens(&self) -> usize {
            1024
        }
    }

    /// A scored completion whose tokens are its newline-terminated lines.
    fn scored(lines: &[&str], logprob_per_line: f64) -> RawCompletion {
        let text: String = lines.iter().map(|l| format!("{l}\n")).collect();
        let tokens: Vec<String> = lines.iter().map(|l| format!("{l}\n")).collect();
        let logprobs = vec![logprob_per_line; lines.len()];
        RawCompletion::Scored {
            text,
            tokens,
            logprobs,
        }
    }

    fn config(max_steps: usize, threshold: f64) -> SynthesisConfig {
        SynthesisConfig {
            max_steps,
            reward_threshold: threshold,
            do_sample: false,
            ..SynthesisConfig::default()
        }
    }

    #[tokio::test]
    async fn test_accepts_lines_until_end_suffix() {
        // Near-zero logprobs: probability ~ 1.0, clearing the 0.9 threshold.
        let batches = vec![
            vec![scored(&["    x = 2", "    return x"], -1e-6)],
            vec![scored(&["    return x"], -1e-6)],
        ];
        let model = BatchModel::new(batches);
        let synthesizer = ProgramSynthesizer::new(model, config(4, 0.9));
        let mut rng = StdRng::seed_from_u64(7);

        let result = synthesizer
            .synthesize("what is 2?", "", &mut rng)
            .await
            .unwrap();

        assert!(result.completed);
        assert_eq!(result.accepted_lines, 2);
        assert_eq!(result.program, "def solution():\n    x = 2\n    return x\n");
    }

    #[tokio::test]
    async fn test_exhaustion_appends_comment_note_and_stops() {
        // Deeply negative logprobs: probability ~ 0, below any threshold.
        let batches = vec![vec![scored(&["    x = guesswork()"], -50.0)]];
        let model = BatchModel::new(batches);
        let synthesizer = ProgramSynthesizer::new(model, config(4, 0.9));
        let mut rng = StdRng::seed_from_u64(7);

        let result = synthesizer
            .synthesize("what is 2?", "", &mut rng)
            .await
            .unwrap();

        assert!(!result.completed);
        assert!(result.program.contains("    # I have generated"));
        assert!(result.program.contains("x = guesswork()"));
        assert!(result.program.contains("what is 2?"));
    }

    #[tokio::test]
    async fn test_accepted_lines_are_replayed_into_the_next_prompt() {
        let batches = vec![
            vec![scored(&["    x = 2", "    y = 3"], -1e-6)],
            vec![scored(&["    return x"], -1e-6)],
        ];
        let model = BatchModel::new(batches);
        let synthesizer = ProgramSynthesizer::new(model, config(4, 0.9));
        let mut rng = StdRng::seed_from_u64(7);

        let result = synthesizer
            .synthesize("what is 2?", "Q: warmup\n\n", &mut rng)
            .await
            .unwrap();
        assert!(result.completed);

        let prompts = synthesizer.model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].starts_with("Q: warmup"));
        assert!(prompts[0].ends_with("def solution():\n"));
        // The accepted first line appears in the second prompt.
        assert!(prompts[1].ends_with("def solution():\n    x = 2\n"));
    }

    #[tokio::test]
    async fn test_generation_failure_surfaces_as_error() {
        let model = BatchModel::new(vec![]);
        let synthesizer = ProgramSynthesizer::new(model, config(4, 0.9));
        let mut rng = StdRng::seed_from_u64(7);
        assert!(synthesizer.synthesize("q", "", &mut rng).await.is_err());
    }

    #[tokio::test]
    async fn test_goal_similarity_kind_fails_fast() {
        let model = BatchModel::new(vec![]);
        let synthesizer = ProgramSynthesizer::new(
            model,
            SynthesisConfig {
                reward_kind: RewardKind::GoalSimilarity,
                ..SynthesisConfig::default()
            },
        );
        let mut rng = StdRng::seed_from_u64(7);
        assert!(synthesizer.synthesize("q", "", &mut rng).await.is_err());
    }
}
