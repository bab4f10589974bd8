use serde::{Deserialize, Serialize};

use crate::reward::RewardKind;
use crate::verify::ScanMode;

/// Complete configuration for the remora planning engine.
///
/// All scalars are immutable for the lifetime of an episode: the engines copy
/// what they need at construction time and are never reconfigured mid-run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoraConfig {
    pub planning: PlanningConfig,
    pub synthesis: SynthesisConfig,
    pub model: ModelConfig,
}

/// Configuration for the interactive lookahead planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanningConfig {
    /// N-gram window size for cached-action matching (default: 3).
    pub n_gram: usize,
    /// Similarity above which two observations count as the same state
    /// (default: 0.5).
    pub similarity_threshold: f64,
    /// Reward a cached window must exceed to be trusted (default: 0.5).
    pub reward_threshold: f64,
    /// Trailing-action window for reflection matching (default: 2).
    pub reflection_window: usize,
    /// Maximum number of transcript entries kept in the prompt (default: 100).
    pub memory_size: usize,
    /// Which reward signal scores new trajectories (default: goal similarity).
    pub reward_kind: RewardKind,
    /// Verification scanning behavior (default: all matches).
    pub scan_mode: ScanMode,
    /// Prompt composition settings.
    pub prompt: PromptConfig,
}

/// Prompt composition for the lookahead planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    /// System message for every generation call.
    pub system_message: String,
    /// Task instruction placed at the top of the prompt.
    pub instruction: String,
    /// Few-shot example blocks.
    pub examples: Vec<String>,
    /// Whether to spell out the episode goal in the prompt.
    pub need_goal: bool,
    /// Helper command advertised for when an action is not understood.
    pub check_actions: Option<String>,
    /// Whether to advertise the inventory helper command.
    pub check_inventory: bool,
}

/// Configuration for the program-synthesis sampler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// How many lines of lookahead each sampled chain keeps (default: 3).
    pub lookahead_depth: usize,
    /// Optional fixed token budget per chain; overrides the line depth.
    pub lookahead_token_window: Option<usize>,
    /// Minimum chain probability to accept a cached line (default: 1.0).
    pub reward_threshold: f64,
    /// Temperature for the batched generation call (default: 0.7).
    pub beam_temperature: f64,
    /// Temperature for categorical selection over candidates (default: 0.1).
    pub select_temperature: f64,
    /// Completions sampled per synthesis step (default: 8).
    pub samples_per_step: usize,
    /// Maximum number of accepted lines before the loop stops (default: 16).
    pub max_steps: usize,
    /// Sample from the merged distribution instead of taking the argmax.
    pub do_sample: bool,
    /// Which reward signal scores chains (default: sequence log-probability).
    pub reward_kind: RewardKind,
    /// The scaffold line every synthesised program starts from.
    pub scaffold: String,
    /// Indentation used for in-context commentary lines.
    pub comment_indent: String,
    /// Substring that marks a chain-terminating line (e.g. `return`).
    pub end_suffix: Option<String>,
}

/// Model and collaborator endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Base URL for the generative model API.
    pub api_base: String,
    /// Model identifier (e.g. `"gpt-4o-mini"`).
    pub model_id: String,
    /// API key for the generative model.
    pub api_key: String,
    /// Maximum context length in tokens (default: 8192).
    pub context_length: usize,
    /// Maximum completion length in tokens (default: 1024).
    pub max_completion_tokens: usize,
    /// Base URL for the embedding model API.
    pub embedding_api_base: String,
    /// Model identifier for embeddings.
    pub embedding_model_id: String,
    /// API key for the embedding model.
    pub embedding_api_key: String,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            n_gram: 3,
            similarity_threshold: 0.5,
            reward_threshold: 0.5,
            reflection_window: 2,
            memory_size: 100,
            reward_kind: RewardKind::GoalSimilarity,
            scan_mode: ScanMode::AllMatches,
            prompt: PromptConfig::default(),
        }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system_message: "You are a helpful assistant.".into(),
            instruction: String::new(),
            examples: Vec::new(),
            need_goal: true,
            check_actions: Some("check valid actions".into()),
            check_inventory: false,
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            lookahead_depth: 3,
            lookahead_token_window: None,
            reward_threshold: 1.0,
            beam_temperature: 0.7,
            select_temperature: 0.1,
            samples_per_step: 8,
            max_steps: 16,
            do_sample: true,
            reward_kind: RewardKind::SequenceLogProb,
            scaffold: "def solution():\n".into(),
            comment_indent: "    ".into(),
            end_suffix: Some("return".into()),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".into(),
            model_id: "gpt-4o-mini".into(),
            api_key: String::new(),
            context_length: 8192,
            max_completion_tokens: 1024,
            embedding_api_base: "https://api.openai.com/v1".into(),
            embedding_model_id: "text-embedding-3-small".into(),
            embedding_api_key: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = RemoraConfig::default();
        assert_eq!(config.planning.n_gram, 3);
        assert_eq!(config.planning.reflection_window, 2);
        assert_eq!(config.synthesis.samples_per_step, 8);
        assert_eq!(config.synthesis.scaffold, "def solution():\n");
        assert_eq!(config.planning.reward_kind, RewardKind::GoalSimilarity);
        assert_eq!(config.synthesis.reward_kind, RewardKind::SequenceLogProb);
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = RemoraConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: RemoraConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.planning.n_gram, config.planning.n_gram);
        assert_eq!(parsed.synthesis.max_steps, config.synthesis.max_steps);
    }

    #[test]
    fn test_unknown_reward_kind_fails_at_parse_time() {
        let json = r#""something_else""#;
        assert!(serde_json::from_str::<RewardKind>(json).is_err());
    }
}
