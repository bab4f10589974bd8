//! Prompt assembly for the lookahead planner and the program synthesizer.
//!
//! The lookahead prompt is rebuilt from scratch every turn: instruction,
//! few-shot examples, goal, the labeled transcript of real actions and
//! observations, an optional reflection tip, and a trailing cue asking the
//! model to continue with interleaved `Action:` / `Observation:` lines.
//!
//! [`trimmed_lookahead_prompt`] enforces the context budget by dropping the
//! oldest transcript pair and rebuilding until the token estimate fits. The
//! loop always terminates: the transcript shrinks by one pair per iteration
//! and an empty transcript is a valid prompt.

use tracing::debug;

use crate::config::PromptConfig;
use crate::model::api::{ChatMessage, CompletionModel};

// ---------------------------------------------------------------------------
// Lookahead prompt
// ---------------------------------------------------------------------------

/// Build the full lookahead prompt for one generation turn.
///
/// `transcript` holds the real `(action, observation)` pairs executed so far,
/// oldest first. `tip` is a reflection hint, rendered as a `Thought:` line
/// just before the continuation cue so it reads as the agent's own thinking.
pub fn lookahead_prompt(
    config: &PromptConfig,
    goal: &str,
    init_observation: &str,
    transcript: &[(String, String)],
    tip: Option<&str>,
) -> String {
    let mut out = String::new();

    if !config.instruction.is_empty() {
        out.push_str(&config.instruction);
        out.push('\n');
    }
    for example in &config.examples {
        out.push_str(example);
        out.push('\n');
    }
    if config.need_goal {
        out.push_str(&format!("Your goal: {goal}\n"));
    }
    if let Some(helper) = &config.check_actions {
        out.push_str(&format!(
            "If your action is not valid, you can use `{helper}` to see the list of valid actions.\n"
        ));
    }
    if config.check_inventory {
        out.push_str("You can use `inventory` to check your current inventory.\n");
    }

    out.push_str(&format!("Observation: {init_observation}\n"));
    for (action, observation) in transcript {
        out.push_str(&format!("Action: {action}\n"));
        out.push_str(&format!("Observation: {observation}\n"));
    }

    if let Some(tip) = tip {
        out.push_str(&format!("Thought: {tip}\n"));
    }
    out.push_str("Actions and Observations: ");
    out
}

/// Build the lookahead prompt, shrinking the transcript until it fits the
/// model's context budget.
///
/// The budget is `context_length - max_completion_tokens`; the estimate comes
/// from [`CompletionModel::count_tokens`] over the system and user messages.
/// Pairs are dropped oldest first, one per iteration.
pub fn trimmed_lookahead_prompt<M: CompletionModel>(
    model: &M,
    config: &PromptConfig,
    goal: &str,
    init_observation: &str,
    transcript: &[(String, String)],
    tip: Option<&str>,
) -> String {
    let budget = model
        .context_length()
        .saturating_sub(model.max_completion_tokens());

    let mut kept = transcript;
    loop {
        let prompt = lookahead_prompt(config, goal, init_observation, kept, tip);
        let messages = [
            ChatMessage::system(&config.system_message),
            ChatMessage::user(&prompt),
        ];
        if model.count_tokens(&messages) <= budget || kept.is_empty() {
            if kept.len() < transcript.len() {
                debug!(
                    dropped = transcript.len() - kept.len(),
                    "trimmed oldest transcript pairs to fit context"
                );
            }
            return prompt;
        }
        kept = &kept[1..];
    }
}

// ---------------------------------------------------------------------------
// Synthesis prompt
// ---------------------------------------------------------------------------

/// Build the program-synthesis prompt: few-shot examples, the question, the
/// scaffold line, and every line accepted so far.
///
/// `accepted` is the fixed-size line memory; unfilled slots are `None` and
/// are skipped. Accepted lines are stored newline-terminated, so they are
/// concatenated as-is.
pub fn synthesis_prompt(
    examples_prompt: &str,
    question: &str,
    scaffold: &str,
    accepted: &[Option<String>],
) -> String {
    let mut out = String::new();
    out.push_str(examples_prompt);
    out.push_str(&format!(
        "Solve this problem following previous examples:\nQ: {question}\n\n\
         # Finish the solution in Python:\n\n\n"
    ));
    out.push_str(scaffold);
    for line in accepted.iter().flatten() {
        out.push_str(line);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use crate::model::api::{GenerationOptions, RawCompletion};

    fn config() -> PromptConfig {
        PromptConfig {
            instruction: "Interact with the household to solve the task.".into(),
            examples: vec!["Example:\nAction: look\nObservation: a kitchen\n".into()],
            ..PromptConfig::default()
        }
    }

    #[test]
    fn test_prompt_layers_in_order() {
        let transcript = vec![("open door".to_string(), "the door opens".to_string())];
        let prompt = lookahead_prompt(&config(), "find the key", "a hallway", &transcript, None);

        let instruction_at = prompt.find("Interact with").unwrap();
        let goal_at = prompt.find("Your goal: find the key").unwrap();
        let init_at = prompt.find("Observation: a hallway").unwrap();
        let action_at = prompt.find("Action: open door").unwrap();
        assert!(instruction_at < goal_at);
        assert!(goal_at < init_at);
        assert!(init_at < action_at);
        assert!(prompt.ends_with("Actions and Observations: "));
    }

    #[test]
    fn test_tip_renders_as_thought_before_cue() {
        let prompt = lookahead_prompt(&config(), "goal", "start", &[], Some("try something new"));
        let thought_at = prompt.find("Thought: try something new").unwrap();
        let cue_at = prompt.find("Actions and Observations: ").unwrap();
        assert!(thought_at < cue_at);
    }

    #[test]
    fn test_goal_line_respects_need_goal() {
        let mut c = config();
        c.need_goal = false;
        let prompt = lookahead_prompt(&c, "find the key", "start", &[], None);
        assert!(!prompt.contains("Your goal"));
    }

    /// A model whose context budget only admits a handful of tokens.
    struct TinyContext;

    impl CompletionModel for TinyContext {
        async fn generate(&self, _: &str, _: &str) -> Result<String> {
            unreachable!()
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
            120
        }
        fn max_completion_tokens(&self) -> usize {
            20
        }
    }

    #[test]
    fn test_trimming_drops_oldest_pairs_first() {
        let transcript: Vec<(String, String)> = (0..10)
            .map(|i| (format!("action number {i}"), format!("observation number {i}")))
            .collect();
        let prompt =
            trimmed_lookahead_prompt(&TinyContext, &config(), "goal", "start", &transcript, None);

        // The newest pair survives, the oldest does not.
        assert!(prompt.contains("action number 9"));
        assert!(!prompt.contains("action number 0"));
    }

    #[test]
    fn test_trimming_converges_on_empty_transcript() {
        let transcript = vec![("a".repeat(2000), "b".repeat(2000))];
        let prompt =
            trimmed_lookahead_prompt(&TinyContext, &config(), "goal", "start", &transcript, None);
        assert!(!prompt.contains(&"a".repeat(2000)));
        assert!(prompt.ends_with("Actions and Observations: "));
    }

    #[test]
    fn test_synthesis_prompt_includes_accepted_lines() {
        let accepted = vec![
            Some("    x = 2\n".to_string()),
            None,
            Some("    y = x + 1\n".to_string()),
        ];
        let prompt = synthesis_prompt(
            "Q: example question\n\ndef solution():\n    return 0\n\n",
            "what is 2 + 1?",
            "def solution():\n",
            &accepted,
        );

        assert!(prompt.contains("Q: what is 2 + 1?"));
        assert!(prompt.contains("# Finish the solution in Python:"));
        assert!(prompt.ends_with("def solution():\n    x = 2\n    y = x + 1\n"));
    }
}
