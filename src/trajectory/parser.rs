//! Rollout parsing: raw model completions into structured steps.
//!
//! Model output is noisy, so parsing is deliberately tolerant: a line that
//! fits neither the `Action: <text>` pattern nor a recognised `Key: <value>`
//! pattern is skipped on its own, never failing the whole rollout.
//!
//! Two front-ends share this module:
//! - [`parse_rollout`] handles the interactive-agent format, where a rollout
//!   interleaves `Action:` and `Observation:` lines.
//! - [`parse_action_chain`] handles the program-synthesis format, where every
//!   generated line is an action and per-token log-probabilities may be
//!   attached for scoring.

use tracing::debug;

use crate::model::api::RawCompletion;
use crate::trajectory::types::RolloutStep;

// ---------------------------------------------------------------------------
// Interactive rollout parsing
// ---------------------------------------------------------------------------

/// The result of parsing one interactive rollout.
#[derive(Debug, Clone, Default)]
pub struct ParsedRollout {
    /// The structured steps, in the order they appeared.
    pub steps: Vec<RolloutStep>,
    /// The first action text, or empty if no action line was found.
    pub first_action: String,
}

/// Parse a raw multi-line completion into ordered [`RolloutStep`]s.
///
/// A line containing `Action:` opens a new step whose action is everything
/// after the first colon. Any other `Key: <value>` line attaches its value to
/// the currently open step (keys are case-normalised; only `observation` and
/// `reward` are meaningful for a typed step, anything else is dropped).
/// Lines with no colon, field lines arriving before the first action, and
/// unparseable reward values are all skipped individually.
pub fn parse_rollout(text: &str) -> ParsedRollout {
    let mut steps: Vec<RolloutStep> = Vec::new();

    for line in text.lines() {
        let lower = line.to_lowercase();

        if lower.contains("action:") {
            let value = match line.splitn(2, ':').nth(1) {
                Some(rest) => rest.trim(),
                None => continue,
            };
            steps.push(RolloutStep::from_action(value));
        } else if let Some((key, value)) = line.split_once(':') {
            let Some(current) = steps.last_mut() else {
                // Field line before any action line; nothing to attach to.
                continue;
            };
            match key.trim().to_lowercase().as_str() {
                "observation" => current.observation = Some(value.trim().to_string()),
                "reward" => {
                    if let Ok(r) = value.trim().parse::<f64>() {
                        current.reward = Some(r);
                    }
                }
                other => debug!(key = other, "skipping unrecognised rollout field"),
            }
        }
        // Lines matching neither pattern are silently skipped.
    }

    let first_action = steps
        .first()
        .and_then(|s| s.action.clone())
        .unwrap_or_default();

    ParsedRollout { steps, first_action }
}

// ---------------------------------------------------------------------------
// Program-synthesis chain parsing
// ---------------------------------------------------------------------------

/// A parsed action chain from one sampled completion, optionally scored.
#[derive(Debug, Clone)]
pub struct ActionChain {
    /// The first line of the chain (newline-terminated).
    pub first_action: String,
    /// The newline-terminated lines of the chain, in order.
    pub lines: Vec<String>,
    /// `exp(sum(logprobs))` over the tokens composing the chain, when the
    /// completion carried log-probability data.
    pub probability: Option<f64>,
}

/// Parse one sampled completion into an action chain.
///
/// `known_prefixes` holds the scaffold line and every already-accepted line;
/// when the model repeats one of them inside its output, everything up to and
/// including the repeated prefix is discarded. `max_depth` limits how many
/// lines of lookahead are kept when no `token_window` is given; with a
/// `token_window`, the chain is instead cut at that many tokens.
pub fn parse_action_chain(
    completion: &RawCompletion,
    known_prefixes: &[String],
    max_depth: usize,
    token_window: Option<usize>,
) -> ActionChain {
    match completion {
        RawCompletion::PlainText(text) => {
            let body = strip_known_prefixes(text, known_prefixes);
            let lines = split_chain(&body, Some(max_depth));
            let first_action = lines.first().cloned().unwrap_or_default();
            ActionChain {
                first_action,
                lines,
                probability: None,
            }
        }
        RawCompletion::Scored {
            text,
            tokens,
            logprobs,
        } => {
            let body = strip_known_prefixes(text, known_prefixes);

            if let Some(window) = token_window {
                // Fixed token budget: map the stripped body back onto the
                // token stream and keep at most `window` tokens.
                let (start, mut end) = token_span(text, &body, tokens);
                end = end.min(start + window);

                let chunk: String = tokens[start.min(tokens.len())..end.min(tokens.len())]
                    .iter()
                    .map(String::as_str)
                    .collect();
                let lines = split_chain(&chunk, None);
                let first_action = lines.first().cloned().unwrap_or_default();
                let probability = Some(span_probability(logprobs, start, end));

                ActionChain {
                    first_action,
                    lines,
                    probability,
                }
            } else {
                // Thought-count budget: keep the first `max_depth` lines and
                // score exactly the tokens that compose them.
                let lines = split_chain(&body, Some(max_depth));
                let first_action = lines.first().cloned().unwrap_or_default();
                let fragment: String = lines.concat();
                let (start, end) = token_span(text, &fragment, tokens);
                let probability = Some(span_probability(logprobs, start, end));

                ActionChain {
                    first_action,
                    lines,
                    probability,
                }
            }
        }
    }
}

/// Drop a repeated scaffold or history prefix from the generated text.
fn strip_known_prefixes(text: &str, known_prefixes: &[String]) -> String {
    let mut body = text.to_string();
    for prefix in known_prefixes {
        if prefix.is_empty() {
            continue;
        }
        if let Some(idx) = body.find(prefix.as_str()) {
            body = body[idx + prefix.len()..].to_string();
        }
    }
    body.trim_start_matches('\n').to_string()
}

/// Split a chain body into newline-terminated lines, optionally truncated.
///
/// A terminal newline does not produce a phantom empty action at the tail.
fn split_chain(body: &str, max_depth: Option<usize>) -> Vec<String> {
    if body.is_empty() {
        return Vec::new();
    }
    let mut segments: Vec<&str> = body.split('\n').collect();
    if segments.last() == Some(&"") {
        segments.pop();
    }
    let mut lines: Vec<String> = segments.iter().map(|l| format!("{l}\n")).collect();
    if let Some(depth) = max_depth {
        lines.truncate(depth);
    }
    lines
}

/// Map a character span of `fragment` inside `full_text` to a token-index
/// span, using cumulative per-token character lengths.
///
/// If the fragment cannot be located, or the mapped end index would precede
/// the start index, the span extends to the end of the token stream rather
/// than erroring: a truncated mapping must not lose the tail of the score.
pub fn token_span(full_text: &str, fragment: &str, tokens: &[String]) -> (usize, usize) {
    let Some(index_start) = full_text.find(fragment) else {
        return (0, tokens.len());
    };
    let index_end = index_start + fragment.len();

    let mut cumulative = 0usize;
    let mut token_start = None;
    let mut token_end = None;
    for (i, token) in tokens.iter().enumerate() {
        cumulative += token.len();
        if token_start.is_none() && cumulative > index_start {
            token_start = Some(i);
        }
        if token_end.is_none() && cumulative > index_end {
            token_end = Some(i);
        }
    }

    let start = token_start.unwrap_or(tokens.len());
    let mut end = token_end.unwrap_or(tokens.len());
    if end < start {
        end = tokens.len();
    }
    (start, end)
}

/// `exp(sum(logprobs[start..end]))`, with the span clamped to bounds.
fn span_probability(logprobs: &[f64], start: usize, end: usize) -> f64 {
    let start = start.min(logprobs.len());
    let end = end.min(logprobs.len());
    let total: f64 = logprobs[start..end].iter().sum();
    total.exp()
}
