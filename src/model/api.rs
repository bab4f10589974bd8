//! OpenAI-compatible LLM API client and the completion-model contract.
//!
//! Provides typed request/response structures, the [`CompletionModel`] trait
//! the planning engine generates through, and a [`LlmClient`] implementation
//! over `/chat/completions` supporting multi-sample requests with per-token
//! log-probabilities (needed to score synthesised action chains).

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// A single message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The role of the message author: `"system"`, `"user"`, or `"assistant"`.
    pub role: String,
    /// The textual content of the message.
    pub content: String,
}

impl ChatMessage {
    /// Convenience constructor for a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Convenience constructor for a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Token-level log-probability information returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenLogProb {
    /// The token string.
    pub token: String,
    /// The log probability of this token.
    pub logprob: f64,
}

/// Log-probability information attached to a choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceLogProbs {
    /// Per-token log-probability entries.
    pub content: Option<Vec<TokenLogProb>>,
}

/// A single completion choice returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    /// Zero-based index of this choice within the response.
    pub index: usize,
    /// The generated message.
    pub message: ChatMessage,
    /// The reason the model stopped generating (e.g. `"stop"`, `"length"`).
    pub finish_reason: Option<String>,
    /// Optional log-probability information (present when requested).
    #[serde(default)]
    pub logprobs: Option<ChoiceLogProbs>,
}

/// Token usage statistics for a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: usize,
    /// Tokens generated in the completion.
    pub completion_tokens: usize,
    /// Total tokens (prompt + completion).
    pub total_tokens: usize,
}

/// A chat completion response from the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Unique identifier for this completion.
    pub id: String,
    /// The list of generated choices.
    pub choices: Vec<Choice>,
    /// Token usage statistics.
    pub usage: Usage,
}

// ---------------------------------------------------------------------------
// Generation options and tagged completions
// ---------------------------------------------------------------------------

/// Options for a batched sampling request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Number of completions to sample.
    pub n: usize,
    /// Maximum tokens per completion.
    pub max_tokens: usize,
    /// Sampling temperature.
    pub temperature: f64,
    /// Nucleus sampling parameter.
    pub top_p: f64,
    /// Stop sequences.
    pub stop: Vec<String>,
    /// Whether to request per-token log-probabilities.
    pub logprobs: bool,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            n: 1,
            max_tokens: 1024,
            temperature: 0.7,
            top_p: 1.0,
            stop: Vec::new(),
            logprobs: false,
        }
    }
}

/// One sampled completion, tagged by whether token-level scores came back.
///
/// Dispatching on this enum replaces shape-sniffing the response: callers
/// that asked for log-probabilities get `Scored`, everyone else `PlainText`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RawCompletion {
    /// Text only.
    PlainText(String),
    /// Text plus the token stream and per-token log-probabilities.
    Scored {
        text: String,
        tokens: Vec<String>,
        logprobs: Vec<f64>,
    },
}

impl RawCompletion {
    /// The completion text regardless of variant.
    pub fn text(&self) -> &str {
        match self {
            RawCompletion::PlainText(t) => t,
            RawCompletion::Scored { text, .. } => text,
        }
    }
}

// ---------------------------------------------------------------------------
// Completion-model contract
// ---------------------------------------------------------------------------

/// The generative-model capabilities the planning engine relies on.
///
/// The concrete client lives below; tests supply scripted implementations.
/// Both generation calls are the engine's only suspension points; a failed or
/// cancelled call surfaces as an `Err` and the caller treats it as a
/// generation failure for the current turn.
#[allow(async_fn_in_trait)]
pub trait CompletionModel: Send + Sync {
    /// Generate a single completion for `prompt` under `system`.
    async fn generate(&self, system: &str, prompt: &str) -> Result<String>;

    /// Generate `options.n` sampled completions, optionally with per-token
    /// log-probabilities.
    async fn generate_batch(
        &self,
        system: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<Vec<RawCompletion>>;

    /// Estimate the token count of a structured message list.
    fn count_tokens(&self, messages: &[ChatMessage]) -> usize {
        // Rough estimate (4 chars ~ 1 token), same heuristic the prompt
        // budget uses when no tokenizer is available.
        messages
            .iter()
            .map(|m| (m.role.len() + m.content.len()) / 4)
            .sum()
    }

    /// Maximum context length in tokens.
    fn context_length(&self) -> usize;

    /// Maximum completion length in tokens.
    fn max_completion_tokens(&self) -> usize;
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP client for an OpenAI-compatible chat completions API.
///
/// Wraps [`reqwest::Client`] with the base URL, API key, and model identifier
/// needed to call `POST {base_url}/chat/completions`. The request timeout is
/// the cancellation boundary: a timed-out call comes back as an error and the
/// turn fails without touching any engine state.
#[derive(Debug, Clone)]
pub struct LlmClient {
    api_base: String,
    api_key: String,
    model_id: String,
    context_length: usize,
    max_completion_tokens: usize,
    http: reqwest::Client,
}

impl LlmClient {
    /// Create a new client.
    pub fn new(
        base_url: &str,
        api_key: &str,
        model_id: &str,
        context_length: usize,
        max_completion_tokens: usize,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("failed to build reqwest client");

        Self {
            api_base: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model_id: model_id.to_string(),
            context_length,
            max_completion_tokens,
            http,
        }
    }

    /// Send a chat completion request and return the parsed response.
    pub async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.api_base);
        debug!(
            model = %self.model_id,
            n = options.n,
            temperature = options.temperature,
            max_tokens = options.max_tokens,
            logprobs = options.logprobs,
            "sending chat completion request"
        );

        let mut body = serde_json::json!({
            "model": self.model_id,
            "messages": messages,
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
            "top_p": options.top_p,
            "n": options.n,
        });
        if !options.stop.is_empty() {
            body["stop"] = serde_json::json!(options.stop);
        }
        if options.logprobs {
            body["logprobs"] = serde_json::json!(true);
        }

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to send chat completion request")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("chat completion API returned {status}: {text}");
        }

        let chat_response: ChatResponse = resp
            .json()
            .await
            .context("failed to parse chat completion response")?;

        info!(
            model = %self.model_id,
            choices = chat_response.choices.len(),
            prompt_tokens = chat_response.usage.prompt_tokens,
            completion_tokens = chat_response.usage.completion_tokens,
            "chat completion succeeded"
        );

        Ok(chat_response)
    }
}

impl CompletionModel for LlmClient {
    async fn generate(&self, system: &str, prompt: &str) -> Result<String> {
        let messages = vec![ChatMessage::system(system), ChatMessage::user(prompt)];
        let options = GenerationOptions {
            max_tokens: self.max_completion_tokens,
            ..GenerationOptions::default()
        };
        let resp = self.chat_completion(&messages, &options).await?;
        Ok(resp
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default())
    }

    async fn generate_batch(
        &self,
        system: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<Vec<RawCompletion>> {
        let messages = vec![ChatMessage::system(system), ChatMessage::user(prompt)];
        let resp = self.chat_completion(&messages, options).await?;

        let completions = resp
            .choices
            .into_iter()
            .map(|choice| {
                let text = choice.message.content;
                match choice.logprobs.and_then(|lp| lp.content) {
                    Some(entries) if options.logprobs => {
                        let tokens = entries.iter().map(|t| t.token.clone()).collect();
                        let logprobs = entries.iter().map(|t| t.logprob).collect();
                        RawCompletion::Scored {
                            text,
                            tokens,
                            logprobs,
                        }
                    }
                    _ => RawCompletion::PlainText(text),
                }
            })
            .collect();

        Ok(completions)
    }

    fn context_length(&self) -> usize {
        self.context_length
    }

    fn max_completion_tokens(&self) -> usize {
        self.max_completion_tokens
    }
}
