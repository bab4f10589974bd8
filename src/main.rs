//! Remora: lookahead planning and trajectory verification for LLM agents
//!
//! Provides one subcommand per driver:
//!
//! - `plan`       -- Run the interactive lookahead planner against the
//!                   scripted demo environment
//! - `synthesize` -- Build a program line by line for a given question

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing_subscriber::EnvFilter;

use remora::agent::{Episode, LookaheadPlanner, ProgramSynthesizer};
use remora::config::RemoraConfig;
use remora::env::{Environment, ScriptedEnv};
use remora::model::embedding::{EmbeddingClient, EmbeddingSimilarity};
use remora::model::LlmClient;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// Remora: lookahead planning and trajectory verification for LLM agents
#[derive(Parser)]
#[command(name = "remora", version, about)]
struct Cli {
    /// Path to a JSON configuration file (uses defaults if not provided).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the lookahead planner on the scripted demo episode.
    Plan {
        /// Maximum number of real environment steps.
        #[arg(long, default_value_t = 10)]
        max_steps: usize,
    },

    /// Synthesize a program for a question, one accepted line at a time.
    Synthesize {
        /// The problem statement.
        question: String,

        /// Path to a file holding the few-shot examples prompt.
        #[arg(long)]
        examples: Option<PathBuf>,

        /// Seed for the selection RNG (random if not provided).
        #[arg(long)]
        seed: Option<u64>,
    },
}

// ---------------------------------------------------------------------------
// Entrypoint
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing (reads RUST_LOG env var, defaults to info).
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Load or create configuration.
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            serde_json::from_str::<RemoraConfig>(&text)
                .with_context(|| format!("Failed to parse config from {}", path.display()))?
        }
        None => RemoraConfig::default(),
    };

    // Fill in API keys from environment variables when not set in the config file.
    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        if config.model.api_key.is_empty() {
            config.model.api_key = key.clone();
        }
        if config.model.embedding_api_key.is_empty() {
            config.model.embedding_api_key = key;
        }
    }

    match cli.command {
        Commands::Plan { max_steps } => cmd_plan(&config, max_steps).await,
        Commands::Synthesize {
            question,
            examples,
            seed,
        } => cmd_synthesize(&config, &question, examples.as_deref(), seed).await,
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_plan(config: &RemoraConfig, max_steps: usize) -> Result<()> {
    let model = build_model(config);
    let oracle = EmbeddingSimilarity::new(EmbeddingClient::new(
        &config.model.embedding_api_base,
        &config.model.embedding_api_key,
        &config.model.embedding_model_id,
    ));
    let planner = LookaheadPlanner::new(model, oracle, config.planning.clone());

    let mut env = ScriptedEnv::demo();
    let reset = env.reset().await?;
    let mut episode = Episode::new(env.goal(), reset.text);

    tracing::info!(goal = %episode.goal, "starting episode");

    let mut success = false;
    while episode.steps_taken < max_steps.min(env.max_steps()) {
        let decision = planner.decide(&mut episode).await?;
        let obs = env.step(&decision.action).await?;

        tracing::info!(
            step = episode.steps_taken + 1,
            action = %decision.action,
            from_cache = decision.from_cache,
            observation = %obs.text,
            "executed step"
        );
        episode.record(decision.action, obs.text);

        if obs.done {
            success = obs.reward > 0.0;
            break;
        }
    }

    tracing::info!(
        success,
        steps = episode.steps_taken,
        cache_hits = episode.cache_hits,
        pool = episode.pool.len(),
        "episode finished"
    );
    Ok(())
}

async fn cmd_synthesize(
    config: &RemoraConfig,
    question: &str,
    examples: Option<&std::path::Path>,
    seed: Option<u64>,
) -> Result<()> {
    let examples_prompt = match examples {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read examples from {}", path.display()))?,
        None => String::new(),
    };

    let model = build_model(config);
    let synthesizer = ProgramSynthesizer::new(model, config.synthesis.clone());

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let result = synthesizer
        .synthesize(question, &examples_prompt, &mut rng)
        .await?;

    tracing::info!(
        accepted_lines = result.accepted_lines,
        completed = result.completed,
        "synthesis finished"
    );
    println!("{}", result.program);
    Ok(())
}

fn build_model(config: &RemoraConfig) -> LlmClient {
    LlmClient::new(
        &config.model.api_base,
        &config.model.api_key,
        &config.model.model_id,
        config.model.context_length,
        config.model.max_completion_tokens,
    )
}
