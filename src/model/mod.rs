//! Model integration: completion API, embeddings, and prompt assembly.

pub mod api;
pub mod embedding;
pub mod prompt;

pub use api::{
    ChatMessage, ChatResponse, CompletionModel, GenerationOptions, LlmClient, RawCompletion,
};
pub use embedding::{EmbeddingClient, EmbeddingSimilarity, SimilarityOracle};
