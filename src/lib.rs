//! Remora: lookahead planning and trajectory verification for LLM agents.
//!
//! Instead of calling the model every turn, the agent caches the multi-step
//! rollouts the model predicts, verifies them step by step against what the
//! environment actually does, and replays cached actions whenever a verified,
//! well-rewarded prediction matches the recent history. Two drivers share the
//! machinery:
//!
//! - the interactive lookahead planner, which scores rollouts by goal
//!   similarity and serves one environment action per turn;
//! - the program synthesizer, which scores sampled line chains by their joint
//!   token probability and assembles a program line by line.

pub mod agent;
pub mod config;
pub mod decision;
pub mod env;
pub mod model;
pub mod reflect;
pub mod reward;
pub mod trajectory;
pub mod verify;
