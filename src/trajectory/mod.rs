//! Trajectory storage and rollout parsing.
//!
//! - [`types`] -- the tri-state verification flag, rollout steps, anchored
//!   trajectories, and the per-episode pool.
//! - [`parser`] -- tolerant parsing of raw model completions into steps and
//!   scored action chains.

pub mod parser;
pub mod types;

pub use parser::{parse_action_chain, parse_rollout, ActionChain, ParsedRollout};
pub use types::{RolloutStep, Trajectory, TrajectoryPool, Verification};
