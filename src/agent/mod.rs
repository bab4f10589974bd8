//! Agent drivers: episode state, the lookahead planner, and the program
//! synthesizer.

pub mod episode;
pub mod lookahead;
pub mod synthesis;

pub use episode::Episode;
pub use lookahead::{Decision, LookaheadPlanner};
pub use synthesis::{ProgramSynthesizer, SynthesizedProgram};
