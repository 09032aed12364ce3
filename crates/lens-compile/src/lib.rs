//! Compiler - transforms a validated specification into a query plan
//!
//! The plan is storage agnostic: relation chains become deduplicated join
//! steps with stable aliases, and every output column carries its kind so the
//! result shaper never has to guess.

mod compiler;
mod explain;

pub use compiler::{CompileError, Compiler};
pub use explain::explain;
