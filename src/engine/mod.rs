//! The Conditional Flow Interpreter: value coercion, variable substitution,
//! transformations, condition evaluation and the recursive flow walker.

pub mod coerce;
pub mod condition;
pub mod flow;
pub mod substitute;
pub mod transform;


pub use flow::{fold_key_value_pairs, process, FlowEnv, FlowError, FlowOutcome};
