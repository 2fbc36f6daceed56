//! Agent backend abstraction (Claude CLI today).

pub mod client;
pub mod types;
