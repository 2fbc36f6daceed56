//! Slack adapter.
//!
//! Receives events over Socket Mode and posts through the Web API. Addresses
//! look like `slack:<channel>` or `slack:<channel>:<thread_ts>`.

pub mod api;
pub mod channel;
pub mod events;
mod socket;
pub mod state;

pub use api::{ReactionOutcome, SlackTransport, SlackWebClient};
pub use channel::{SlackChannel, SlackConfig};

/// Address scheme owned by this adapter.
pub const SCHEME: &str = "slack";
