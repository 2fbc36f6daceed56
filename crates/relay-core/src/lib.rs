//! Core addressing, routing and rendering for the multi-channel agent relay.
//!
//! This crate is framework-agnostic. Slack / Telegram / Claude CLI / OpenAI live
//! behind ports (traits) implemented in adapter crates.

pub mod config;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod groups;
pub mod logging;
pub mod messaging;
pub mod model;
pub mod ports;
pub mod router;
pub mod storage;
pub mod utils;

pub use errors::{Error, Result};
