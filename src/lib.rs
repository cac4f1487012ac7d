//! Ridepool - SMS ride-matching service library
//!
//! Pairs strangers requesting similar rides: trip details are collected
//! through a multi-turn SMS conversation, endpoints are geocoded, and
//! compatible pending requests in a shared grid store are claimed into a
//! match.
//!
//! # Architecture
//!
//! - `session`: per-phone-number conversation state machine
//! - `matching`: the coordinator that finds, claims, and commits matches
//! - `grid`: remote tabular store model and HTTP client
//! - `geo`: location resolution and coordinate fingerprinting
//! - `queue`: completion queue publish/consume
//! - `sms`: outbound sends and webhook signature validation
//! - `notify`: match and confirmation message fan-out
//! - `webhook`: axum HTTP surface for inbound messages
//! - `config`: configuration management and validation
//! - `error`: error types and result aliases

pub mod cli;
pub mod config;
pub mod error;
pub mod geo;
pub mod grid;
pub mod matching;
pub mod notify;
pub mod queue;
pub mod session;
pub mod sms;
pub mod webhook;

// Re-export commonly used types
pub use config::Config;
pub use error::{Result, RidepoolError};
pub use matching::{MatchCoordinator, MatchWorker};
pub use session::{ConversationEngine, ConversationReply, Session};

#[cfg(test)]
pub mod test_utils;
