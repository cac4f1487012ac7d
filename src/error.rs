//! Error types for Ridepool
//!
//! This module defines all error types used throughout the application,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for Ridepool operations
///
/// This enum encompasses all possible errors that can occur while handling
/// inbound messages, resolving locations, talking to the grid store, and
/// dispatching notifications.
#[derive(Error, Debug)]
pub enum RidepoolError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Inbound request failed signature validation
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Inbound request was malformed (missing body, undecodable form data)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Geocoding produced no usable coordinate for a location
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// Remote grid store call failed
    #[error("Store error: {0}")]
    Store(String),

    /// Outbound notification send failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Completion queue publish or receive failed
    #[error("Queue error: {0}")]
    Queue(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for Ridepool operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;
