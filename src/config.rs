//! Configuration management for Ridepool
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files and environment variables.

use crate::error::{Result, RidepoolError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure for Ridepool
///
/// Holds everything the service needs: webhook server binding, grid store
/// credentials and collection ids, SMS provider credentials, geocoder
/// endpoint, completion queue location, and matching behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Webhook server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Remote grid store configuration
    pub grid: GridConfig,

    /// SMS provider configuration
    pub sms: SmsConfig,

    /// Geocoder configuration
    #[serde(default)]
    pub geocoder: GeocoderConfig,

    /// Completion queue configuration
    pub queue: QueueConfig,

    /// Matching behavior configuration
    #[serde(default)]
    pub matching: MatchingConfig,
}

/// Webhook server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind the webhook server to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Public base URL the SMS provider posts to; used to recompute
    /// inbound signatures, so it must match the provider's configured URL
    #[serde(default)]
    pub public_url: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            public_url: None,
        }
    }
}

/// Remote grid store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Base URL of the grid API
    #[serde(default = "default_grid_base_url")]
    pub base_url: String,

    /// Auth id sent with every grid request; falls back to
    /// `RIDEPOOL_GRID_AUTH_ID` when empty
    #[serde(default)]
    pub auth_id: String,

    /// Grid id holding conversation sessions
    pub sessions_grid_id: String,

    /// Grid id holding trip requests
    pub rides_grid_id: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_grid_base_url() -> String {
    "https://www.bigparser.com/api/v2".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

/// SMS provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsConfig {
    /// Base URL of the SMS provider API
    pub api_base: String,

    /// Account identifier
    pub account_sid: String,

    /// Shared secret; signs outbound requests and validates inbound
    /// webhook signatures. Falls back to `RIDEPOOL_SMS_AUTH_TOKEN` when empty
    #[serde(default)]
    pub auth_token: String,

    /// Number outbound messages are sent from
    pub from_number: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Geocoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocoderConfig {
    /// Base URL of the geocoding API
    #[serde(default = "default_geocoder_base_url")]
    pub base_url: String,

    /// API key; falls back to `RIDEPOOL_GEOCODER_API_KEY` when empty
    #[serde(default)]
    pub api_key: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_geocoder_base_url() -> String {
    "https://maps.googleapis.com/maps/api/geocode".to_string()
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            base_url: default_geocoder_base_url(),
            api_key: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Completion queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Base URL of the queue API
    pub base_url: String,

    /// Queue name for session-completion events
    #[serde(default = "default_queue_name")]
    pub completed_queue: String,

    /// Seconds the worker waits between empty polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Messages leased per receive call
    #[serde(default = "default_receive_batch")]
    pub receive_batch: usize,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_queue_name() -> String {
    "session-completed".to_string()
}

fn default_poll_interval() -> u64 {
    5
}

fn default_receive_batch() -> usize {
    1
}

/// Matching behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Minutes a trip request stays eligible before it is considered stale
    #[serde(default = "default_expiry_minutes")]
    pub expiry_minutes: i64,
}

fn default_expiry_minutes() -> i64 {
    10
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            expiry_minutes: default_expiry_minutes(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file, applying environment overrides
    /// for secrets.
    ///
    /// # Environment Variables
    ///
    /// * `RIDEPOOL_GRID_AUTH_ID` - grid store auth id
    /// * `RIDEPOOL_SMS_AUTH_TOKEN` - SMS provider shared secret
    /// * `RIDEPOOL_GEOCODER_API_KEY` - geocoder API key
    ///
    /// # Errors
    ///
    /// Returns `RidepoolError::Config` when the file cannot be read and
    /// `RidepoolError::Yaml` when it cannot be parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            RidepoolError::Config(format!(
                "failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let mut config: Config = serde_yaml::from_str(&contents).map_err(RidepoolError::Yaml)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment-variable overrides for secret values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(auth_id) = std::env::var("RIDEPOOL_GRID_AUTH_ID") {
            self.grid.auth_id = auth_id;
        }
        if let Ok(token) = std::env::var("RIDEPOOL_SMS_AUTH_TOKEN") {
            self.sms.auth_token = token;
        }
        if let Ok(key) = std::env::var("RIDEPOOL_GEOCODER_API_KEY") {
            self.geocoder.api_key = key;
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `RidepoolError::Config` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.grid.auth_id.is_empty() {
            return Err(RidepoolError::Config(
                "grid.auth_id is required (or set RIDEPOOL_GRID_AUTH_ID)".to_string(),
            )
            .into());
        }
        if self.grid.sessions_grid_id.is_empty() {
            return Err(RidepoolError::Config("grid.sessions_grid_id is required".to_string()).into());
        }
        if self.grid.rides_grid_id.is_empty() {
            return Err(RidepoolError::Config("grid.rides_grid_id is required".to_string()).into());
        }
        if self.sms.auth_token.is_empty() {
            return Err(RidepoolError::Config(
                "sms.auth_token is required (or set RIDEPOOL_SMS_AUTH_TOKEN)".to_string(),
            )
            .into());
        }
        if self.sms.from_number.is_empty() {
            return Err(RidepoolError::Config("sms.from_number is required".to_string()).into());
        }
        if self.queue.base_url.is_empty() {
            return Err(RidepoolError::Config("queue.base_url is required".to_string()).into());
        }
        if self.matching.expiry_minutes <= 0 {
            return Err(RidepoolError::Config(
                "matching.expiry_minutes must be positive".to_string(),
            )
            .into());
        }
        Ok(())
    }
}
