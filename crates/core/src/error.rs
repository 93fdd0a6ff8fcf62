//! Error types for CalendarSync's core domain logic
//!
//! Mirrors the error taxonomy: configuration errors are fatal before any
//! network I/O; transform/filter errors surface per-event.

use thiserror::Error;

/// Errors raised while loading or validating the sync config file.
///
/// Configuration errors are always fatal before any adapter I/O happens.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("unknown transformer: {0}")]
    UnknownTransformer(String),

    #[error("invalid option for filter {filter}: {reason}")]
    InvalidFilterOption { filter: String, reason: String },

    #[error("invalid option for transformer {transformer}: {reason}")]
    InvalidTransformerOption { transformer: String, reason: String },

    #[error("unknown time identifier: {0}")]
    UnknownTimeIdentifier(String),
}

/// Errors raised while applying a transformer to an event.
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("transformed attendee address is not a valid email: {0}")]
    InvalidAttendeeEmail(String),
}

/// Result type alias for config operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
