//! Error types for hubkit
//!
//! This module defines all error types used throughout the crate, plus the
//! [`FailureClass`] that decides how a polling loop reacts to a failure.

use thiserror::Error;

/// Result type alias for hubkit operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for hubkit
#[derive(Error, Debug)]
pub enum Error {
    /// The device or service could not be reached during setup or validation
    #[error("Cannot connect: {0}")]
    CannotConnect(String),

    /// Credentials were rejected by the device or service
    #[error("Invalid authentication: {0}")]
    InvalidAuth(String),

    /// A steady-state poll failed; the device is treated as offline
    #[error("Device offline: {0}")]
    Transient(String),

    /// A failure that retrying will not fix
    #[error("Fatal error: {0}")]
    Fatal(String),

    /// The operation was cancelled by its owner
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Config entry store errors
    #[error("Entry store error: {0}")]
    EntryStore(String),

    /// A device payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Requested item does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A config entry with the same unique id already exists
    #[error("Already configured: {0}")]
    AlreadyConfigured(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Integration-specific error
    #[error("Integration error ({domain}): {message}")]
    Integration {
        /// Integration domain
        domain: String,
        /// Error message
        message: String,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// How a caller should react to an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Mark the device offline and try again after the retry interval
    Transient,
    /// Stop retrying; human intervention is required
    Fatal,
    /// The owner asked us to stop; exit without retrying
    Cancelled,
}

impl Error {
    /// Create a cannot-connect error
    pub fn cannot_connect(msg: impl Into<String>) -> Self {
        Self::CannotConnect(msg.into())
    }

    /// Create an invalid-auth error
    pub fn invalid_auth(msg: impl Into<String>) -> Self {
        Self::InvalidAuth(msg.into())
    }

    /// Create a transient (device offline) error
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Create a fatal error
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an entry store error
    pub fn entry_store(msg: impl Into<String>) -> Self {
        Self::EntryStore(msg.into())
    }

    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create an integration-specific error
    pub fn integration(domain: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Integration {
            domain: domain.into(),
            message: message.into(),
        }
    }

    /// Classify this error for retry decisions
    ///
    /// Unknown errors (`Other`) are treated as transient so that a device
    /// with an unexpected hiccup keeps being polled.
    pub fn class(&self) -> FailureClass {
        match self {
            Error::CannotConnect(_)
            | Error::Transient(_)
            | Error::Decode(_)
            | Error::Io(_)
            | Error::Other(_) => FailureClass::Transient,
            Error::Cancelled => FailureClass::Cancelled,
            Error::InvalidAuth(_)
            | Error::Fatal(_)
            | Error::Config(_)
            | Error::EntryStore(_)
            | Error::NotFound(_)
            | Error::AlreadyConfigured(_)
            | Error::InvalidInput(_)
            | Error::Integration { .. }
            | Error::Json(_) => FailureClass::Fatal,
        }
    }

    /// Check whether retrying later may succeed
    pub fn is_transient(&self) -> bool {
        self.class() == FailureClass::Transient
    }

    /// The config flow form error key for this error
    ///
    /// Anything that is neither a connection nor an authentication failure
    /// is reported to the user as `unknown`.
    pub fn form_error_key(&self) -> &'static str {
        match self {
            Error::CannotConnect(_) | Error::Transient(_) | Error::Io(_) => "cannot_connect",
            Error::InvalidAuth(_) => "invalid_auth",
            _ => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_classes() {
        assert_eq!(Error::transient("gone").class(), FailureClass::Transient);
        assert_eq!(Error::cannot_connect("refused").class(), FailureClass::Transient);
        assert_eq!(Error::Other("boom".into()).class(), FailureClass::Transient);
        assert_eq!(Error::invalid_auth("bad key").class(), FailureClass::Fatal);
        assert_eq!(Error::config("missing host").class(), FailureClass::Fatal);
        assert_eq!(Error::Cancelled.class(), FailureClass::Cancelled);
    }

    #[test]
    fn test_form_error_keys() {
        assert_eq!(Error::cannot_connect("x").form_error_key(), "cannot_connect");
        assert_eq!(Error::invalid_auth("x").form_error_key(), "invalid_auth");
        assert_eq!(Error::decode("x").form_error_key(), "unknown");
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(Error::from(io).form_error_key(), "cannot_connect");
    }
}
