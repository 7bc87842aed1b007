//! Error types and handling for genstart
//!
//! This module defines the error types used throughout the application,
//! providing consistent error handling and reporting.

use thiserror::Error;

/// Result type alias for genstart operations
pub type Result<T> = std::result::Result<T, GenstartError>;

/// Main error type for genstart
#[derive(Debug, Error)]
pub enum GenstartError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Bus (D-Bus) communication errors
    #[error("Bus error: {message}")]
    Bus { message: String },

    /// Settings mirror errors
    #[error("Settings error: {message}")]
    Settings { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl GenstartError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        GenstartError::Config {
            message: message.into(),
        }
    }

    /// Create a new bus error
    pub fn bus<S: Into<String>>(message: S) -> Self {
        GenstartError::Bus {
            message: message.into(),
        }
    }

    /// Create a new settings error
    pub fn settings<S: Into<String>>(message: S) -> Self {
        GenstartError::Settings {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        GenstartError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        GenstartError::Io {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        GenstartError::Generic {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for GenstartError {
    fn from(err: std::io::Error) -> Self {
        GenstartError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for GenstartError {
    fn from(err: serde_yaml::Error) -> Self {
        GenstartError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for GenstartError {
    fn from(err: serde_json::Error) -> Self {
        GenstartError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<zbus::Error> for GenstartError {
    fn from(err: zbus::Error) -> Self {
        GenstartError::bus(err.to_string())
    }
}

impl From<chrono::ParseError> for GenstartError {
    fn from(err: chrono::ParseError) -> Self {
        GenstartError::validation("datetime", &err.to_string())
    }
}
