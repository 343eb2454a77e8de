//! Error handling for the distance monitor
//!
//! This module defines the error taxonomy of the acquisition pipeline and a
//! Result alias for use throughout the application.
//!
//! - [`LinkError`] - connection lifecycle failures. Fatal to a session.
//! - [`ParseError`] - a single bad line from the device. Recovered locally.
//! - [`MonitorError`] - crate-wide error wrapping both plus config/export failures.
//!
//! A read timeout is not an error: [`crate::backend::LinkHandle::read_line`]
//! reports it as `Ok(None)`.

use crate::types::LinkState;
use thiserror::Error;

/// Errors raised by the serial link
#[derive(Error, Debug)]
pub enum LinkError {
    /// The port could not be opened (busy, missing, permission denied, or
    /// already held by another handle in this process)
    #[error("Port {port} unavailable: {source}")]
    PortUnavailable {
        port: String,
        #[source]
        source: std::io::Error,
    },

    /// Writing a control byte failed
    #[error("Write to {port} failed: {source}")]
    WriteFailed {
        port: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading from the device failed
    #[error("Read from {port} failed: {source}")]
    ReadFailed {
        port: String,
        #[source]
        source: std::io::Error,
    },

    /// An I/O operation was attempted while the link was not open
    #[error("Link to {port} is {state}, expected Open")]
    NotOpen { port: String, state: LinkState },
}

impl LinkError {
    /// Port the error refers to
    pub fn port(&self) -> &str {
        match self {
            LinkError::PortUnavailable { port, .. }
            | LinkError::WriteFailed { port, .. }
            | LinkError::ReadFailed { port, .. }
            | LinkError::NotOpen { port, .. } => port,
        }
    }
}

/// Errors raised by the frame parser
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The line does not match `<integer>,<float>[,...]`
    #[error("Malformed line {line:?}: {reason}")]
    MalformedLine { line: String, reason: String },
}

impl ParseError {
    pub(crate) fn malformed(line: &str, reason: impl Into<String>) -> Self {
        ParseError::MalformedLine {
            line: line.to_string(),
            reason: reason.into(),
        }
    }

    /// Short reason without the offending line
    pub fn reason(&self) -> &str {
        match self {
            ParseError::MalformedLine { reason, .. } => reason,
        }
    }
}

/// Main error type for distance monitor operations
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Serial link lifecycle errors
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    /// Wire protocol errors
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to session export
    #[error("Export error: {0}")]
    Export(String),

    /// Errors related to channel communication
    #[error("Channel error: {0}")]
    Channel(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<MonitorError>,
    },
}

impl MonitorError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        MonitorError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

impl From<csv::Error> for MonitorError {
    fn from(err: csv::Error) -> Self {
        MonitorError::Export(err.to_string())
    }
}

/// Result type alias for distance monitor operations
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, LinkError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| MonitorError::from(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| MonitorError::from(e).with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_error_display() {
        let err = MonitorError::Config("Invalid unit".to_string());
        assert_eq!(err.to_string(), "Configuration error: Invalid unit");
    }

    #[test]
    fn test_error_with_context() {
        let err = MonitorError::Export("disk full".to_string());
        let with_ctx = err.with_context("Failed to save session");
        assert!(with_ctx.to_string().contains("Failed to save session"));
    }

    #[test]
    fn test_link_error_carries_port_and_cause() {
        let err = LinkError::PortUnavailable {
            port: "COM5".to_string(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "Access denied"),
        };
        assert_eq!(err.port(), "COM5");
        assert!(err.to_string().contains("COM5"));
        assert!(err.to_string().contains("Access denied"));
    }

    #[test]
    fn test_link_error_context() {
        let res: std::result::Result<(), LinkError> = Err(LinkError::NotOpen {
            port: "/dev/ttyUSB0".to_string(),
            state: LinkState::Closed,
        });
        let err = res.context("Starting session").unwrap_err();
        assert!(err.to_string().starts_with("Starting session"));
    }

    #[test]
    fn test_parse_error_reason() {
        let err = ParseError::malformed("abc,0.5", "timestamp is not an integer");
        assert_eq!(err.reason(), "timestamp is not an integer");
        assert!(err.to_string().contains("abc,0.5"));
    }
}
