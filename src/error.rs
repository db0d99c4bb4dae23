//! Error types for controller operations

use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ControllerError>;

/// Direction of an operation on a controller resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Read => write!(f, "read"),
            Operation::Write => write!(f, "write"),
        }
    }
}

/// Authentication realm a request is sent under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Realm {
    /// KCL command execution (`/KCL`, `/KCLDO`)
    Kcl,
    /// Karel program execution (`/KAREL`)
    Karel,
    /// Files served from controller storage
    File,
    /// Helper pages, no authentication
    Public,
}

impl fmt::Display for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Realm::Kcl => write!(f, "KCL"),
            Realm::Karel => write!(f, "Karel"),
            Realm::File => write!(f, "file"),
            Realm::Public => write!(f, "public"),
        }
    }
}

/// Failures of the HTTP round trip itself
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Request to {url} timed out after {after:?}")]
    Timeout { url: String, after: Duration },

    #[error("Connection to {url} failed: {message}")]
    Connect { url: String, message: String },

    #[error("Authentication failed ({realm})")]
    Unauthorized { realm: Realm },

    #[error("Access is forbidden/locked ({realm})")]
    Forbidden { realm: Realm },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("FTP transfer of {path} failed: {message}")]
    Ftp { path: String, message: String },
}

/// The controller answered, but not in a way the protocol can use
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Helper program '{program}' could not be started: {reason}")]
    TriggerFailed { program: String, reason: String },

    #[error("Garbled response: {0}")]
    Garbled(String),

    #[error("Stale response: expected result of '{expected}', found '{found}'")]
    Stale { expected: String, found: String },

    #[error("Value not found for '{0}'")]
    ValueNotFound(String),

    #[error("Malformed document: {0}")]
    Malformed(String),

    #[error("Cannot decode '{literal}' as {expected}")]
    InvalidLiteral { literal: String, expected: &'static str },
}

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Cannot {operation} {category}: operation not supported")]
    Capability { category: String, operation: Operation },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Controller reported failure: {0}")]
    Resource(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ControllerError {
    /// Whether the failure was detected before any request was sent
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            ControllerError::Validation(_)
                | ControllerError::Capability { .. }
                | ControllerError::Config(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ControllerError::Transport(TransportError::Timeout { .. }))
    }
}
