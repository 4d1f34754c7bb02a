//! Error types for Rubidium
//!
//! This module defines all error types used throughout the Rubidium server.
//! We follow Redis's error conventions where applicable.

use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Main error type for Rubidium operations
#[derive(Debug)]
pub enum RubidiumError {
    /// Protocol-related errors (RESP parsing, serialization). Fatal to the
    /// connection: framing can no longer be trusted.
    Protocol(String),

    /// Command execution errors, reported to the client as an error reply
    Command(CommandError),

    /// Storage errors
    Storage(StorageError),

    /// Network/IO errors
    Io(String),

    /// Configuration errors
    Config(String),

    /// Client connection errors
    Connection(String),

    /// Internal server errors
    Internal(String),
}

/// Command-specific errors that map to Redis error responses
#[derive(Debug, Clone)]
pub enum CommandError {
    /// Unknown command
    UnknownCommand(String),

    /// Wrong number of arguments for command
    WrongNumberOfArgs(String),

    /// Syntax error in command
    SyntaxError(String),

    /// Operation against wrong type
    WrongType,

    /// Value is not an integer or out of range
    NotInteger,

    /// Stream entry id validation failure
    InvalidStreamId(String),

    /// Invalid state for operation (EXEC without MULTI, ...)
    InvalidState(String),

    /// Generic command error with message
    Generic(String),
}

/// Storage-related errors
#[derive(Debug)]
pub enum StorageError {
    /// Key not found
    KeyNotFound,

    /// Wrong data type for operation
    WrongType,
}

/// Type alias for Results throughout Rubidium
pub type Result<T> = std::result::Result<T, RubidiumError>;

impl fmt::Display for RubidiumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RubidiumError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            RubidiumError::Command(err) => write!(f, "{}", err),
            RubidiumError::Storage(err) => write!(f, "{}", err),
            RubidiumError::Io(msg) => write!(f, "I/O error: {}", msg),
            RubidiumError::Config(msg) => write!(f, "Configuration error: {}", msg),
            RubidiumError::Connection(msg) => write!(f, "Connection error: {}", msg),
            RubidiumError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::UnknownCommand(cmd) => {
                write!(f, "ERR unknown command '{}'", cmd)
            }
            CommandError::WrongNumberOfArgs(cmd) => {
                write!(f, "ERR wrong number of arguments for '{}' command", cmd)
            }
            CommandError::SyntaxError(msg) => write!(f, "ERR syntax error: {}", msg),
            CommandError::WrongType => {
                write!(f, "WRONGTYPE Operation against a key holding the wrong kind of value")
            }
            CommandError::NotInteger => {
                write!(f, "ERR value is not an integer or out of range")
            }
            CommandError::InvalidStreamId(msg) => write!(f, "ERR {}", msg),
            CommandError::InvalidState(msg) => write!(f, "ERR {}", msg),
            CommandError::Generic(msg) => write!(f, "ERR {}", msg),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::KeyNotFound => write!(f, "Key not found"),
            StorageError::WrongType => write!(f, "Wrong data type"),
        }
    }
}

impl StdError for RubidiumError {}
impl StdError for CommandError {}
impl StdError for StorageError {}

// Conversion implementations
impl From<io::Error> for RubidiumError {
    fn from(err: io::Error) -> Self {
        RubidiumError::Io(err.to_string())
    }
}

impl From<CommandError> for RubidiumError {
    fn from(err: CommandError) -> Self {
        RubidiumError::Command(err)
    }
}

impl From<StorageError> for RubidiumError {
    fn from(err: StorageError) -> Self {
        RubidiumError::Storage(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CommandError::UnknownCommand("FOOBAR".to_string());
        assert_eq!(err.to_string(), "ERR unknown command 'FOOBAR'");

        let err = CommandError::WrongType;
        assert_eq!(
            err.to_string(),
            "WRONGTYPE Operation against a key holding the wrong kind of value"
        );

        let err = CommandError::InvalidState("EXEC without MULTI".to_string());
        assert_eq!(err.to_string(), "ERR EXEC without MULTI");
    }
}
