//! Error types for the Pop-in protocol
//!
//! This module contains all error types used throughout the Pop-in core,
//! including wire decode errors, registry limit errors, and the main
//! PopinError type that unifies them all.

use crate::message::MessageType;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Errors produced while encoding or decoding wire messages
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("Empty frame")]
    Empty,
    #[error("Unknown message type: 0x{message_type:02X}")]
    UnknownMessageType { message_type: u8 },
    #[error("Reserved message type {message_type:?} is not handled")]
    ReservedMessageType { message_type: MessageType },
    #[error("{message_type:?} payload too short (expected at least {expected}, got {actual})")]
    PayloadTooShort {
        message_type: MessageType,
        expected: usize,
        actual: usize,
    },
    #[error("{message_type:?} text is not NUL-terminated")]
    UnterminatedString { message_type: MessageType },
    #[error("{message_type:?} text too long (max {max}, got {actual})")]
    TextTooLong {
        message_type: MessageType,
        max: usize,
        actual: usize,
    },
    #[error("Invalid {field} value {value} in {message_type:?}")]
    InvalidField {
        message_type: MessageType,
        field: &'static str,
        value: u8,
    },
    #[error("Output buffer too small (need {needed}, have {available})")]
    BufferTooSmall { needed: usize, available: usize },
}

/// Errors raised when a booth registry list would exceed its fixed limit
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Booth is at capacity ({capacity} active users)")]
    ActiveListFull { capacity: usize },
    #[error("Registered user list is full ({limit} users)")]
    RegisteredListFull { limit: usize },
    #[error("Waiting queue is full ({limit} users)")]
    WaitingQueueFull { limit: usize },
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Core error types for the Pop-in protocol
#[derive(Debug, thiserror::Error)]
pub enum PopinError {
    #[error("Invalid packet: {0}")]
    InvalidPacket(#[from] PacketError),

    #[error("Registry limit: {0}")]
    Registry(#[from] RegistryError),

    /// Link layer refused or failed to transmit a frame
    #[error("Link error: {reason}")]
    Link { reason: String },

    /// Configuration error
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl PopinError {
    /// Create a link error with a reason
    pub fn link_error<T: Into<String>>(reason: T) -> Self {
        PopinError::Link {
            reason: reason.into(),
        }
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        PopinError::Configuration {
            reason: reason.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, PopinError>;
pub type PopinResult<T> = Result<T>;
