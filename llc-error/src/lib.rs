//! Unified error handling for LL-Connect-Wireless
//!
//! This crate provides the single error type used across the daemon and its
//! core library. It uses thiserror for Display and Error trait impls.

use std::io;
use std::path::PathBuf;

/// Result type alias using LlcError
pub type Result<T> = std::result::Result<T, LlcError>;

/// Unified error type for all LL-Connect-Wireless operations
#[derive(thiserror::Error, Debug)]
pub enum LlcError {
    // ============================================================================
    // USB Device Errors
    // ============================================================================
    #[error("USB device {product_id:04x} not found")]
    DeviceNotFound {
        product_id: u16,
    },

    #[error("Failed to claim interface on USB device {product_id:04x}: {reason}")]
    ClaimFailed {
        product_id: u16,
        reason: String,
    },

    #[error("USB transfer timed out: {0}")]
    TransportTimeout(&'static str),

    #[error("USB transfer failed: {0}")]
    TransportIo(String),

    #[error("Malformed hub response: {0}")]
    Decode(String),

    #[error("Control loop gave up after {consecutive} consecutive failures")]
    SustainedFailure {
        consecutive: u32,
    },

    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    // ============================================================================
    // Configuration and Settings Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    // ============================================================================
    // IPC Errors
    // ============================================================================
    #[error("Message too large: {size} bytes (max {max_size} bytes)")]
    MessageTooLarge {
        size: usize,
        max_size: usize,
    },
}

impl LlcError {
    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a validation error for a named settings field
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a transport I/O error from anything displayable
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::TransportIo(err.to_string())
    }

    /// Create a decode error from a string
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Whether the control loop may retry after this error on the next tick.
    ///
    /// Transient errors count toward the fatal threshold. Anything else ends
    /// the loop at once.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransportTimeout(_) | Self::TransportIo(_) | Self::Decode(_)
        )
    }
}
