//! Error types for lbsync
//!
//! This module defines all error types used throughout the crate.
//!
//! Only [`Error::NodeParse`] is recovered where it is raised (the node is
//! skipped). Every other variant abandons the current reconcile cycle.

use thiserror::Error;

/// Result type alias for lbsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for lbsync
#[derive(Error, Debug)]
pub enum Error {
    /// Discovery request failed (network, auth, status or payload)
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// The configured backend section header is missing from the document
    #[error("Backend section not found: backend {0}")]
    SectionNotFound(String),

    /// A single node could not be turned into a server line
    #[error(transparent)]
    NodeParse(#[from] NodeParseError),

    /// The proxy rejected the new configuration
    #[error("Validation error: {0}")]
    Validation(String),

    /// Reload command could not be dispatched or exited non-zero
    #[error("Reload error: {0}")]
    Reload(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem and process I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a fetch error
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    /// Create a "section not found" error
    pub fn section_not_found(section: impl Into<String>) -> Self {
        Self::SectionNotFound(section.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a reload error
    pub fn reload(msg: impl Into<String>) -> Self {
        Self::Reload(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Per-node failure: the node is skipped, the cycle continues
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Node parse error ({node}): {reason}")]
pub struct NodeParseError {
    /// Node id, or a positional label when the id itself is missing
    pub node: String,
    /// Why the node was rejected
    pub reason: String,
}

impl NodeParseError {
    pub fn new(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            reason: reason.into(),
        }
    }
}
