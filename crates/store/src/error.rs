//! Error types for the store crate

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for cache store operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error during store operations
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(bincache::store::io),
        help("Check file permissions and ensure the cache directory is writable")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "rename")
        operation: String,
    },

    /// Configuration or validation error
    #[error("Cache configuration error: {message}")]
    #[diagnostic(code(bincache::store::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Cache key not found
    #[error("Cache key not found: {key}")]
    #[diagnostic(
        code(bincache::store::not_found),
        help("The cache entry may have been purged or never existed")
    )]
    NotFound {
        /// The cache key that was not found
        key: String,
    },

    /// Stored content does not match its recorded integrity
    #[error("Integrity check failed for '{key}': expected {expected}, found {actual}")]
    #[diagnostic(code(bincache::store::integrity))]
    Integrity {
        /// The cache key whose content is corrupt
        key: String,
        /// The recorded integrity or size
        expected: String,
        /// What was actually found on disk
        actual: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(code(bincache::store::serialization))]
    Serialization {
        /// Error message describing the serialization issue
        message: String,
    },

    /// A blocking store task panicked or was cancelled
    #[error("Background store task failed: {message}")]
    #[diagnostic(code(bincache::store::background))]
    Background {
        /// Description of the join failure
        message: String,
    },
}

impl Error {
    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an I/O error without path context
    #[must_use]
    pub fn io_no_path(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: None,
            operation: operation.into(),
        }
    }

    /// Create a not found error
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Create an integrity error
    #[must_use]
    pub fn integrity(
        key: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::Integrity {
            key: key.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a serialization error
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a background task error
    #[must_use]
    pub fn background(msg: impl Into<String>) -> Self {
        Self::Background {
            message: msg.into(),
        }
    }

    /// Short classification code, stable across releases.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io { .. } => "EIO",
            Self::Configuration { .. } => "ECONFIG",
            Self::NotFound { .. } => "ENOTFOUND",
            Self::Integrity { .. } => "EINTEGRITY",
            Self::Serialization { .. } => "ESERIALIZE",
            Self::Background { .. } => "EBACKGROUND",
        }
    }

    /// Whether this error means the key is simply absent.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result type for cache store operations
pub type Result<T> = std::result::Result<T, Error>;
