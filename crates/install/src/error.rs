//! Error types for install operations.

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Result type for install operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while installing a binary.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Malformed arguments passed to the installer.
    #[error("Invalid argument: {message}")]
    #[diagnostic(code(bincache::install::invalid_argument))]
    InvalidArgument {
        /// What was wrong with the arguments.
        message: String,
    },

    /// A directory occupies the path the binary must be written to.
    #[error("Cannot install binary: '{}' is a directory", path.display())]
    #[diagnostic(
        code(bincache::install::is_directory),
        help("Remove or rename the directory, or pick another binary name")
    )]
    IsDirectory {
        /// The install path.
        path: PathBuf,
    },

    /// The cached archive is not a valid single-binary archive.
    #[error("Invalid cache entry: {message}")]
    #[diagnostic(code(bincache::install::invalid_cache))]
    InvalidCache {
        /// Why the entry was rejected.
        message: String,
    },

    /// Archive encoding or decoding failed.
    #[error("Archive error: {message}")]
    #[diagnostic(code(bincache::install::archive))]
    Archive {
        /// Error message.
        message: String,
    },

    /// A file exceeded the archive read limit.
    #[error("File '{}' is {size} bytes, over the {limit} byte limit", path.display())]
    #[diagnostic(code(bincache::install::too_large))]
    FileTooLarge {
        /// The offending file.
        path: PathBuf,
        /// Its size.
        size: u64,
        /// The configured limit.
        limit: u64,
    },

    /// The installed binary did not run successfully.
    #[error("Binary check failed for '{}': {message}", path.display())]
    #[diagnostic(code(bincache::install::check_failed))]
    HealthCheck {
        /// The probed binary.
        path: PathBuf,
        /// Failure description.
        message: String,
    },

    /// An operation exceeded its deadline.
    #[error("{operation} timed out after {duration:?}")]
    #[diagnostic(code(bincache::install::timeout))]
    Timeout {
        /// What timed out.
        operation: String,
        /// The deadline that was exceeded.
        duration: Duration,
    },

    /// The artifact provider failed.
    #[error("Provider '{provider}' failed: {message}")]
    #[diagnostic(code(bincache::install::provider))]
    Provider {
        /// Provider name.
        provider: String,
        /// Error message.
        message: String,
    },

    /// The operation was cancelled.
    #[error("Operation cancelled")]
    #[diagnostic(code(bincache::install::cancelled))]
    Cancelled,

    /// Cache store error.
    #[error(transparent)]
    #[diagnostic(code(bincache::install::store))]
    Store(#[from] bincache_store::Error),

    /// I/O error with context.
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(code(bincache::install::io))]
    Io {
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
        /// Path involved, if any.
        path: Option<Box<Path>>,
        /// Operation that failed.
        operation: String,
    },

    /// A background task panicked.
    #[error("Background task failed: {message}")]
    #[diagnostic(code(bincache::install::background))]
    Background {
        /// Join error description.
        message: String,
    },
}

impl Error {
    /// Create an invalid argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an is-directory error.
    #[must_use]
    pub fn is_directory(path: impl Into<PathBuf>) -> Self {
        Self::IsDirectory { path: path.into() }
    }

    /// Create an invalid cache error.
    #[must_use]
    pub fn invalid_cache(message: impl Into<String>) -> Self {
        Self::InvalidCache {
            message: message.into(),
        }
    }

    /// Create an archive error.
    #[must_use]
    pub fn archive(message: impl Into<String>) -> Self {
        Self::Archive {
            message: message.into(),
        }
    }

    /// Create a health check error.
    #[must_use]
    pub fn health_check(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::HealthCheck {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error.
    #[must_use]
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a provider error.
    #[must_use]
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create an I/O error with path context.
    #[must_use]
    pub fn io(source: std::io::Error, path: impl AsRef<Path>, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an I/O error without path context.
    #[must_use]
    pub fn io_no_path(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: None,
            operation: operation.into(),
        }
    }

    /// Create a background task error.
    #[must_use]
    pub fn background(message: impl Into<String>) -> Self {
        Self::Background {
            message: message.into(),
        }
    }

    /// Short classification code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument { .. } => "EINVALIDARG",
            Self::IsDirectory { .. } => "EISDIR",
            Self::InvalidCache { .. } => "EINVALIDCACHE",
            Self::Archive { .. } => "EARCHIVE",
            Self::FileTooLarge { .. } => "ETOOLARGE",
            Self::HealthCheck { .. } => "ECHECKFAILED",
            Self::Timeout { .. } => "ETIMEDOUT",
            Self::Provider { .. } => "EPROVIDER",
            Self::Cancelled => "ECANCELED",
            Self::Store(inner) => inner.code(),
            Self::Io { .. } => "EIO",
            Self::Background { .. } => "EBACKGROUND",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_classify_variants() {
        assert_eq!(Error::is_directory("/x").code(), "EISDIR");
        assert_eq!(Error::invalid_cache("two files").code(), "EINVALIDCACHE");
        assert_eq!(Error::invalid_argument("bad").code(), "EINVALIDARG");
        assert_eq!(
            Error::from(bincache_store::Error::not_found("k")).code(),
            "ENOTFOUND"
        );
    }

    #[test]
    fn display_includes_context() {
        let err = Error::timeout("binary check", Duration::from_secs(8));
        assert_eq!(err.to_string(), "binary check timed out after 8s");

        let err = Error::is_directory("/work/tool");
        assert!(err.to_string().contains("/work/tool"));
    }

    #[test]
    fn store_errors_carry_a_diagnostic_code() {
        let err = Error::from(bincache_store::Error::not_found("k"));
        let code = Diagnostic::code(&err).map(|c| c.to_string());
        assert_eq!(code.as_deref(), Some("bincache::install::store"));
        assert_eq!(err.code(), "ENOTFOUND");
    }
}
