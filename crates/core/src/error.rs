//! Error taxonomy for QuartzDB.
//!
//! A single `Error` enum is shared by every layer. The variants map onto
//! the wire protocol's error classes:
//!
//! - **NotFound**: key/field/member absent — reads reply nil, destructive
//!   ops reply zero; rarely surfaced as a protocol error.
//! - **WrongType**: key exists under a different type tag (`WRONGTYPE`).
//! - **Parse**: a stored or supplied value cannot be read as the required
//!   integer/float.
//! - **Range**: numeric overflow, NaN/Infinity results, out-of-range index.
//! - **Conflict**: substrate optimistic-concurrency loser; consumed by the
//!   retry executor and surfaced only when the retry budget is exhausted.
//! - **Io**: substrate failure. Atomicity is bound to substrate
//!   transactions, so no partial mutation is ever visible behind this.
//! - **Corruption**: an internal invariant (meta/data agreement) failed.
//! - **Protocol**: malformed RESP input, handled at the server boundary.

use std::io;
use thiserror::Error;

/// Result type alias used throughout QuartzDB.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all QuartzDB operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Key, field or member does not exist.
    #[error("not found: {key}")]
    NotFound {
        /// The logical key (or `key/field`) that was missing.
        key: String,
    },

    /// Key exists but holds a different type.
    #[error("wrong type: key {key} holds {actual}")]
    WrongType {
        /// The logical key.
        key: String,
        /// Name of the type actually stored.
        actual: String,
    },

    /// Value cannot be interpreted as the required integer/float.
    #[error("parse error: {message}")]
    Parse {
        /// What failed to parse.
        message: String,
    },

    /// Numeric overflow/underflow, non-finite result, or index out of range.
    #[error("range error: {message}")]
    Range {
        /// Description of the violated range.
        message: String,
    },

    /// Optimistic-concurrency conflict reported by the substrate.
    ///
    /// Retryable: the retry executor re-runs the transaction closure with
    /// backoff and only lets this escape once the budget is exhausted.
    #[error("transaction conflict: {message}")]
    Conflict {
        /// Which key(s) conflicted, when known.
        message: String,
    },

    /// Substrate I/O failure (disk full, corruption at the storage layer).
    #[error("io error: {message}")]
    Io {
        /// Error message.
        message: String,
        /// Underlying error, when one exists.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An engine-level invariant was violated (meta/data mismatch).
    #[error("corruption detected: {message}")]
    Corruption {
        /// Description of the broken invariant.
        message: String,
    },

    /// Malformed wire input. Produced only at the server boundary.
    #[error("protocol error: {message}")]
    Protocol {
        /// What was malformed.
        message: String,
    },

    /// Syntactically valid input that the command cannot accept
    /// (bad subcommand, wrong arity, invalid option combination).
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the rejected argument.
        message: String,
    },
}

impl Error {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Create a NotFound error for a logical key.
    pub fn not_found(key: impl Into<String>) -> Self {
        Error::NotFound { key: key.into() }
    }

    /// Create a WrongType error.
    pub fn wrong_type(key: impl Into<String>, actual: impl Into<String>) -> Self {
        Error::WrongType {
            key: key.into(),
            actual: actual.into(),
        }
    }

    /// Create a Parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Error::Parse {
            message: message.into(),
        }
    }

    /// Create a Range error.
    pub fn range(message: impl Into<String>) -> Self {
        Error::Range {
            message: message.into(),
        }
    }

    /// Create a Conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Error::Conflict {
            message: message.into(),
        }
    }

    /// Create an Io error without an underlying source.
    pub fn io(message: impl Into<String>) -> Self {
        Error::Io {
            message: message.into(),
            source: None,
        }
    }

    /// Create an Io error wrapping an underlying error.
    pub fn io_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error::Io {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a Corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Error::Corruption {
            message: message.into(),
        }
    }

    /// Create a Protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol {
            message: message.into(),
        }
    }

    /// Create an InvalidArgument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument {
            message: message.into(),
        }
    }

    // =========================================================================
    // Classification
    // =========================================================================

    /// True for absence-of-data errors (nil replies, zero counts).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// True for type-tag mismatches (`WRONGTYPE` on the wire).
    pub fn is_wrong_type(&self) -> bool {
        matches!(self, Error::WrongType { .. })
    }

    /// True when the operation may succeed if re-run.
    ///
    /// Only substrate conflicts are retryable; everything else either
    /// reflects caller input or a persistent failure.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// True for errors that indicate possible data loss or a bug.
    pub fn is_serious(&self) -> bool {
        matches!(self, Error::Corruption { .. })
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io {
            message: e.to_string(),
            source: Some(Box::new(e)),
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        // Metadata structs are written by us; failing to decode one means
        // the entry bytes are not what the engine wrote.
        Error::Corruption {
            message: format!("metadata decode failed: {}", e),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Parse {
            message: format!("invalid JSON: {}", e),
        }
    }
}
