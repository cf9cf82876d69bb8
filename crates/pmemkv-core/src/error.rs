//! Status codes and error types for pmemkv operations
//!
//! Every failure is a `KvError` carrying enough context to diagnose it, and
//! every `KvError` maps onto exactly one public `Status` ordinal.

use std::error::Error;
use std::fmt;
use std::path::PathBuf;

/// Public status taxonomy. Ordinals are stable and part of the interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    Ok = 0,
    UnknownError = 1,
    NotFound = 2,
    NotSupported = 3,
    InvalidArgument = 4,
    ConfigParsingError = 5,
    ConfigTypeError = 6,
    StoppedByCallback = 7,
    OutOfMemory = 8,
    WrongEngineName = 9,
    TransactionScopeError = 10,
    DefragError = 11,
    ComparatorMismatch = 12,
}

impl Status {
    /// Upper-case name as it appears in rendered statuses.
    pub fn name(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::UnknownError => "UNKNOWN_ERROR",
            Status::NotFound => "NOT_FOUND",
            Status::NotSupported => "NOT_SUPPORTED",
            Status::InvalidArgument => "INVALID_ARGUMENT",
            Status::ConfigParsingError => "CONFIG_PARSING_ERROR",
            Status::ConfigTypeError => "CONFIG_TYPE_ERROR",
            Status::StoppedByCallback => "STOPPED_BY_CB",
            Status::OutOfMemory => "OUT_OF_MEMORY",
            Status::WrongEngineName => "WRONG_ENGINE_NAME",
            Status::TransactionScopeError => "TRANSACTION_SCOPE_ERROR",
            Status::DefragError => "DEFRAG_ERROR",
            Status::ComparatorMismatch => "COMPARATOR_MISMATCH",
        }
    }

    /// Numeric ordinal.
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// pmemkv error types with detailed context
#[derive(Debug, Clone)]
pub enum KvError {
    /// Key is not present in the engine
    NotFound,

    /// The engine does not implement the requested capability
    NotSupported {
        /// Engine name
        engine: &'static str,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// An argument is outside its accepted domain
    InvalidArgument {
        /// Human-readable description
        reason: String,
    },

    /// A required config option is missing or unusable
    ConfigParsing {
        /// Option name
        option: String,
        /// Description of the problem
        reason: String,
    },

    /// A config option holds a value of the wrong type
    ConfigType {
        /// Option name
        option: String,
        /// Type the consumer asked for
        expected: &'static str,
        /// Type actually stored
        found: &'static str,
    },

    /// Iteration callback returned a non-zero code
    StoppedByCallback {
        /// The code returned by the callback
        code: i32,
    },

    /// The pool allocator cannot satisfy the request
    OutOfMemory {
        /// Bytes requested
        requested: u64,
        /// Bytes still free in the pool (possibly fragmented)
        available: u64,
    },

    /// No engine is registered under this name
    WrongEngineName {
        /// Name that was looked up
        name: String,
    },

    /// Transaction used outside of its valid scope
    TransactionScope {
        /// Description of the violation
        reason: String,
    },

    /// Defragmentation could not complete
    Defrag {
        /// Description of the failure
        reason: String,
    },

    /// Pool was created with a different comparator
    ComparatorMismatch {
        /// Comparator name recorded in the pool
        persisted: String,
        /// Comparator name supplied on open
        supplied: String,
    },

    /// I/O operation failed
    Io {
        /// The file path where the error occurred
        path: Option<PathBuf>,
        /// The underlying I/O error kind
        kind: std::io::ErrorKind,
        /// Human-readable description
        message: String,
    },

    /// On-media data failed validation
    Corrupted {
        /// File where the problem was detected
        path: PathBuf,
        /// Byte offset of the bad data
        offset: u64,
        /// Description of the corruption
        reason: String,
    },
}

impl KvError {
    /// Status ordinal this error reports as.
    pub fn status(&self) -> Status {
        match self {
            KvError::NotFound => Status::NotFound,
            KvError::NotSupported { .. } => Status::NotSupported,
            KvError::InvalidArgument { .. } => Status::InvalidArgument,
            KvError::ConfigParsing { .. } => Status::ConfigParsingError,
            KvError::ConfigType { .. } => Status::ConfigTypeError,
            KvError::StoppedByCallback { .. } => Status::StoppedByCallback,
            KvError::OutOfMemory { .. } => Status::OutOfMemory,
            KvError::WrongEngineName { .. } => Status::WrongEngineName,
            KvError::TransactionScope { .. } => Status::TransactionScopeError,
            KvError::Defrag { .. } => Status::DefragError,
            KvError::ComparatorMismatch { .. } => Status::ComparatorMismatch,
            KvError::Io { .. } | KvError::Corrupted { .. } => Status::UnknownError,
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        KvError::InvalidArgument { reason: reason.into() }
    }

    pub(crate) fn io(path: &std::path::Path, err: std::io::Error, what: &str) -> Self {
        KvError::Io {
            path: Some(path.to_path_buf()),
            kind: err.kind(),
            message: format!("{}: {}", what, err),
        }
    }
}

impl fmt::Display for KvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.status())?;
        match self {
            KvError::NotFound => write!(f, "key not found"),

            KvError::NotSupported { engine, operation } => {
                write!(f, "engine '{}' does not support {}", engine, operation)
            }

            KvError::InvalidArgument { reason } => write!(f, "invalid argument: {}", reason),

            KvError::ConfigParsing { option, reason } => {
                write!(f, "config option '{}': {}", option, reason)
            }

            KvError::ConfigType { option, expected, found } => {
                write!(f, "config option '{}' has type {}, expected {}", option, found, expected)
            }

            KvError::StoppedByCallback { code } => {
                write!(f, "iteration stopped by callback with code {}", code)
            }

            KvError::OutOfMemory { requested, available } => {
                write!(f, "pool exhausted: requested {} bytes, {} bytes free", requested, available)
            }

            KvError::WrongEngineName { name } => write!(f, "unknown engine name '{}'", name),

            KvError::TransactionScope { reason } => write!(f, "transaction scope error: {}", reason),

            KvError::Defrag { reason } => write!(f, "defragmentation failed: {}", reason),

            KvError::ComparatorMismatch { persisted, supplied } => {
                write!(f, "pool was created with comparator '{}', got '{}'", persisted, supplied)
            }

            KvError::Io { path, kind, message } => {
                if let Some(path) = path {
                    write!(f, "I/O error in {}: {} ({})", path.display(), message, kind)
                } else {
                    write!(f, "I/O error: {} ({})", message, kind)
                }
            }

            KvError::Corrupted { path, offset, reason } => {
                write!(f, "corrupted data in {} at offset {}: {}", path.display(), offset, reason)
            }
        }
    }
}

impl Error for KvError {}

/// Convert std::io::Error to KvError::Io
impl From<std::io::Error> for KvError {
    fn from(err: std::io::Error) -> Self {
        KvError::Io {
            path: None,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for pmemkv operations
pub type KvResult<T> = Result<T, KvError>;
