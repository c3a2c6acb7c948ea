use std::fmt;

use thiserror::Error;

/// The error taxonomy shared by every component of the runtime.
///
/// Callers at the CLI boundary wrap these in `anyhow::Context` for
/// human-readable chains; internally, components match on `kind()` to decide
/// whether a failure is recoverable (e.g. `NotFound` during a best-effort
/// cleanup) or fatal.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("ambiguous container id '{prefix}': {matches} matches ({preview})")]
    AmbiguousId {
        prefix: String,
        matches: usize,
        preview: String,
    },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("I/O failure: {0}")]
    IoFailure(String),

    #[error("platform not supported: {0}")]
    PlatformUnsupported(String),

    #[error("timeout exceeded: {0}")]
    TimeoutExceeded(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Error-kind discriminant, independent of the message payload. Useful when a
/// caller needs to branch on *why* something failed without string-matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidConfig,
    PreconditionFailed,
    NotFound,
    AlreadyExists,
    AmbiguousId,
    PermissionDenied,
    IoFailure,
    PlatformUnsupported,
    TimeoutExceeded,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidConfig => "InvalidConfig",
            Self::PreconditionFailed => "PreconditionFailed",
            Self::NotFound => "NotFound",
            Self::AlreadyExists => "AlreadyExists",
            Self::AmbiguousId => "AmbiguousId",
            Self::PermissionDenied => "PermissionDenied",
            Self::IoFailure => "IoFailure",
            Self::PlatformUnsupported => "PlatformUnsupported",
            Self::TimeoutExceeded => "TimeoutExceeded",
            Self::Internal => "Internal",
        };
        write!(f, "{s}")
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::AmbiguousId { .. } => ErrorKind::AmbiguousId,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::IoFailure(_) => ErrorKind::IoFailure,
            Self::PlatformUnsupported(_) => ErrorKind::PlatformUnsupported,
            Self::TimeoutExceeded(_) => ErrorKind::TimeoutExceeded,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn precondition_failed(msg: impl Into<String>) -> Self {
        Self::PreconditionFailed(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(e.to_string()),
            std::io::ErrorKind::PermissionDenied => Error::PermissionDenied(e.to_string()),
            std::io::ErrorKind::AlreadyExists => Error::AlreadyExists(e.to_string()),
            _ => Error::IoFailure(e.to_string()),
        }
    }
}

impl From<nix::Error> for Error {
    fn from(e: nix::Error) -> Self {
        match e {
            nix::Error::EEXIST => Error::AlreadyExists(e.to_string()),
            nix::Error::ENOENT => Error::NotFound(e.to_string()),
            nix::Error::EACCES | nix::Error::EPERM => Error::PermissionDenied(e.to_string()),
            other => Error::IoFailure(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
