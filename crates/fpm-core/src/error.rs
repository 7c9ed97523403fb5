use thiserror::Error;

/// Coarse classification that drives retry, logging severity and HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Ledger, peer or stream unavailable. Retried with a bounded delay.
    Transient,
    /// Malformed input. Surfaced to the caller, never retried.
    Validation,
    /// Identity or leadership mismatch. Surfaced and logged at higher severity.
    Authorization,
    /// A local OS capability failed. Logged, operation abandoned.
    Capability,
    /// Missing identity or control interface at startup.
    Fatal,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PowerError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("event stream error: {0}")]
    Stream(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("{0}")]
    Capability(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl PowerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PowerError::Connection(_) | PowerError::Ledger(_) | PowerError::Stream(_) => {
                ErrorKind::Transient
            }
            PowerError::Validation(_) => ErrorKind::Validation,
            PowerError::Unauthorized(_) | PowerError::Forbidden(_) => ErrorKind::Authorization,
            PowerError::Capability(_) | PowerError::NotSupported(_) => ErrorKind::Capability,
            PowerError::Fatal(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

pub type Result<T> = std::result::Result<T, PowerError>;
