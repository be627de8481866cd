//! Error taxonomy for the glimpse frame transport.
//!
//! Every operation in the workspace reports one of a fixed set of error
//! kinds rather than raw platform error codes, so callers across process
//! and language boundaries can branch on a stable taxonomy. Success maps to
//! code `0` at FFI-style boundaries; each kind carries a stable negative
//! code (see [`ErrorKind::code`]).

use std::fmt;

/// Stable error kind, one per taxonomy entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorKind {
    /// Malformed input (zero size, bad key syntax, ...).
    InvalidArgument = -1,
    /// Handle or key does not resolve to a live segment.
    NotFound = -2,
    /// Platform access control refused the operation.
    PermissionDenied = -3,
    /// Memory, address-space, or namespace limits exceeded, or a target
    /// buffer too small for the operation.
    ResourceExhausted = -4,
    /// API misuse: double start, destroy while mapped, stalled writer.
    InvalidState = -5,
    /// No capturable surface (no attached display or session).
    CaptureUnavailable = -6,
}

impl ErrorKind {
    /// Stable integer code for cross-language callers. `0` means success.
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Short machine-friendly name.
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid-argument",
            ErrorKind::NotFound => "not-found",
            ErrorKind::PermissionDenied => "permission-denied",
            ErrorKind::ResourceExhausted => "resource-exhausted",
            ErrorKind::InvalidState => "invalid-state",
            ErrorKind::CaptureUnavailable => "capture-unavailable",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for all glimpse operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Malformed input from the caller.
    InvalidArgument(&'static str),
    /// No live segment matches the given handle or key.
    NotFound(String),
    /// Platform access control refused the operation.
    PermissionDenied(String),
    /// Memory/address-space limits exceeded, or a target buffer too small.
    /// `required` reports the needed size when determinable.
    ResourceExhausted {
        what: String,
        required: Option<usize>,
    },
    /// API misuse; the message names the violated contract.
    InvalidState(&'static str),
    /// The platform capture surface cannot be acquired.
    CaptureUnavailable(String),
}

impl Error {
    /// The taxonomy kind of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Error::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            Error::InvalidState(_) => ErrorKind::InvalidState,
            Error::CaptureUnavailable(_) => ErrorKind::CaptureUnavailable,
        }
    }

    /// The required size for a too-small target, when known.
    pub const fn required_size(&self) -> Option<usize> {
        match self {
            Error::ResourceExhausted { required, .. } => *required,
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Error::NotFound(what) => write!(f, "not found: {what}"),
            Error::PermissionDenied(what) => write!(f, "permission denied: {what}"),
            Error::ResourceExhausted { what, required } => match required {
                Some(n) => write!(f, "resource exhausted: {what} ({n} bytes required)"),
                None => write!(f, "resource exhausted: {what}"),
            },
            Error::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            Error::CaptureUnavailable(what) => write!(f, "capture unavailable: {what}"),
        }
    }
}

impl std::error::Error for Error {}
