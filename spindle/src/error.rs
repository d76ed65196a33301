// Copyright (c) 2025 the Spindle project authors. Licensed under Apache License, Version 2.0.

// cspell:words EACCES ECANCELED ECONNREFUSED ECONNRESET ENETDOWN ENETRESET
// cspell:words ENETUNREACH ENOTCONN EPERM ETIMEDOUT errno

//! Error model for the runtime core. Every fallible operation reports one of
//! the kinds in [`ErrorKind`]; OS errors keep their [`std::io::Error`] source
//! attached under [`Error::Internal`] unless they classify to a more specific
//! kind.

use std::io;

/// Classification of a runtime error, independent of its representation.
///
/// Use [`Error::kind`] to compare errors in tests and control flow without
/// destructuring the carried OS error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum ErrorKind {
    /// Temporary unavailability; retry after the next readiness event.
    WouldBlock,
    /// The operation was cancelled via a token, timer, or detach.
    Cancelled,
    /// The peer closed the stream direction.
    Eof,
    /// Precondition violation, e.g. scheduling a closed timer.
    Invalid,
    /// The requested trigger or one-shot option is unavailable on this
    /// backend.
    NotSupported,
    /// The peer reset the connection or the socket is unrecoverable.
    ConnectionDead,
    /// OS-level permission denial.
    NotAuthorized,
    /// Any other kernel error.
    Internal,
}

/// Error type for all runtime operations.
///
/// The variants mirror [`ErrorKind`]; [`Error::Internal`] carries the
/// underlying [`std::io::Error`] as its source so the errno chain survives
/// into diagnostics.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum Error {
    /// Temporary unavailability; maps to a timeout on receive/send deadlines.
    #[error("operation would block")]
    #[diagnostic(code(spindle::would_block))]
    WouldBlock,

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    #[diagnostic(code(spindle::cancelled))]
    Cancelled,

    /// The peer closed the stream direction.
    #[error("end of stream")]
    #[diagnostic(code(spindle::eof))]
    Eof,

    /// A precondition was violated, e.g. scheduling a closed timer or
    /// attaching a handle twice.
    #[error("invalid operation or state")]
    #[diagnostic(
        code(spindle::invalid),
        help("Check the object's lifecycle: closed timers cannot be \
              rescheduled, and a handle may only be attached once.")
    )]
    Invalid,

    /// The requested trigger or one-shot option is unavailable on this
    /// backend.
    #[error("not supported by this reactor backend")]
    #[diagnostic(code(spindle::not_supported))]
    NotSupported,

    /// The peer reset the connection or the socket is otherwise
    /// unrecoverable.
    #[error("connection dead")]
    #[diagnostic(code(spindle::connection_dead))]
    ConnectionDead,

    /// OS-level permission denial on send.
    #[error("not authorized")]
    #[diagnostic(code(spindle::not_authorized))]
    NotAuthorized,

    /// Any other kernel error, with the OS error chain attached.
    #[error("internal error")]
    #[diagnostic(code(spindle::internal))]
    Internal(#[source] io::Error),
}

impl Error {
    /// Returns the classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::WouldBlock => ErrorKind::WouldBlock,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Eof => ErrorKind::Eof,
            Error::Invalid => ErrorKind::Invalid,
            Error::NotSupported => ErrorKind::NotSupported,
            Error::ConnectionDead => ErrorKind::ConnectionDead,
            Error::NotAuthorized => ErrorKind::NotAuthorized,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Captures `errno` from the most recent syscall on this thread and
    /// classifies it.
    #[must_use]
    pub fn last_os_error() -> Self { Self::from(io::Error::last_os_error()) }

    /// Classifies a raw `errno` value.
    #[must_use]
    pub fn from_raw_os_error(errno: i32) -> Self {
        Self::from(io::Error::from_raw_os_error(errno))
    }
}

impl From<io::Error> for Error {
    fn from(source: io::Error) -> Self {
        use io::ErrorKind as Io;
        match source.kind() {
            Io::WouldBlock | Io::TimedOut => Error::WouldBlock,
            Io::Interrupted => Error::Cancelled,
            Io::UnexpectedEof => Error::Eof,
            Io::InvalidInput => Error::Invalid,
            Io::Unsupported => Error::NotSupported,
            Io::ConnectionReset
            | Io::ConnectionAborted
            | Io::ConnectionRefused
            | Io::BrokenPipe
            | Io::NotConnected => Error::ConnectionDead,
            Io::PermissionDenied => Error::NotAuthorized,
            _ => Error::Internal(source),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
