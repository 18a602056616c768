//! Error taxonomy shared by every subsystem.
//!
//! Each subsystem defines its own `thiserror` enum (`ChunkError`,
//! `RegistryError`, `LoadError`, ...). All of them report an [`ErrorKind`]
//! so callers can branch on the category without matching every variant,
//! and all of them chain their causes through `std::error::Error::source`.

use std::fmt;

/// Category of a failure, independent of the subsystem that raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    OutOfMemory,
    /// A read ran past the declared payload or side-list bound.
    Overrun,
    FileNotFound,
    CannotOpen,
    CannotRead,
    CannotWrite,
    InvalidSignature,
    UnsupportedVersion,
    ChecksumMismatch,
    /// Packing or unpacking a compressed section failed.
    Compression,
    /// Schema-level rejection: bad count, GUID mismatch, size sanity.
    Validation,
    InvalidOffset,
    UnexpectedEof,
    InvalidArgument,
    InvalidState,
    NotFound,
    AlreadyExists,
    /// Parsed syntactically but is semantically inconsistent.
    Corrupt,
}

impl ErrorKind {
    /// Whether a failure of this kind must abort the current load or save.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ErrorKind::OutOfMemory
                | ErrorKind::Overrun
                | ErrorKind::InvalidSignature
                | ErrorKind::UnsupportedVersion
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::OutOfMemory => "out of memory",
            ErrorKind::Overrun => "buffer overrun",
            ErrorKind::FileNotFound => "file not found",
            ErrorKind::CannotOpen => "cannot open",
            ErrorKind::CannotRead => "cannot read",
            ErrorKind::CannotWrite => "cannot write",
            ErrorKind::InvalidSignature => "invalid signature",
            ErrorKind::UnsupportedVersion => "unsupported version",
            ErrorKind::ChecksumMismatch => "checksum mismatch",
            ErrorKind::Compression => "compression failure",
            ErrorKind::Validation => "validation failure",
            ErrorKind::InvalidOffset => "invalid offset",
            ErrorKind::UnexpectedEof => "unexpected end of input",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::InvalidState => "invalid state",
            ErrorKind::NotFound => "not found",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::Corrupt => "corrupt data",
        };
        f.write_str(s)
    }
}

/// Render an error and every cause beneath it as `error: cause: cause`.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

/// Map an I/O error onto the taxonomy, given what the caller was doing.
pub fn io_kind(err: &std::io::Error, writing: bool) -> ErrorKind {
    match err.kind() {
        std::io::ErrorKind::NotFound => ErrorKind::FileNotFound,
        std::io::ErrorKind::PermissionDenied => ErrorKind::CannotOpen,
        std::io::ErrorKind::UnexpectedEof => ErrorKind::UnexpectedEof,
        std::io::ErrorKind::OutOfMemory => ErrorKind::OutOfMemory,
        _ if writing => ErrorKind::CannotWrite,
        _ => ErrorKind::CannotRead,
    }
}
