//! Crate-wide error taxonomy.
//!
//! `fuser` itself reports failures to the kernel as a single raw errno (`ll::Errno`); this crate
//! has no kernel boundary, so `DatastreamError` is a proper `thiserror` enum instead. The
//! `errno()` method keeps the "speak errno at the boundary" idea alive for callers that want it.

use thiserror::Error;

/// Everything that can go wrong while driving a [`crate::stream::Stream`].
#[derive(Debug, Error)]
pub enum DatastreamError {
    /// Caller misuse: a null/empty argument, an unsupported `whence`, a stream/operation
    /// type mismatch.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A reference path collided with an existing reference file on create.
    #[error("reference path is already in use")]
    Busy,

    /// The operation is not legal for the file's current FTAG state.
    #[error("operation not permitted in current file state: {0}")]
    PermissionDenied(String),

    /// The file is not in the READABLE state.
    #[error("file is not yet readable")]
    NotReadable,

    /// The computed recovery trailer does not fit within the configured object size.
    #[error("recovery path encodes to {needed} bytes, which will not fit in an object of {objsize} bytes")]
    NameTooLong {
        /// Encoded length that was required.
        needed: usize,
        /// Configured object size limit.
        objsize: u64,
    },

    /// An object close reported a recoverable partial parity loss. Carries the rebuild tag
    /// produced for the degraded object. This variant is not usually returned to callers —
    /// object lifecycle code converts it into state (an attached RTAG) and continues — but it
    /// is a real `DatastreamError` variant so a backend can report it through the same channel
    /// as any other outcome.
    #[error("object closed in a degraded state")]
    Degraded(crate::recovery::RebuildTag),

    /// An object emit/close failure, or an FTAG write failure, that leaves invariants
    /// uncertain. The stream that produced this must be dropped; it cannot be a durable value
    /// this crate hands back to a caller.
    #[error("stream is in a stale, unrecoverable state: {0}")]
    Stale(String),

    /// A backend error that does not compromise any invariant; the stream may continue.
    #[error("backend I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure to encode or decode an FTAG, recovery header/trailer, or rebuild tag string.
    #[error("codec error: {0}")]
    Codec(String),
}

impl DatastreamError {
    /// Maps this error to a POSIX-style errno, for callers that need `errno` semantics at
    /// their own boundary (mirrors `fuser`'s `ll::Errno` conversion, just one layer further
    /// removed from the kernel).
    pub fn errno(&self) -> libc::c_int {
        match self {
            DatastreamError::InvalidArgument(_) => libc::EINVAL,
            DatastreamError::Busy => libc::EBUSY,
            DatastreamError::PermissionDenied(_) => libc::EPERM,
            DatastreamError::NotReadable => libc::EPERM,
            DatastreamError::NameTooLong { .. } => libc::ENAMETOOLONG,
            DatastreamError::Degraded(_) => 0,
            // The distinguished "stale" status must never collide with a backend-propagated
            // code; remap any accidental collision with a real errno to a neutral one.
            DatastreamError::Stale(_) => libc::EBADFD,
            DatastreamError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            DatastreamError::Codec(_) => libc::EFAULT,
        }
    }

    /// True if a backend surfaced our own reserved "stale" errno spuriously; in that case the
    /// core remaps it to a neutral `Io` error rather than treating it as a real stale condition.
    pub(crate) fn remap_spurious_stale(self) -> Self {
        match self {
            DatastreamError::Io(ref e) if e.raw_os_error() == Some(libc::EBADFD) => {
                DatastreamError::Io(std::io::Error::from_raw_os_error(libc::EIO))
            }
            other => other,
        }
    }
}

pub(crate) fn invalid_argument(msg: impl Into<String>) -> DatastreamError {
    DatastreamError::InvalidArgument(msg.into())
}

pub(crate) fn permission_denied(msg: impl Into<String>) -> DatastreamError {
    DatastreamError::PermissionDenied(msg.into())
}

pub(crate) fn stale(msg: impl Into<String>) -> DatastreamError {
    DatastreamError::Stale(msg.into())
}
