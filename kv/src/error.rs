use std::fmt::{self, Display, Formatter};

/// All fallible operations in this crate return this.
pub type CResult<T> = std::result::Result<T, Error>;

/// Crate-wide error type.
///
/// `Conflict`, `ChannelClosed` and `Indeterminate` are the three outcomes a
/// transaction's retry loop has to tell apart (see `crate::client`):
/// conflicts are always safe to retry, a closed channel is safe to retry
/// only if it happened before the commit frame was sent, and an
/// indeterminate outcome must never be retried silently.
#[derive(Debug)]
pub enum Error {
    /// A commit's read-set failed OCC validation.
    Conflict,

    /// An RPC was attempted with no live channel, or the channel died while
    /// the RPC was in flight but before any response (or, for a non-commit
    /// RPC, at any point) was observed.
    ChannelClosed,

    /// The channel died after a `CommitReq` was sent but before its
    /// response arrived. Whether the commit applied is unknown.
    Indeterminate,

    /// A malformed frame or an unrecognized message case. Fatal for the
    /// session that received it.
    Protocol(String),

    /// A put and a delete of the same key landed in one commit. The client
    /// runtime is supposed to fold these away before sending the request;
    /// seeing one here means that invariant was violated.
    ConflictingWrite(Vec<u8>),

    /// bincode encode/decode failure.
    Encode(bincode::Error),

    /// Underlying I/O failure (log file, socket).
    Io(std::io::Error),

    /// Anything else, carrying a message for operators/logs.
    Internal(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Error::Conflict => write!(f, "write conflict"),
            Error::ChannelClosed => write!(f, "channel closed"),
            Error::Indeterminate => write!(f, "commit outcome indeterminate: channel closed after commit was sent"),
            Error::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Error::ConflictingWrite(key) => {
                write!(f, "commit carries both a put and a delete of key {key:?}")
            }
            Error::Encode(err) => write!(f, "encoding error: {err}"),
            Error::Io(err) => write!(f, "I/O error: {err}"),
            Error::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Encode(err) => Some(err),
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Encode(err)
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (Error::Conflict, Error::Conflict)
                | (Error::ChannelClosed, Error::ChannelClosed)
                | (Error::Indeterminate, Error::Indeterminate)
        )
    }
}
