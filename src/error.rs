use std::{error, fmt, io};

/// Errors raised while decoding or encoding a wire frame (C1) or a command
/// payload (C2). The host closes the offending connection on receipt; the
/// client raises this to the caller.
#[derive(Debug)]
pub enum ProtocolError {
    /// The declared frame length exceeds the configured maximum.
    FrameTooLarge { len: u32, max: u32 },
    /// The control byte did not match one of the four pinned values.
    UnknownControlByte(u8),
    /// The command payload could not be tokenized or didn't match any verb's
    /// grammar.
    MalformedCommand(String),
    /// A key or tag argument was empty, contained a space, or was otherwise
    /// invalid on the wire.
    InvalidArgument(String),
    /// A `set` value failed base64 decoding.
    BadBase64,
    Io(io::Error),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FrameTooLarge { len, max } => {
                write!(f, "frame of {len} bytes exceeds maximum of {max}")
            },
            Self::UnknownControlByte(b) => write!(f, "unknown control byte {b}"),
            Self::MalformedCommand(s) => write!(f, "malformed command: {s}"),
            Self::InvalidArgument(s) => write!(f, "invalid argument: {s}"),
            Self::BadBase64 => write!(f, "invalid base64 payload"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl error::Error for ProtocolError {}

impl From<io::Error> for ProtocolError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Errors from a client's host connection (C8): socket failures, timeouts,
/// and the disconnected-at-call-time case.
#[derive(Debug, Clone)]
pub enum TransportError {
    /// The connection was not connected when the call was issued, or
    /// disconnected before a reply arrived.
    Disconnected,
    /// The configured communication timeout elapsed with no reply.
    Timeout,
    /// The underlying socket reported an error. Stored as a string since
    /// `io::Error` is not `Clone`.
    Io(String),
    /// The connection's bounded send queue is full (spec §7: distinct from
    /// `Disconnected` — the channel is healthy, just backed up).
    Busy,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "connection disconnected"),
            Self::Timeout => write!(f, "communication timeout elapsed"),
            Self::Io(e) => write!(f, "transport io error: {e}"),
            Self::Busy => write!(f, "send queue is full"),
        }
    }
}

impl error::Error for TransportError {}

impl From<io::Error> for TransportError {
    fn from(value: io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

/// Errors surfaced by the disk persister (C3). Logged on the host, not
/// raised to the client — the in-memory entry remains live.
#[derive(Debug)]
pub enum PersistenceError {
    Io(io::Error),
    Encode(bincode::Error),
    Corrupt { path: std::path::PathBuf, reason: String },
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "persistence io error: {e}"),
            Self::Encode(e) => write!(f, "persistence encode error: {e}"),
            Self::Corrupt { path, reason } => {
                write!(f, "corrupt persisted record at {}: {reason}", path.display())
            },
        }
    }
}

impl error::Error for PersistenceError {}

impl From<io::Error> for PersistenceError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<bincode::Error> for PersistenceError {
    fn from(value: bincode::Error) -> Self {
        Self::Encode(value)
    }
}

/// Top-level error surfaced to a client façade caller (C11).
#[derive(Debug, Clone)]
pub enum CacheError {
    /// No bucket in the router has a live host able to serve this key.
    NoHostsAvailable,
    /// A bucket call failed at the transport layer; carries the last
    /// transport error observed before the façade's retry budget ran out.
    Transport(TransportError),
    /// The host rejected the request at the protocol layer.
    Protocol(String),
    /// A request could not be enqueued because the connection's send queue
    /// is full.
    Busy,
    /// A key, tag, or value failed the façade's synchronous validation.
    InvalidArgument(String),
    /// The serializer collaborator failed to convert an object to or from
    /// bytes.
    Serialization(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoHostsAvailable => write!(f, "no hosts available to serve this key"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Protocol(e) => write!(f, "protocol error: {e}"),
            Self::Busy => write!(f, "send queue is full, try again"),
            Self::InvalidArgument(s) => write!(f, "invalid argument: {s}"),
            Self::Serialization(s) => write!(f, "serialization error: {s}"),
        }
    }
}

impl error::Error for CacheError {}

impl From<TransportError> for CacheError {
    fn from(value: TransportError) -> Self {
        match value {
            TransportError::Busy => Self::Busy,
            other => Self::Transport(other),
        }
    }
}
