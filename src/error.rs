//! Shared error taxonomy across the decoder, controller, and host-facing API.
//!
//! Propagation policy: only a [`TransportError`] terminates a turn. Protocol
//! violations and correlation misses are logged and absorbed so the stream
//! keeps flowing.

use thiserror::Error;

/// Failure of the underlying stream transport.
///
/// Surfaced as a terminal `errored` turn with a user-visible message appended
/// to the transcript. Never retried automatically; the user must resubmit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The byte stream failed mid-read.
    #[error("stream read failed: {0}")]
    Read(String),

    /// The backend answered with a non-2xx status before streaming began.
    #[error("backend returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
}

/// A malformed or unrecognized frame on the event stream.
///
/// Logged and dropped; the stream continues. A frame that parses as an
/// envelope but fails payload validation is downgraded to a generic `error`
/// event instead, so it is never silently swallowed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The frame is not a JSON object with a `type` field.
    #[error("frame is not a valid event envelope")]
    MalformedFrame,

    /// The envelope carries a `type` this client does not know.
    #[error("unrecognized event kind `{0}`")]
    UnknownKind(String),
}

/// Rejection of a `submit` on the public command surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// A turn is already active; cancel it or queue a steering message.
    #[error("a turn is already active")]
    TurnActive,

    /// The host dropped the command channel receiver.
    #[error("command channel closed")]
    ChannelClosed,
}
