//! Domain-specific error types for the broadcast bridge.
//!
//! All fallible operations return `Result<T, BridgeError>`.
//! No panics on malformed input; every error is typed and maps onto a
//! terminal [`FinishReason`] when it ends a session.

use std::fmt;
use thiserror::Error;

// ── FinishReason ─────────────────────────────────────────────────

/// Why a bridge reached its terminal `Finished` state.
///
/// The first two are failures; the last three are intentional,
/// externally-triggered stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FinishReason {
    /// Handshake, mapping or keep-alive failure.
    NoConnection,
    /// Malformed framing on the audio socket.
    InvalidHeader,
    /// The host's call ended.
    CallEnded,
    /// Another participant started presenting.
    PresentationStolen,
    /// Either side finished the broadcast normally.
    BroadcastFinished,
}

impl FinishReason {
    /// Returns `true` for reasons that indicate a failure rather than an
    /// intentional stop.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::NoConnection | Self::InvalidHeader)
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoConnection => write!(f, "no connection"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::CallEnded => write!(f, "call ended"),
            Self::PresentationStolen => write!(f, "presentation stolen"),
            Self::BroadcastFinished => write!(f, "broadcast finished"),
        }
    }
}

// ── BridgeError ──────────────────────────────────────────────────

/// The canonical error type for the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    // ── Terminal reasons ─────────────────────────────────────────
    /// The peer process is absent: mapping, handshake or keep-alive failed.
    #[error("no connection to the peer process")]
    NoConnection,

    /// A message header on the socket channel could not be parsed.
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),

    /// The host ended the call.
    #[error("call ended")]
    CallEnded,

    /// Someone else started presenting.
    #[error("presentation stolen")]
    PresentationStolen,

    /// The broadcast was finished by either side.
    #[error("broadcast finished")]
    BroadcastFinished,

    // ── Transport Errors ─────────────────────────────────────────
    /// The payload does not fit the transport.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Another server already owns the socket path.
    #[error("address in use: {0}")]
    AddressInUse(String),

    /// The underlying file or socket reported an error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    // ── Media Errors ─────────────────────────────────────────────
    /// A four-character pixel format code with no plane-layout entry.
    #[error("unsupported pixel format: {0:#010x}")]
    UnsupportedPixelFormat(u32),

    /// A pixel buffer's planes do not match its declared geometry.
    #[error("invalid pixel buffer: {0}")]
    InvalidPixelBuffer(&'static str),

    // ── State Errors ─────────────────────────────────────────────
    /// A state machine was asked to make a transition it does not allow.
    #[error("invalid transition: {0}")]
    InvalidTransition(&'static str),

    // ── Configuration / Persistence ──────────────────────────────
    /// The shared key/value store could not be read or written.
    #[error("store error: {0}")]
    Store(String),

    /// Configuration could not be parsed.
    #[error("config error: {0}")]
    Config(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl BridgeError {
    /// The terminal reason a bridge reports when this error ends a session.
    ///
    /// Everything that is not an explicit stop or a framing error is
    /// treated as a lost connection.
    pub fn finish_reason(&self) -> FinishReason {
        match self {
            Self::InvalidHeader(_) | Self::PayloadTooLarge { .. } => FinishReason::InvalidHeader,
            Self::CallEnded => FinishReason::CallEnded,
            Self::PresentationStolen => FinishReason::PresentationStolen,
            Self::BroadcastFinished => FinishReason::BroadcastFinished,
            _ => FinishReason::NoConnection,
        }
    }
}

impl From<FinishReason> for BridgeError {
    fn from(reason: FinishReason) -> Self {
        match reason {
            FinishReason::NoConnection => Self::NoConnection,
            FinishReason::InvalidHeader => Self::InvalidHeader("malformed message"),
            FinishReason::CallEnded => Self::CallEnded,
            FinishReason::PresentationStolen => Self::PresentationStolen,
            FinishReason::BroadcastFinished => Self::BroadcastFinished,
        }
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for BridgeError {
    fn from(s: String) -> Self {
        BridgeError::Other(s)
    }
}

impl From<&str> for BridgeError {
    fn from(s: &str) -> Self {
        BridgeError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for BridgeError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        BridgeError::ChannelClosed
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Store(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = BridgeError::NoConnection;
        assert!(e.to_string().contains("no connection"));

        let e = BridgeError::PayloadTooLarge {
            size: 1000,
            max: 500,
        };
        assert!(e.to_string().contains("1000"));
        assert!(e.to_string().contains("500"));

        let e = BridgeError::UnsupportedPixelFormat(0x4247_5241);
        assert!(e.to_string().contains("0x42475241"));
    }

    #[test]
    fn from_string() {
        let e: BridgeError = "something broke".into();
        assert!(matches!(e, BridgeError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: BridgeError = io_err.into();
        assert!(matches!(e, BridgeError::Io(_)));
        assert_eq!(e.finish_reason(), FinishReason::NoConnection);
    }

    #[test]
    fn finish_reason_mapping() {
        assert_eq!(
            BridgeError::InvalidHeader("short").finish_reason(),
            FinishReason::InvalidHeader
        );
        assert_eq!(BridgeError::CallEnded.finish_reason(), FinishReason::CallEnded);
        assert_eq!(
            BridgeError::PresentationStolen.finish_reason(),
            FinishReason::PresentationStolen
        );
        assert_eq!(BridgeError::ChannelClosed.finish_reason(), FinishReason::NoConnection);
    }

    #[test]
    fn reason_roundtrips_through_error() {
        for reason in [
            FinishReason::NoConnection,
            FinishReason::InvalidHeader,
            FinishReason::CallEnded,
            FinishReason::PresentationStolen,
            FinishReason::BroadcastFinished,
        ] {
            assert_eq!(BridgeError::from(reason).finish_reason(), reason);
        }
    }

    #[test]
    fn failures_are_flagged() {
        assert!(FinishReason::NoConnection.is_failure());
        assert!(FinishReason::InvalidHeader.is_failure());
        assert!(!FinishReason::CallEnded.is_failure());
        assert!(!FinishReason::BroadcastFinished.is_failure());
    }
}
