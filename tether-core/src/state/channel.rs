//! Socket channel state machine shared by the server and the client.
//!
//! Provides a `ChannelPhase` enum that models the lifecycle of one end
//! of the framed socket, with validated transitions that return
//! `Result` instead of panicking.

use std::time::Instant;

use crate::error::{BridgeError, FinishReason};

// ── ChannelPhase ─────────────────────────────────────────────────

/// The current phase of one end of the audio socket.
///
/// ```text
///  Disconnected ──► Listening ──► Handshaking ──► Connected
///       │             (server)         ▲              │
///       └─────────────(client)─────────┘              │
///                                                     ▼
///                  Disconnected(reason) ◄─────────────┘
/// ```
///
/// Any phase may drop to `Disconnected(reason)` on failure.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ChannelPhase {
    /// Never started.
    #[default]
    Idle,

    /// Server bound and waiting for its single peer.
    Listening,

    /// Stream is open; token exchange in progress.
    Handshaking,

    /// Token echoed; framed messages may flow.
    Connected {
        /// When the channel entered the `Connected` state.
        since: Instant,
    },

    /// Terminal. Carries the reason the channel went down.
    Disconnected(FinishReason),
}

impl std::fmt::Display for ChannelPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Listening => write!(f, "Listening"),
            Self::Handshaking => write!(f, "Handshaking"),
            Self::Connected { .. } => write!(f, "Connected"),
            Self::Disconnected(reason) => write!(f, "Disconnected({reason})"),
        }
    }
}

impl ChannelPhase {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected(_))
    }

    /// How long the channel has been connected, `None` otherwise.
    pub fn connected_duration(&self) -> Option<std::time::Duration> {
        match self {
            Self::Connected { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Idle`.
    pub fn begin_listen(&mut self) -> Result<(), BridgeError> {
        match self {
            Self::Idle => {
                *self = Self::Listening;
                Ok(())
            }
            _ => Err(BridgeError::InvalidTransition(
                "cannot listen: not in Idle state",
            )),
        }
    }

    /// Valid from: `Idle` (client), `Listening` (server).
    pub fn begin_handshake(&mut self) -> Result<(), BridgeError> {
        match self {
            Self::Idle | Self::Listening => {
                *self = Self::Handshaking;
                Ok(())
            }
            _ => Err(BridgeError::InvalidTransition(
                "cannot handshake: not in Idle or Listening state",
            )),
        }
    }

    /// Valid from: `Handshaking`.
    pub fn complete_handshake(&mut self) -> Result<(), BridgeError> {
        match self {
            Self::Handshaking => {
                *self = Self::Connected {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(BridgeError::InvalidTransition(
                "cannot complete handshake: not in Handshaking state",
            )),
        }
    }

    /// Move to `Disconnected(reason)`.
    ///
    /// Returns `false` if the channel was already disconnected; the first
    /// reason is kept.
    pub fn disconnect(&mut self, reason: FinishReason) -> bool {
        if self.is_disconnected() {
            return false;
        }
        *self = Self::Disconnected(reason);
        true
    }
}

// ── Tests ────────────────────────────────────────────────────────
