//! Lifecycle signals exchanged over the control bus.
//!
//! Signals carry no payload. On the wire each is identified by its
//! namespaced name, e.g. `tether.broadcast.senderStarted`.

use std::fmt;

use crate::error::BridgeError;

/// Prefix shared by every signal's wire name.
pub const SIGNAL_NAMESPACE: &str = "tether.broadcast.";

// ── Role ─────────────────────────────────────────────────────────

/// Which end of a session an endpoint plays. The extension is the
/// sender, the host the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Sender,
    Receiver,
}

impl Role {
    pub const fn peer(self) -> Role {
        match self {
            Role::Sender => Role::Receiver,
            Role::Receiver => Role::Sender,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Sender => write!(f, "sender"),
            Role::Receiver => write!(f, "receiver"),
        }
    }
}

// ── LifecycleSignal ──────────────────────────────────────────────

/// All lifecycle events the two bridge halves exchange.
///
/// - `Sender*`:   posted by the extension
/// - `Receiver*`: posted by the host
/// - `CallEnded`, `PresentationStolen`: posted by the host, terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleSignal {
    SenderStarted,
    SenderPaused,
    SenderResumed,
    SenderFinished,
    ReceiverStarted,
    ReceiverFinished,
    CallEnded,
    PresentationStolen,
}

impl LifecycleSignal {
    pub const ALL: [LifecycleSignal; 8] = [
        Self::SenderStarted,
        Self::SenderPaused,
        Self::SenderResumed,
        Self::SenderFinished,
        Self::ReceiverStarted,
        Self::ReceiverFinished,
        Self::CallEnded,
        Self::PresentationStolen,
    ];

    /// Short name without the namespace.
    pub const fn name(self) -> &'static str {
        match self {
            Self::SenderStarted => "senderStarted",
            Self::SenderPaused => "senderPaused",
            Self::SenderResumed => "senderResumed",
            Self::SenderFinished => "senderFinished",
            Self::ReceiverStarted => "receiverStarted",
            Self::ReceiverFinished => "receiverFinished",
            Self::CallEnded => "callEnded",
            Self::PresentationStolen => "presentationStolen",
        }
    }

    /// The side that posts this signal.
    pub const fn origin(self) -> Role {
        match self {
            Self::SenderStarted | Self::SenderPaused | Self::SenderResumed | Self::SenderFinished => {
                Role::Sender
            }
            _ => Role::Receiver,
        }
    }

    /// Every signal `role` posts, in declaration order.
    pub fn posted_by(role: Role) -> impl Iterator<Item = LifecycleSignal> {
        Self::ALL.into_iter().filter(move |signal| signal.origin() == role)
    }

    /// Fully qualified name as sent between processes.
    pub fn wire_name(self) -> String {
        format!("{SIGNAL_NAMESPACE}{}", self.name())
    }
}

impl TryFrom<&str> for LifecycleSignal {
    type Error = BridgeError;

    /// Accepts the wire name; the bare short name is accepted too.
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let short = value.strip_prefix(SIGNAL_NAMESPACE).unwrap_or(value);
        Self::ALL
            .into_iter()
            .find(|signal| signal.name() == short)
            .ok_or_else(|| BridgeError::Other(format!("unknown signal: {value}")))
    }
}

impl fmt::Display for LifecycleSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_name_roundtrip() {
        for signal in LifecycleSignal::ALL {
            let wire = signal.wire_name();
            assert!(wire.starts_with(SIGNAL_NAMESPACE));
            assert_eq!(LifecycleSignal::try_from(wire.as_str()).unwrap(), signal);
        }
    }

    #[test]
    fn short_name_accepted() {
        assert_eq!(
            LifecycleSignal::try_from("callEnded").unwrap(),
            LifecycleSignal::CallEnded
        );
    }

    #[test]
    fn unknown_name_rejected() {
        assert!(LifecycleSignal::try_from("tether.broadcast.nope").is_err());
        assert!(LifecycleSignal::try_from("").is_err());
    }

    #[test]
    fn each_side_posts_four_signals() {
        let sent: Vec<_> = LifecycleSignal::posted_by(Role::Sender).collect();
        assert_eq!(sent.len(), 4);
        assert!(sent.iter().all(|s| s.name().starts_with("sender")));

        let received: Vec<_> = LifecycleSignal::posted_by(Role::Receiver).collect();
        assert!(received.contains(&LifecycleSignal::CallEnded));
        assert!(received.contains(&LifecycleSignal::PresentationStolen));
        assert_eq!(Role::Sender.peer(), Role::Receiver);
    }

    #[test]
    fn display_is_short_name() {
        assert_eq!(LifecycleSignal::SenderPaused.to_string(), "senderPaused");
    }
}
