//! Lifecycle state machine shared by both bridge halves.

use crate::error::{BridgeError, FinishReason};

/// The current phase of a bridge.
///
/// ```text
///  Idle ──► Started ──► Running ◄──► Paused
///              │           │           │
///              ▼           ▼           ▼
///          ┌──────── Finished(reason) ─────────┐
/// ```
///
/// `Finished` is terminal and reachable from every other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BridgeState {
    #[default]
    Idle,
    /// Signals subscribed, waiting for the peer.
    Started,
    /// Channels open, media flowing.
    Running,
    Paused,
    Finished(FinishReason),
}

impl std::fmt::Display for BridgeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Started => write!(f, "Started"),
            Self::Running => write!(f, "Running"),
            Self::Paused => write!(f, "Paused"),
            Self::Finished(reason) => write!(f, "Finished({reason})"),
        }
    }
}

impl BridgeState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished(_))
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        match self {
            Self::Finished(reason) => Some(*reason),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Idle`.
    pub fn start(&mut self) -> Result<(), BridgeError> {
        match self {
            Self::Idle => {
                *self = Self::Started;
                Ok(())
            }
            _ => Err(BridgeError::InvalidTransition("cannot start: not in Idle state")),
        }
    }

    /// Valid from: `Started`.
    pub fn run(&mut self) -> Result<(), BridgeError> {
        match self {
            Self::Started => {
                *self = Self::Running;
                Ok(())
            }
            _ => Err(BridgeError::InvalidTransition("cannot run: not in Started state")),
        }
    }

    /// Valid from: `Running`.
    pub fn pause(&mut self) -> Result<(), BridgeError> {
        match self {
            Self::Running => {
                *self = Self::Paused;
                Ok(())
            }
            _ => Err(BridgeError::InvalidTransition("cannot pause: not in Running state")),
        }
    }

    /// Valid from: `Paused`.
    pub fn resume(&mut self) -> Result<(), BridgeError> {
        match self {
            Self::Paused => {
                *self = Self::Running;
                Ok(())
            }
            _ => Err(BridgeError::InvalidTransition("cannot resume: not in Paused state")),
        }
    }

    /// Valid from any non-terminal state.
    pub fn finish(&mut self, reason: FinishReason) -> Result<(), BridgeError> {
        match self {
            Self::Finished(_) => Err(BridgeError::InvalidTransition("already finished")),
            _ => {
                *self = Self::Finished(reason);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_lifecycle() {
        let mut state = BridgeState::default();
        state.start().unwrap();
        state.run().unwrap();
        assert!(state.is_running());
        state.pause().unwrap();
        assert_eq!(state, BridgeState::Paused);
        state.resume().unwrap();
        state.finish(FinishReason::BroadcastFinished).unwrap();
        assert_eq!(state.finish_reason(), Some(FinishReason::BroadcastFinished));
    }

    #[test]
    fn finish_from_idle() {
        let mut state = BridgeState::Idle;
        state.finish(FinishReason::NoConnection).unwrap();
        assert!(state.is_finished());
    }

    #[test]
    fn finished_is_terminal() {
        let mut state = BridgeState::Finished(FinishReason::CallEnded);
        assert!(state.start().is_err());
        assert!(state.run().is_err());
        assert!(state.resume().is_err());
        assert!(state.finish(FinishReason::NoConnection).is_err());
        assert_eq!(state.finish_reason(), Some(FinishReason::CallEnded));
    }

    #[test]
    fn cannot_pause_before_running() {
        let mut state = BridgeState::Started;
        assert!(state.pause().is_err());
        assert!(state.resume().is_err());
    }

    #[test]
    fn display_format() {
        assert_eq!(BridgeState::Paused.to_string(), "Paused");
        assert_eq!(
            BridgeState::Finished(FinishReason::PresentationStolen).to_string(),
            "Finished(presentation stolen)"
        );
    }
}
