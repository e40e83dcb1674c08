//! The two bridge halves and what they share.
//!
//! ```text
//!        extension process                         host process
//!  ┌───────────────────────────┐           ┌───────────────────────────┐
//!  │ ExtensionBridge           │  signals  │ HostBridge                │
//!  │   process_sample_buffer ──┼──ControlBus──► BridgeDelegate        │
//!  │   VideoSender  ───────────┼── shm ────┼──► VideoReceiver          │
//!  │   AudioSender  ───────────┼── socket ─┼──► AudioReceiver          │
//!  │   keep-alive check ◄──────┼── store ──┼─── KeepAliveMonitor       │
//!  └───────────────────────────┘           └───────────────────────────┘
//! ```
//!
//! Bus handlers never do work themselves. They forward each signal into
//! an unbounded channel drained by one lifecycle driver task per bridge,
//! so signals are handled in arrival order and never block the bus.

pub mod extension;
pub mod host;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::bus::{ControlBus, OwnerId};
use crate::error::{BridgeError, FinishReason};
use crate::keepalive::KeepAliveSettings;
use crate::media::{AudioBuffer, VideoFrame};
use crate::paths::ContainerPaths;
use crate::signal::{LifecycleSignal, Role};
use crate::state::BridgeState;
use crate::video::VideoSettings;

pub use extension::ExtensionBridge;
pub use host::HostBridge;

// ── Settings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSettings {
    pub paths: ContainerPaths,
    pub video: VideoSettings,
    pub keep_alive: KeepAliveSettings,
}

impl BridgeSettings {
    /// Default tunables for the given container.
    pub fn new(paths: ContainerPaths) -> Self {
        Self {
            paths,
            video: VideoSettings::default(),
            keep_alive: KeepAliveSettings::default(),
        }
    }
}

// ── Collaborators ────────────────────────────────────────────────

/// Receives the host side's output.
pub trait BridgeDelegate: Send + Sync {
    fn on_frame(&self, frame: VideoFrame);

    fn on_audio(&self, _buffer: AudioBuffer) {}

    /// Called exactly once, when the bridge reaches `Finished`.
    fn on_stopped(&self, reason: FinishReason);
}

/// Told why the extension side finished, exactly once.
pub trait ExtensionDelegate: Send + Sync {
    fn on_finished(&self, reason: FinishReason);
}

/// Presents the OS screen-capture picker.
pub trait CapturePicker: Send + Sync {
    fn present(&self);
}

/// Picker for platforms where the broadcast is started some other way.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPicker;

impl CapturePicker for NoopPicker {
    fn present(&self) {}
}

// ── Lifecycle plumbing ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BridgeEvent {
    Signal(LifecycleSignal),
    /// The audio channel went down without being asked to.
    AudioStopped(FinishReason),
}

/// Where bus and channel callbacks post events while a session is live.
/// Emptied on teardown, which also ends the driver task.
#[derive(Clone, Default)]
pub(crate) struct EventSlot(Arc<Mutex<Option<mpsc::UnboundedSender<BridgeEvent>>>>);

impl EventSlot {
    pub(crate) fn open(&self) -> mpsc::UnboundedReceiver<BridgeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.0.lock() = Some(tx);
        rx
    }

    pub(crate) fn post(&self, event: BridgeEvent) {
        if let Some(tx) = self.0.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    pub(crate) fn close(&self) {
        self.0.lock().take();
    }
}

/// Subscribe `owner` to everything `role`'s peer posts, forwarding each
/// signal into `slot`.
pub(crate) fn subscribe_to_peer(
    bus: &dyn ControlBus,
    owner: OwnerId,
    role: Role,
    slot: &EventSlot,
) {
    for signal in LifecycleSignal::posted_by(role.peer()) {
        let slot = slot.clone();
        bus.subscribe(
            owner,
            signal,
            Arc::new(move |signal: LifecycleSignal| slot.post(BridgeEvent::Signal(signal))),
        );
    }
}

/// Observable [`BridgeState`] with validated transitions.
pub(crate) struct Lifecycle {
    state: watch::Sender<BridgeState>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: watch::Sender::new(BridgeState::Idle),
        }
    }

    pub(crate) fn current(&self) -> BridgeState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<BridgeState> {
        self.state.subscribe()
    }

    /// Apply `f` atomically; observers are only woken when it succeeds.
    pub(crate) fn transition(
        &self,
        f: impl FnOnce(&mut BridgeState) -> Result<(), BridgeError>,
    ) -> Result<(), BridgeError> {
        let mut outcome = Ok(());
        self.state.send_if_modified(|state| {
            outcome = f(state);
            outcome.is_ok()
        });
        if let Err(e) = &outcome {
            debug!(state = %self.current(), "transition refused: {e}");
        }
        outcome
    }

    /// `true` only for the call that actually entered `Finished`.
    pub(crate) fn finish(&self, reason: FinishReason) -> bool {
        self.transition(|state| state.finish(reason)).is_ok()
    }
}
