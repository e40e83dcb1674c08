//! Sender half, living in the broadcast extension.
//!
//! | Event                     | Effect                                         |
//! |---------------------------|------------------------------------------------|
//! | `broadcast_started()`     | keep-alive check, subscribe, post `SenderStarted` |
//! | `ReceiverStarted`         | read fps, start video + audio → `Running`      |
//! | `broadcast_paused()`      | post `SenderPaused` → `Paused`                 |
//! | `broadcast_resumed()`     | post `SenderResumed` → `Running`               |
//! | `broadcast_finished()`    | post `SenderFinished` → `Finished(BroadcastFinished)` |
//! | `ReceiverFinished`        | `Finished(BroadcastFinished)`                  |
//! | `CallEnded`               | `Finished(CallEnded)`                          |
//! | `PresentationStolen`      | `Finished(PresentationStolen)`                 |
//! | audio channel lost        | post `SenderFinished` → `Finished(reason)`     |

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::audio::AudioSender;
use crate::bridge::{
    BridgeEvent, BridgeSettings, EventSlot, ExtensionDelegate, Lifecycle, subscribe_to_peer,
};
use crate::bus::{ControlBus, OwnerId};
use crate::error::{BridgeError, FinishReason};
use crate::keepalive::{KeepAliveMonitor, load_fps};
use crate::media::SampleBuffer;
use crate::signal::{LifecycleSignal, Role};
use crate::state::BridgeState;
use crate::store::KeyValueStore;
use crate::video::VideoSender;

pub struct ExtensionBridge {
    inner: Arc<Inner>,
}

struct Inner {
    bus: Arc<dyn ControlBus>,
    store: Arc<dyn KeyValueStore>,
    delegate: Arc<dyn ExtensionDelegate>,
    keep_alive: KeepAliveMonitor,
    owner: OwnerId,
    lifecycle: Lifecycle,
    events: EventSlot,
    video: VideoSender,
    audio: AudioSender,
}

impl ExtensionBridge {
    pub fn new(
        settings: BridgeSettings,
        bus: Arc<dyn ControlBus>,
        store: Arc<dyn KeyValueStore>,
        delegate: Arc<dyn ExtensionDelegate>,
    ) -> Self {
        let events = EventSlot::default();
        let audio_events = events.clone();
        let audio = AudioSender::new(
            settings.paths.audio_socket(),
            Arc::new(move |reason: FinishReason| {
                audio_events.post(BridgeEvent::AudioStopped(reason));
            }),
        );

        Self {
            inner: Arc::new(Inner {
                keep_alive: KeepAliveMonitor::new(Arc::clone(&store), settings.keep_alive),
                video: VideoSender::new(settings.paths.video_cell(), settings.video),
                audio,
                bus,
                store,
                delegate,
                owner: OwnerId::new(),
                lifecycle: Lifecycle::new(),
                events,
            }),
        }
    }

    pub fn state(&self) -> BridgeState {
        self.inner.lifecycle.current()
    }

    pub fn state_receiver(&self) -> watch::Receiver<BridgeState> {
        self.inner.lifecycle.subscribe()
    }

    /// The OS started the broadcast.
    ///
    /// Fails with [`BridgeError::NoConnection`] when the host's keep-alive
    /// record is missing or stale; the bridge is then already `Finished`
    /// and the delegate has been told. No channel is opened in that case.
    pub fn broadcast_started(&self) -> Result<(), BridgeError> {
        let inner = &self.inner;
        inner.lifecycle.transition(BridgeState::start)?;

        if let Err(e) = inner.keep_alive.check() {
            warn!("host is not alive, finishing broadcast");
            inner.bus.publish(LifecycleSignal::SenderFinished);
            inner.finish(e.finish_reason());
            return Err(e);
        }

        let events = inner.events.open();
        tokio::spawn(drive(Arc::clone(inner), events));
        subscribe_to_peer(inner.bus.as_ref(), inner.owner, Role::Sender, &inner.events);

        inner.bus.publish(LifecycleSignal::SenderStarted);
        info!("broadcast started, waiting for receiver");
        Ok(())
    }

    /// Returns `false` unless the bridge was `Running`.
    pub fn broadcast_paused(&self) -> bool {
        if self.inner.lifecycle.transition(BridgeState::pause).is_err() {
            return false;
        }
        self.inner.bus.publish(LifecycleSignal::SenderPaused);
        info!("broadcast paused");
        true
    }

    /// Returns `false` unless the bridge was `Paused`.
    pub fn broadcast_resumed(&self) -> bool {
        if self.inner.lifecycle.transition(BridgeState::resume).is_err() {
            return false;
        }
        self.inner.bus.publish(LifecycleSignal::SenderResumed);
        info!("broadcast resumed");
        true
    }

    /// The OS finished the broadcast. Returns `false` if already finished.
    pub fn broadcast_finished(&self) -> bool {
        if self.inner.lifecycle.current().is_finished() {
            return false;
        }
        self.inner.bus.publish(LifecycleSignal::SenderFinished);
        self.inner.finish(FinishReason::BroadcastFinished)
    }

    /// Route one captured sample to its channel.
    ///
    /// Returns `false` when not `Running` or when the channel dropped it.
    pub fn process_sample_buffer(&self, sample: SampleBuffer) -> bool {
        if !self.inner.lifecycle.current().is_running() {
            return false;
        }
        match sample {
            SampleBuffer::Video(sample) => self.inner.video.submit(sample),
            SampleBuffer::Audio(buffer) => self.inner.audio.submit(&buffer),
        }
    }
}

impl Drop for ExtensionBridge {
    fn drop(&mut self) {
        self.inner.teardown();
    }
}

impl Inner {
    /// Enter `Finished`, tear down, and tell the delegate. Only the first
    /// call has any effect.
    fn finish(&self, reason: FinishReason) -> bool {
        if !self.lifecycle.finish(reason) {
            return false;
        }
        self.teardown();
        info!(%reason, "broadcast finished");
        self.delegate.on_finished(reason);
        true
    }

    fn teardown(&self) {
        self.bus.unsubscribe_all(self.owner);
        self.events.close();
        self.video.stop();
        self.audio.stop();
    }

    /// Finish after a local failure, letting the host know.
    fn fail(&self, error: &BridgeError) {
        warn!("broadcast failed: {error}");
        if !self.lifecycle.current().is_finished() {
            self.bus.publish(LifecycleSignal::SenderFinished);
        }
        self.finish(error.finish_reason());
    }

    async fn handle(&self, event: BridgeEvent) {
        match event {
            BridgeEvent::Signal(LifecycleSignal::ReceiverStarted) => self.open_channels().await,
            BridgeEvent::Signal(LifecycleSignal::ReceiverFinished) => {
                self.finish(FinishReason::BroadcastFinished);
            }
            BridgeEvent::Signal(LifecycleSignal::CallEnded) => {
                self.finish(FinishReason::CallEnded);
            }
            BridgeEvent::Signal(LifecycleSignal::PresentationStolen) => {
                self.finish(FinishReason::PresentationStolen);
            }
            BridgeEvent::Signal(other) => debug!(signal = %other, "ignored"),
            BridgeEvent::AudioStopped(reason) => self.fail(&BridgeError::from(reason)),
        }
    }

    async fn open_channels(&self) {
        if self.lifecycle.current() != BridgeState::Started {
            debug!(state = %self.lifecycle.current(), "receiver started again, ignored");
            return;
        }

        let fps = load_fps(self.store.as_ref());
        if let Err(e) = self.video.start(fps) {
            self.fail(&e);
            return;
        }
        if let Err(e) = self.audio.start().await {
            self.fail(&e);
            return;
        }

        // Finished while the socket was connecting.
        if self.lifecycle.transition(BridgeState::run).is_err() {
            self.teardown();
            return;
        }
        info!(%fps, "receiver ready, streaming");
    }
}

async fn drive(inner: Arc<Inner>, mut events: mpsc::UnboundedReceiver<BridgeEvent>) {
    while let Some(event) = events.recv().await {
        inner.handle(event).await;
        if inner.lifecycle.current().is_finished() {
            break;
        }
    }
    debug!("extension lifecycle driver exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::keepalive::{KEEP_ALIVE_KEY, unix_millis};
    use crate::paths::ContainerPaths;
    use crate::store::MemoryStore;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<FinishReason>>);

    impl ExtensionDelegate for Recorder {
        fn on_finished(&self, reason: FinishReason) {
            self.0.lock().push(reason);
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        bus: Arc<LocalBus>,
        store: Arc<MemoryStore>,
        recorder: Arc<Recorder>,
        bridge: ExtensionBridge,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let paths = ContainerPaths::new(dir.path(), "group.test");
        paths.ensure().unwrap();
        let bus = Arc::new(LocalBus::new());
        let store = Arc::new(MemoryStore::new());
        let recorder = Arc::new(Recorder::default());
        let bridge = ExtensionBridge::new(
            BridgeSettings::new(paths),
            bus.clone(),
            store.clone(),
            recorder.clone(),
        );
        Fixture {
            _dir: dir,
            bus,
            store,
            recorder,
            bridge,
        }
    }

    fn counter(bus: &LocalBus, signal: LifecycleSignal) -> Arc<Mutex<usize>> {
        let count = Arc::new(Mutex::new(0));
        let handler_count = Arc::clone(&count);
        bus.subscribe(
            OwnerId::new(),
            signal,
            Arc::new(move |_: LifecycleSignal| *handler_count.lock() += 1),
        );
        count
    }

    #[tokio::test]
    async fn missing_keep_alive_finishes_with_no_connection() {
        let f = fixture();
        let finished = counter(&f.bus, LifecycleSignal::SenderFinished);

        assert!(matches!(
            f.bridge.broadcast_started(),
            Err(BridgeError::NoConnection)
        ));
        assert_eq!(
            f.bridge.state(),
            BridgeState::Finished(FinishReason::NoConnection)
        );
        assert_eq!(*f.recorder.0.lock(), vec![FinishReason::NoConnection]);
        assert_eq!(*finished.lock(), 1);
    }

    #[tokio::test]
    async fn started_posts_signal_and_waits() {
        let f = fixture();
        f.store.set(KEEP_ALIVE_KEY, &unix_millis().to_string()).unwrap();
        let started = counter(&f.bus, LifecycleSignal::SenderStarted);

        f.bridge.broadcast_started().unwrap();
        assert_eq!(f.bridge.state(), BridgeState::Started);
        assert_eq!(*started.lock(), 1);
        assert!(f.bridge.broadcast_started().is_err());
    }

    #[tokio::test]
    async fn call_ended_is_reported_once() {
        let f = fixture();
        f.store.set(KEEP_ALIVE_KEY, &unix_millis().to_string()).unwrap();
        f.bridge.broadcast_started().unwrap();
        let mut state = f.bridge.state_receiver();

        f.bus.publish(LifecycleSignal::CallEnded);
        f.bus.publish(LifecycleSignal::PresentationStolen);
        state.wait_for(BridgeState::is_finished).await.unwrap();

        assert_eq!(
            f.bridge.state(),
            BridgeState::Finished(FinishReason::CallEnded)
        );
        assert!(!f.bridge.broadcast_finished());
        assert_eq!(*f.recorder.0.lock(), vec![FinishReason::CallEnded]);
    }

    #[tokio::test]
    async fn receiver_started_without_host_socket_fails() {
        let f = fixture();
        f.store.set(KEEP_ALIVE_KEY, &unix_millis().to_string()).unwrap();
        f.bridge.broadcast_started().unwrap();
        let mut state = f.bridge.state_receiver();

        f.bus.publish(LifecycleSignal::ReceiverStarted);
        state.wait_for(BridgeState::is_finished).await.unwrap();
        assert_eq!(
            f.bridge.state(),
            BridgeState::Finished(FinishReason::NoConnection)
        );
    }

    #[tokio::test]
    async fn samples_rejected_unless_running() {
        let f = fixture();
        let buffer = crate::media::AudioBuffer::new(
            crate::media::AudioFormat::pcm_s16(48_000.0, 1),
            vec![0u8; 2],
        );
        assert!(!f.bridge.process_sample_buffer(SampleBuffer::Audio(buffer)));
        assert!(!f.bridge.broadcast_paused());
        assert!(!f.bridge.broadcast_resumed());
    }

    #[tokio::test]
    async fn finished_unsubscribes_from_bus() {
        let f = fixture();
        f.store.set(KEEP_ALIVE_KEY, &unix_millis().to_string()).unwrap();
        f.bridge.broadcast_started().unwrap();
        assert_eq!(f.bus.subscriber_count(LifecycleSignal::CallEnded), 1);

        assert!(f.bridge.broadcast_finished());
        assert_eq!(f.bus.subscriber_count(LifecycleSignal::CallEnded), 0);
        assert_eq!(*f.recorder.0.lock(), vec![FinishReason::BroadcastFinished]);
    }
}
