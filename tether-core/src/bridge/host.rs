//! Receiver half, living in the host application.
//!
//! The host owns the session: it picks the frame rate, keeps the
//! keep-alive record fresh, binds the audio socket and decides when the
//! call is over.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::audio::AudioReceiver;
use crate::bridge::{
    BridgeDelegate, BridgeEvent, BridgeSettings, CapturePicker, EventSlot, Lifecycle,
    subscribe_to_peer,
};
use crate::bus::{ControlBus, OwnerId};
use crate::clock::Fps;
use crate::error::{BridgeError, FinishReason};
use crate::keepalive::{KeepAliveMonitor, clear_fps, store_fps};
use crate::media::{AudioBuffer, VideoFrame};
use crate::paths::ContainerPaths;
use crate::signal::{LifecycleSignal, Role};
use crate::state::BridgeState;
use crate::store::KeyValueStore;
use crate::video::{ReceiverStats, VideoReceiver};

pub struct HostBridge {
    inner: Arc<Inner>,
}

struct Inner {
    paths: ContainerPaths,
    bus: Arc<dyn ControlBus>,
    store: Arc<dyn KeyValueStore>,
    delegate: Arc<dyn BridgeDelegate>,
    picker: Arc<dyn CapturePicker>,
    keep_alive: KeepAliveMonitor,
    owner: OwnerId,
    lifecycle: Lifecycle,
    events: EventSlot,
    fps: Mutex<Fps>,
    video: VideoReceiver,
    audio: AudioReceiver,
}

impl HostBridge {
    pub fn new(
        settings: BridgeSettings,
        bus: Arc<dyn ControlBus>,
        store: Arc<dyn KeyValueStore>,
        delegate: Arc<dyn BridgeDelegate>,
        picker: Arc<dyn CapturePicker>,
    ) -> Self {
        let events = EventSlot::default();

        let frames = Arc::clone(&delegate);
        let video = VideoReceiver::new(
            settings.paths.video_cell(),
            settings.video,
            Arc::new(move |frame: VideoFrame| frames.on_frame(frame)),
        );

        let buffers = Arc::clone(&delegate);
        let audio_events = events.clone();
        let audio = AudioReceiver::new(
            settings.paths.audio_socket(),
            Arc::new(move |buffer: AudioBuffer| buffers.on_audio(buffer)),
            Arc::new(move |reason: FinishReason| {
                audio_events.post(BridgeEvent::AudioStopped(reason));
            }),
        );

        Self {
            inner: Arc::new(Inner {
                keep_alive: KeepAliveMonitor::new(Arc::clone(&store), settings.keep_alive),
                paths: settings.paths,
                bus,
                store,
                delegate,
                picker,
                owner: OwnerId::new(),
                lifecycle: Lifecycle::new(),
                events,
                fps: Mutex::new(Fps::default()),
                video,
                audio,
            }),
        }
    }

    pub fn state(&self) -> BridgeState {
        self.inner.lifecycle.current()
    }

    pub fn state_receiver(&self) -> watch::Receiver<BridgeState> {
        self.inner.lifecycle.subscribe()
    }

    /// Frame counters of the video receiver.
    pub fn frame_stats(&self) -> watch::Receiver<ReceiverStats> {
        self.inner.video.stats_receiver()
    }

    pub fn fps(&self) -> Fps {
        *self.inner.fps.lock()
    }

    /// Publish the frame rate, start the keep-alive writer, listen for the
    /// extension and present the picker.
    pub fn start_capture(&self, fps: Fps) -> Result<(), BridgeError> {
        let inner = &self.inner;
        inner.lifecycle.transition(BridgeState::start)?;

        if let Err(e) = inner.prepare(fps) {
            warn!("cannot start capture: {e}");
            inner.finish(e.finish_reason());
            return Err(e);
        }

        let events = inner.events.open();
        tokio::spawn(drive(Arc::clone(inner), events));
        subscribe_to_peer(inner.bus.as_ref(), inner.owner, Role::Receiver, &inner.events);

        info!(%fps, dir = %inner.paths.dir().display(), "capture started, presenting picker");
        inner.picker.present();
        Ok(())
    }

    /// The user stopped sharing. Returns `false` if already finished.
    pub fn stop_capture(&self) -> bool {
        self.inner
            .finish_posting(LifecycleSignal::ReceiverFinished, FinishReason::BroadcastFinished)
    }

    /// The call is over.
    pub fn end_call(&self) -> bool {
        self.inner
            .finish_posting(LifecycleSignal::CallEnded, FinishReason::CallEnded)
    }

    /// Someone else took over the presentation.
    pub fn presentation_stolen(&self) -> bool {
        self.inner.finish_posting(
            LifecycleSignal::PresentationStolen,
            FinishReason::PresentationStolen,
        )
    }
}

impl Drop for HostBridge {
    fn drop(&mut self) {
        self.inner.teardown();
    }
}

impl Inner {
    fn prepare(&self, fps: Fps) -> Result<(), BridgeError> {
        self.paths.ensure()?;
        store_fps(self.store.as_ref(), fps)?;
        *self.fps.lock() = fps;
        self.keep_alive.start()?;
        Ok(())
    }

    fn finish(&self, reason: FinishReason) -> bool {
        if !self.lifecycle.finish(reason) {
            return false;
        }
        self.teardown();
        info!(%reason, "capture finished");
        self.delegate.on_stopped(reason);
        true
    }

    /// Let the extension know, then finish.
    fn finish_posting(&self, signal: LifecycleSignal, reason: FinishReason) -> bool {
        if self.lifecycle.current().is_finished() {
            return false;
        }
        self.bus.publish(signal);
        self.finish(reason)
    }

    fn teardown(&self) {
        self.bus.unsubscribe_all(self.owner);
        self.events.close();
        if let Err(e) = self.video.stop() {
            warn!("video receiver did not stop cleanly: {e}");
        }
        self.audio.stop();
        if let Err(e) = self.keep_alive.stop() {
            warn!("cannot clear keep-alive record: {e}");
        }
        if let Err(e) = clear_fps(self.store.as_ref()) {
            warn!("cannot clear stored fps: {e}");
        }
    }

    async fn handle(&self, event: BridgeEvent) {
        match event {
            BridgeEvent::Signal(LifecycleSignal::SenderStarted) => self.open_channels().await,
            BridgeEvent::Signal(LifecycleSignal::SenderPaused) => {
                if self.lifecycle.transition(BridgeState::pause).is_ok() {
                    info!("sender paused");
                }
            }
            BridgeEvent::Signal(LifecycleSignal::SenderResumed) => {
                if self.lifecycle.transition(BridgeState::resume).is_ok() {
                    info!("sender resumed");
                }
            }
            BridgeEvent::Signal(LifecycleSignal::SenderFinished) => {
                self.finish(FinishReason::BroadcastFinished);
            }
            BridgeEvent::Signal(other) => debug!(signal = %other, "ignored"),
            BridgeEvent::AudioStopped(reason) => {
                warn!(%reason, "audio channel lost");
                self.finish_posting(LifecycleSignal::ReceiverFinished, reason);
            }
        }
    }

    async fn open_channels(&self) {
        if self.lifecycle.current() != BridgeState::Started {
            debug!(state = %self.lifecycle.current(), "sender started again, ignored");
            return;
        }

        let fps = *self.fps.lock();
        let opened = match self.video.start(fps) {
            Ok(_) => self.audio.start().await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = opened {
            warn!("cannot open channels: {e}");
            self.finish_posting(LifecycleSignal::ReceiverFinished, e.finish_reason());
            return;
        }

        if self.lifecycle.transition(BridgeState::run).is_err() {
            self.teardown();
            return;
        }
        self.bus.publish(LifecycleSignal::ReceiverStarted);
        info!(%fps, "sender connected, receiving");
    }
}

async fn drive(inner: Arc<Inner>, mut events: mpsc::UnboundedReceiver<BridgeEvent>) {
    while let Some(event) = events.recv().await {
        inner.handle(event).await;
        if inner.lifecycle.current().is_finished() {
            break;
        }
    }
    debug!("host lifecycle driver exited");
}
