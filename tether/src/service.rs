//! Long-running host and extension roles.
//!
//! Both roles talk to each other through the shared container only: a
//! [`DatagramBus`] in its `bus/` directory, a [`FileStore`] for the
//! keep-alive record and the media channels the bridges open.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use tether_core::{
    AudioBuffer, AudioFormat, BridgeDelegate, BridgeState, DatagramBus, ExtensionBridge,
    ExtensionDelegate, FileStore, FinishReason, HostBridge, NoopPicker, Orientation,
    PixelBuffer, PixelFormat, SampleBuffer, VideoFrame, VideoSample,
};

use crate::config::BridgeConfig;

type ServiceResult = Result<(), Box<dyn std::error::Error>>;

const AUDIO_SAMPLE_RATE: u32 = 48_000;
const AUDIO_CHANNELS: u32 = 2;

// ── HostService ──────────────────────────────────────────────────

/// Receives broadcasts until stopped, one bridge per session.
pub struct HostService {
    config: BridgeConfig,
    running: Arc<AtomicBool>,
}

impl HostService {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Obtain a handle that can be used to stop the service from
    /// another task.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run sessions until stopped.
    pub async fn run(&self) -> ServiceResult {
        self.running.store(true, Ordering::SeqCst);

        let paths = self.config.paths();
        paths.ensure()?;
        let bus = Arc::new(DatagramBus::bind(&paths.bus_dir())?);
        info!(dir = %paths.dir().display(), "host ready, waiting for broadcasts");

        while self.is_running() {
            let delegate = Arc::new(StreamLogger::default());
            let host = HostBridge::new(
                self.config.to_settings(),
                bus.clone(),
                Arc::new(FileStore::new(paths.store())),
                delegate.clone(),
                Arc::new(NoopPicker),
            );
            host.start_capture(self.config.fps())?;

            let reason = self.session(&host, &delegate).await;
            match reason {
                Some(reason) => info!(%reason, "session ended"),
                None => {
                    host.stop_capture();
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("host service stopped");
        Ok(())
    }

    /// Log per-second statistics until the session finishes or the
    /// service is stopped (`None`).
    async fn session(&self, host: &HostBridge, delegate: &StreamLogger) -> Option<FinishReason> {
        let mut state = host.state_receiver();
        let stats = host.frame_stats();
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        let mut last_frames = 0;
        let mut last_audio = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !host.state().is_running() {
                        continue;
                    }
                    let current = stats.borrow().clone();
                    let audio = delegate.audio_buffers.load(Ordering::Relaxed);
                    info!(
                        fps = current.frames_delivered - last_frames,
                        width = current.last_width,
                        height = current.last_height,
                        duplicates = current.duplicates_skipped,
                        decode_failures = current.decode_failures,
                        audio_buffers = audio - last_audio,
                        "stream stats"
                    );
                    last_frames = current.frames_delivered;
                    last_audio = audio;
                }
                changed = state.changed() => {
                    if changed.is_err() {
                        return Some(FinishReason::BroadcastFinished);
                    }
                    let current = *state.borrow_and_update();
                    info!(state = %current, "host state");
                    if let BridgeState::Finished(reason) = current {
                        return Some(reason);
                    }
                }
                _ = wait_for_stop(&self.running) => return None,
            }
        }
    }
}

/// Host delegate that only counts and logs what arrives.
#[derive(Default)]
struct StreamLogger {
    audio_buffers: AtomicU64,
}

impl BridgeDelegate for StreamLogger {
    fn on_frame(&self, frame: VideoFrame) {
        trace!(
            width = frame.width(),
            height = frame.height(),
            display_time_ns = frame.display_time_ns,
            "frame"
        );
    }

    fn on_audio(&self, buffer: AudioBuffer) {
        self.audio_buffers.fetch_add(1, Ordering::Relaxed);
        trace!(frames = buffer.frame_count(), "audio");
    }

    fn on_stopped(&self, reason: FinishReason) {
        if reason.is_failure() {
            warn!(%reason, "capture stopped");
        } else {
            info!(%reason, "capture stopped");
        }
    }
}

// ── ExtensionService ─────────────────────────────────────────────

/// Plays the broadcast extension with a synthetic capture source.
pub struct ExtensionService {
    config: BridgeConfig,
    running: Arc<AtomicBool>,
}

impl ExtensionService {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Broadcast until the host ends the session or the service is stopped.
    pub async fn run(&self) -> ServiceResult {
        self.running.store(true, Ordering::SeqCst);

        let paths = self.config.paths();
        paths.ensure()?;
        let bus = Arc::new(DatagramBus::bind(&paths.bus_dir())?);
        let bridge = ExtensionBridge::new(
            self.config.to_settings(),
            bus,
            Arc::new(FileStore::new(paths.store())),
            Arc::new(FinishLogger),
        );

        if let Err(e) = bridge.broadcast_started() {
            error!("broadcast refused: {e} (is the host running?)");
            self.running.store(false, Ordering::SeqCst);
            return Err(e.into());
        }

        let mut source = SyntheticSource::new(&self.config);
        let mut state = bridge.state_receiver();
        let mut ticker = tokio::time::interval(source.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut dropped = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !bridge.state().is_running() {
                        continue;
                    }
                    if !bridge.process_sample_buffer(source.next_video()) {
                        dropped += 1;
                    }
                    if let Some(audio) = source.next_audio() {
                        bridge.process_sample_buffer(audio);
                    }
                }
                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = *state.borrow_and_update();
                    info!(state = %current, "extension state");
                    if current.is_finished() {
                        break;
                    }
                }
                _ = wait_for_stop(&self.running) => {
                    bridge.broadcast_finished();
                    break;
                }
            }
        }

        debug!(frames = source.frames(), dropped, "synthetic source stopped");
        self.running.store(false, Ordering::SeqCst);
        info!("extension service stopped");
        Ok(())
    }
}

struct FinishLogger;

impl ExtensionDelegate for FinishLogger {
    fn on_finished(&self, reason: FinishReason) {
        info!(%reason, "broadcast finished");
    }
}

// ── SyntheticSource ──────────────────────────────────────────────

/// Test-pattern video and silent PCM at a fixed rate.
pub struct SyntheticSource {
    fps: u32,
    width: u32,
    height: u32,
    audio: bool,
    frame: u64,
}

impl SyntheticSource {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            fps: config.extension.source_fps.clamp(1, 120),
            width: config.extension.frame_width.clamp(16, 4096),
            height: config.extension.frame_height.clamp(16, 4096),
            audio: config.extension.audio,
            frame: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps
    }

    pub fn frames(&self) -> u64 {
        self.frame
    }

    /// A BGRA frame with a white bar sweeping left to right.
    pub fn next_video(&mut self) -> SampleBuffer {
        let mut buffer = PixelBuffer::new(PixelFormat::Bgra32, self.width, self.height);
        let bar_width = (self.width / 16).max(1) as usize;
        let bar_x = (self.frame % u64::from(self.width)) as usize;

        if let Some(plane) = buffer.plane_mut(0) {
            let stride = plane.bytes_per_row;
            for (y, row) in plane.data.chunks_mut(stride).enumerate() {
                for (x, pixel) in row.chunks_exact_mut(4).enumerate() {
                    let on_bar = x >= bar_x && x < bar_x + bar_width;
                    let shade = if on_bar { 0xff } else { (y % 256) as u8 };
                    pixel.copy_from_slice(&[shade, shade / 2, 0x40, 0xff]);
                }
            }
        }

        self.frame += 1;
        SampleBuffer::Video(VideoSample {
            pixel_buffer: buffer,
            orientation: Orientation::Up,
        })
    }

    /// One tick's worth of silence, if audio is enabled.
    pub fn next_audio(&self) -> Option<SampleBuffer> {
        if !self.audio {
            return None;
        }
        let frames = (AUDIO_SAMPLE_RATE / self.fps) as usize;
        let format = AudioFormat::pcm_s16(f64::from(AUDIO_SAMPLE_RATE), AUDIO_CHANNELS);
        let data = vec![0u8; frames * format.bytes_per_frame as usize];
        Some(SampleBuffer::Audio(AudioBuffer::new(format, data)))
    }
}

async fn wait_for_stop(running: &Arc<AtomicBool>) {
    loop {
        if !running.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn services_create_with_defaults() {
        assert!(!HostService::new(BridgeConfig::default()).is_running());
        assert!(!ExtensionService::new(BridgeConfig::default()).is_running());
    }

    #[test]
    fn stop_handle_works() {
        let svc = HostService::new(BridgeConfig::default());
        let handle = svc.stop_handle();
        handle.store(true, Ordering::SeqCst);
        assert!(svc.is_running());
        svc.stop();
        assert!(!svc.is_running());
    }

    #[test]
    fn synthetic_frames_move() {
        let mut cfg = BridgeConfig::default();
        cfg.extension.frame_width = 64;
        cfg.extension.frame_height = 32;
        let mut source = SyntheticSource::new(&cfg);

        let SampleBuffer::Video(first) = source.next_video() else {
            panic!("expected video");
        };
        let SampleBuffer::Video(second) = source.next_video() else {
            panic!("expected video");
        };
        assert_eq!(first.pixel_buffer.width(), 64);
        assert!(first.pixel_buffer.matches_layout_table());
        assert_ne!(first.pixel_buffer, second.pixel_buffer);
        assert_eq!(source.frames(), 2);
    }

    #[test]
    fn synthetic_audio_is_silent_pcm() {
        let mut cfg = BridgeConfig::default();
        cfg.extension.source_fps = 50;
        let source = SyntheticSource::new(&cfg);

        let Some(SampleBuffer::Audio(buffer)) = source.next_audio() else {
            panic!("expected audio");
        };
        assert_eq!(buffer.frame_count(), 960);
        assert!(buffer.data.iter().all(|&b| b == 0));

        cfg.extension.audio = false;
        assert!(SyntheticSource::new(&cfg).next_audio().is_none());
    }

    #[tokio::test]
    async fn extension_without_host_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = BridgeConfig::default();
        cfg.container.root = dir.path().to_path_buf();

        let svc = ExtensionService::new(cfg);
        assert!(svc.run().await.is_err());
        assert!(!svc.is_running());
    }
}
