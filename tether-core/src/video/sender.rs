//! Extension-side video endpoint.
//!
//! `submit` is called from the capture callback and never blocks: it only
//! flips the "may write" flag and hands the sample to a background writer.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::clock::{FrameClock, Fps, TickSource};
use crate::error::BridgeError;
use crate::media::{VideoSample, record};
use crate::shm::SharedMemoryCell;
use crate::video::VideoSettings;

type SharedCell = Arc<Mutex<Option<SharedMemoryCell>>>;

pub struct VideoSender {
    path: PathBuf,
    settings: VideoSettings,
    running: Arc<AtomicBool>,
    may_write: Arc<AtomicBool>,
    cell: SharedCell,
    active: Mutex<Option<Active>>,
}

struct Active {
    clock: FrameClock,
    samples: mpsc::Sender<VideoSample>,
}

impl VideoSender {
    pub fn new(path: impl Into<PathBuf>, settings: VideoSettings) -> Self {
        Self {
            path: path.into(),
            settings,
            running: Arc::new(AtomicBool::new(false)),
            may_write: Arc::new(AtomicBool::new(false)),
            cell: Arc::new(Mutex::new(None)),
            active: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Map the cell, arm the clock and spawn the writer.
    ///
    /// Returns `Ok(false)` if already running.
    pub fn start(&self, fps: Fps) -> Result<bool, BridgeError> {
        let mut active = self.active.lock();
        if active.is_some() {
            return Ok(false);
        }

        let cell = SharedMemoryCell::attach(&self.path, self.settings.capacity).map_err(|e| {
            warn!(path = %self.path.display(), "cannot map video cell: {e}");
            BridgeError::NoConnection
        })?;
        *self.cell.lock() = Some(cell);

        let may_write = Arc::clone(&self.may_write);
        let clock = FrameClock::start(fps, move |_| may_write.store(true, Ordering::SeqCst));

        let (samples, rx) = mpsc::channel(1);
        tokio::spawn(write_loop(
            rx,
            clock.tick_source(),
            Arc::clone(&self.cell),
            Arc::clone(&self.running),
        ));

        self.running.store(true, Ordering::SeqCst);
        *active = Some(Active { clock, samples });
        info!(path = %self.path.display(), %fps, "video sender started");
        Ok(true)
    }

    /// Offer one captured sample.
    ///
    /// Returns `false` and drops the sample when not running or when the
    /// clock has not ticked since the last accepted sample.
    pub fn submit(&self, sample: VideoSample) -> bool {
        if !self.is_running() {
            return false;
        }
        if self
            .may_write
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        match self.active.lock().as_ref() {
            Some(active) => active.samples.try_send(sample).is_ok(),
            None => false,
        }
    }

    /// Disarm the clock, stop the writer and delete the cell.
    ///
    /// Returns `false` if not running.
    pub fn stop(&self) -> bool {
        let Some(active) = self.active.lock().take() else {
            return false;
        };
        self.running.store(false, Ordering::SeqCst);
        self.may_write.store(false, Ordering::SeqCst);
        active.clock.stop();
        drop(active.samples);

        if let Some(cell) = self.cell.lock().take() {
            if let Err(e) = cell.close() {
                warn!(path = %self.path.display(), "failed to remove video cell: {e}");
            }
        }
        info!(path = %self.path.display(), "video sender stopped");
        true
    }
}

impl Drop for VideoSender {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn write_loop(
    mut samples: mpsc::Receiver<VideoSample>,
    ticks: TickSource,
    cell: SharedCell,
    running: Arc<AtomicBool>,
) {
    while let Some(sample) = samples.recv().await {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let Some(display_time_ns) = ticks.last_tick_ns() else {
            continue;
        };

        let bytes = record::encode(&sample.pixel_buffer, sample.orientation, display_time_ns);

        let mut guard = cell.lock();
        let Some(slot) = guard.as_mut() else {
            break;
        };
        if slot.write(&bytes) {
            trace!(display_time_ns, len = bytes.len(), "frame written");
        } else {
            warn!(
                len = bytes.len(),
                capacity = slot.capacity(),
                "frame does not fit the video cell, dropped"
            );
        }
    }
    debug!("video writer exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{Orientation, PixelBuffer, PixelFormat};
    use std::time::Duration;

    fn sample() -> VideoSample {
        VideoSample {
            pixel_buffer: PixelBuffer::new(PixelFormat::Bgra32, 8, 8),
            orientation: Orientation::Up,
        }
    }

    fn settings() -> VideoSettings {
        VideoSettings {
            capacity: 64 * 1024,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn start_twice_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let sender = VideoSender::new(dir.path().join("video.shm"), settings());
        assert!(sender.start(Fps::new(30)).unwrap());
        assert!(!sender.start(Fps::new(30)).unwrap());
        assert!(sender.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn submit_before_start_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sender = VideoSender::new(dir.path().join("video.shm"), settings());
        assert!(!sender.submit(sample()));
    }

    #[tokio::test(start_paused = true)]
    async fn one_write_per_tick() {
        let dir = tempfile::tempdir().unwrap();
        let sender = VideoSender::new(dir.path().join("video.shm"), settings());
        sender.start(Fps::new(15)).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(sender.submit(sample()));
        assert!(!sender.submit(sample()));
        assert!(!sender.submit(sample()));

        tokio::time::sleep(Fps::new(15).interval()).await;
        assert!(sender.submit(sample()));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_deletes_cell_and_rejects_submits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video.shm");
        let sender = VideoSender::new(&path, settings());
        sender.start(Fps::new(30)).unwrap();
        assert!(path.exists());

        assert!(sender.stop());
        assert!(!path.exists());
        assert!(!sender.stop());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!sender.submit(sample()));
    }

    #[tokio::test(start_paused = true)]
    async fn written_record_decodes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video.shm");
        let sender = VideoSender::new(&path, settings());
        sender.start(Fps::new(30)).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        let mut pixels = PixelBuffer::new(PixelFormat::Bgra32, 8, 8);
        pixels.plane_mut(0).unwrap().data[0] = 0x7F;
        assert!(sender.submit(VideoSample {
            pixel_buffer: pixels.clone(),
            orientation: Orientation::Right,
        }));
        tokio::time::sleep(Duration::from_millis(1)).await;

        let peer = SharedMemoryCell::open(&path).unwrap();
        let frame = peer.view(record::decode).unwrap();
        assert_eq!(frame.pixel_buffer, pixels);
        assert_eq!(frame.orientation, Orientation::Right);
        assert!(frame.display_time_ns > 0);
        std::mem::forget(peer);
    }
}
