//! Host-side video endpoint.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{info, trace, warn};

use crate::clock::{FrameClock, Fps};
use crate::error::BridgeError;
use crate::media::{VideoFrame, record};
use crate::shm::SharedMemoryCell;
use crate::video::VideoSettings;

/// Called with every decoded frame, on the clock's task. Must not block.
pub type FrameHandler = Arc<dyn Fn(VideoFrame) + Send + Sync>;

// ── ReceiverStats ────────────────────────────────────────────────

/// Counters exposed to whoever displays or logs the stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    /// Frames handed to the handler.
    pub frames_delivered: u64,
    /// Frames skipped because their timestamp had already been delivered.
    pub duplicates_skipped: u64,
    /// Ticks on which the cell did not hold a decodable frame.
    pub decode_failures: u64,
    pub last_width: u32,
    pub last_height: u32,
    pub last_display_time_ns: Option<u64>,
}

// ── VideoReceiver ────────────────────────────────────────────────

pub struct VideoReceiver {
    path: PathBuf,
    settings: VideoSettings,
    handler: FrameHandler,
    cell: Arc<Mutex<Option<SharedMemoryCell>>>,
    clock: Mutex<Option<FrameClock>>,
    stats_tx: watch::Sender<ReceiverStats>,
    stats_rx: watch::Receiver<ReceiverStats>,
}

impl VideoReceiver {
    pub fn new(path: impl Into<PathBuf>, settings: VideoSettings, handler: FrameHandler) -> Self {
        let (stats_tx, stats_rx) = watch::channel(ReceiverStats::default());
        Self {
            path: path.into(),
            settings,
            handler,
            cell: Arc::new(Mutex::new(None)),
            clock: Mutex::new(None),
            stats_tx,
            stats_rx,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_running(&self) -> bool {
        self.clock.lock().is_some()
    }

    /// Obtain a `watch::Receiver` for receiver statistics.
    pub fn stats_receiver(&self) -> watch::Receiver<ReceiverStats> {
        self.stats_rx.clone()
    }

    /// Map the cell and start polling it once per tick.
    ///
    /// Returns `Ok(false)` if already running.
    pub fn start(&self, fps: Fps) -> Result<bool, BridgeError> {
        let mut clock = self.clock.lock();
        if clock.is_some() {
            return Ok(false);
        }

        let cell = SharedMemoryCell::attach(&self.path, self.settings.capacity).map_err(|e| {
            warn!(path = %self.path.display(), "cannot map video cell: {e}");
            BridgeError::NoConnection
        })?;
        *self.cell.lock() = Some(cell);

        let mut poller = Poller {
            cell: Arc::clone(&self.cell),
            handler: Arc::clone(&self.handler),
            stats: self.stats_tx.clone(),
            deliver_duplicates: self.settings.deliver_duplicates,
            last_delivered: None,
        };
        *clock = Some(FrameClock::start(fps, move |_| poller.poll()));

        info!(path = %self.path.display(), %fps, "video receiver started");
        Ok(true)
    }

    /// Disarm the clock and delete the cell.
    ///
    /// Returns `Ok(false)` if not running.
    pub fn stop(&self) -> Result<bool, BridgeError> {
        let Some(clock) = self.clock.lock().take() else {
            return Ok(false);
        };
        clock.stop();
        if let Some(cell) = self.cell.lock().take() {
            cell.close()?;
        }
        info!(path = %self.path.display(), "video receiver stopped");
        Ok(true)
    }
}

impl Drop for VideoReceiver {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(path = %self.path.display(), "video receiver teardown failed: {e}");
        }
    }
}

/// Per-tick work: read the cell, decode, deliver.
struct Poller {
    cell: Arc<Mutex<Option<SharedMemoryCell>>>,
    handler: FrameHandler,
    stats: watch::Sender<ReceiverStats>,
    deliver_duplicates: bool,
    last_delivered: Option<u64>,
}

impl Poller {
    fn poll(&mut self) {
        let decoded = match self.cell.lock().as_ref() {
            Some(cell) => cell.view(record::decode),
            None => return,
        };

        let frame = match decoded {
            Ok(frame) => frame,
            Err(e) => {
                trace!("no frame in cell: {e}");
                self.stats.send_modify(|s| s.decode_failures += 1);
                return;
            }
        };

        if !self.deliver_duplicates && self.last_delivered == Some(frame.display_time_ns) {
            self.stats.send_modify(|s| s.duplicates_skipped += 1);
            return;
        }
        self.last_delivered = Some(frame.display_time_ns);

        let (width, height, display_time_ns) = (frame.width(), frame.height(), frame.display_time_ns);
        (self.handler)(frame);
        self.stats.send_modify(|s| {
            s.frames_delivered += 1;
            s.last_width = width;
            s.last_height = height;
            s.last_display_time_ns = Some(display_time_ns);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{Orientation, PixelBuffer, PixelFormat};
    use std::time::Duration;

    fn collecting() -> (Arc<Mutex<Vec<VideoFrame>>>, FrameHandler) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&frames);
        (frames, Arc::new(move |frame: VideoFrame| sink.lock().push(frame)))
    }

    fn settings(deliver_duplicates: bool) -> VideoSettings {
        VideoSettings {
            capacity: 16 * 1024,
            deliver_duplicates,
        }
    }

    fn write_frame(path: &Path, display_time_ns: u64) -> PixelBuffer {
        let mut pixels = PixelBuffer::new(PixelFormat::Nv12FullRange, 16, 16);
        pixels.plane_mut(1).unwrap().data[3] = 0x42;
        let bytes = record::encode(&pixels, Orientation::Up, display_time_ns);
        let mut cell = SharedMemoryCell::open(path).unwrap();
        assert!(cell.write(&bytes));
        std::mem::forget(cell);
        pixels
    }

    #[tokio::test(start_paused = true)]
    async fn empty_cell_counts_decode_failures() {
        let dir = tempfile::tempdir().unwrap();
        let (frames, handler) = collecting();
        let receiver = VideoReceiver::new(dir.path().join("video.shm"), settings(true), handler);
        receiver.start(Fps::new(30)).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(frames.lock().is_empty());
        assert!(receiver.stats_receiver().borrow().decode_failures > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicates_are_delivered_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video.shm");
        let (frames, handler) = collecting();
        let receiver = VideoReceiver::new(&path, settings(true), handler);
        receiver.start(Fps::new(30)).unwrap();

        let pixels = write_frame(&path, 99);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let frames = frames.lock();
        assert!(frames.len() > 1);
        assert!(frames.iter().all(|f| f.display_time_ns == 99));
        assert_eq!(frames[0].pixel_buffer, pixels);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_suppression() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video.shm");
        let (frames, handler) = collecting();
        let receiver = VideoReceiver::new(&path, settings(false), handler);
        receiver.start(Fps::new(30)).unwrap();

        write_frame(&path, 7);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(frames.lock().len(), 1);

        write_frame(&path, 8);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(frames.lock().len(), 2);

        let stats = receiver.stats_receiver().borrow().clone();
        assert_eq!(stats.frames_delivered, 2);
        assert!(stats.duplicates_skipped > 0);
        assert_eq!(stats.last_width, 16);
        assert_eq!(stats.last_display_time_ns, Some(8));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_deletes_cell() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video.shm");
        let (_frames, handler) = collecting();
        let receiver = VideoReceiver::new(&path, settings(true), handler);

        assert!(!receiver.stop().unwrap());
        receiver.start(Fps::new(15)).unwrap();
        assert!(path.exists());
        assert!(receiver.stop().unwrap());
        assert!(!path.exists());
        assert!(!receiver.is_running());
    }
}
