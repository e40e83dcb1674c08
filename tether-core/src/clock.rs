//! Frame pacing.
//!
//! Each side of the video channel runs its own [`FrameClock`] at the same
//! nominal rate. Nothing synchronizes the two.

use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const MIN_FPS: u32 = 15;
pub const MAX_FPS: u32 = 30;

// ── Fps ──────────────────────────────────────────────────────────

/// Effective frame rate, always within `[MIN_FPS, MAX_FPS]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub struct Fps(u32);

impl Fps {
    /// Clamp `requested` into the supported range.
    pub fn new(requested: u32) -> Self {
        Self(requested.clamp(MIN_FPS, MAX_FPS))
    }

    /// Rate persisted by the host, falling back to the minimum.
    pub fn from_stored(stored: Option<u32>) -> Self {
        stored.map_or(Self::default(), Self::new)
    }

    pub const fn value(self) -> u32 {
        self.0
    }

    /// Time between two ticks.
    pub fn interval(self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.0))
    }
}

impl Default for Fps {
    fn default() -> Self {
        Self(MIN_FPS)
    }
}

impl From<u32> for Fps {
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

impl From<Fps> for u32 {
    fn from(fps: Fps) -> Self {
        fps.0
    }
}

impl std::fmt::Display for Fps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} fps", self.0)
    }
}

// ── Timestamps ───────────────────────────────────────────────────

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds since this process first asked for the time.
pub fn monotonic_ns() -> u64 {
    let epoch = *EPOCH.get_or_init(Instant::now);
    // Never 0, so 0 can mean "no tick yet".
    Instant::now().saturating_duration_since(epoch).as_nanos() as u64 + 1
}

// ── FrameClock ───────────────────────────────────────────────────

/// Periodic timer that calls `on_tick(timestamp_ns)` once per frame.
///
/// Late ticks are skipped, never bursted. Dropping the clock stops it.
pub struct FrameClock {
    fps: Fps,
    last_tick: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl FrameClock {
    /// Arm the clock on the current tokio runtime.
    pub fn start<F>(fps: Fps, mut on_tick: F) -> Self
    where
        F: FnMut(u64) + Send + 'static,
    {
        let last_tick = Arc::new(AtomicU64::new(0));
        let cancel = CancellationToken::new();

        let ticks = Arc::clone(&last_tick);
        let token = cancel.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(fps.interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let now = monotonic_ns();
                        ticks.store(now, Ordering::SeqCst);
                        on_tick(now);
                    }
                }
            }
            debug!(%fps, "frame clock stopped");
        });

        debug!(%fps, "frame clock armed");
        Self {
            fps,
            last_tick,
            cancel,
        }
    }

    pub fn fps(&self) -> Fps {
        self.fps
    }

    /// Timestamp of the most recent tick, `None` before the first.
    pub fn last_tick_ns(&self) -> Option<u64> {
        match self.last_tick.load(Ordering::SeqCst) {
            0 => None,
            ns => Some(ns),
        }
    }

    /// Shared view of the last tick for tasks that outlive a borrow.
    pub fn tick_source(&self) -> TickSource {
        TickSource(Arc::clone(&self.last_tick))
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for FrameClock {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Read-only handle on a clock's last tick.
#[derive(Debug, Clone)]
pub struct TickSource(Arc<AtomicU64>);

impl TickSource {
    pub fn last_tick_ns(&self) -> Option<u64> {
        match self.0.load(Ordering::SeqCst) {
            0 => None,
            ns => Some(ns),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn fps_clamps() {
        assert_eq!(Fps::new(5).value(), 15);
        assert_eq!(Fps::new(100).value(), 30);
        assert_eq!(Fps::new(24).value(), 24);
        assert_eq!(Fps::new(0).value(), MIN_FPS);
    }

    #[test]
    fn fps_from_stored() {
        assert_eq!(Fps::from_stored(None), Fps::new(MIN_FPS));
        assert_eq!(Fps::from_stored(Some(30)).value(), 30);
        assert_eq!(Fps::from_stored(Some(60)).value(), 30);
    }

    #[test]
    fn fps_interval() {
        assert_eq!(Fps::new(30).interval(), Duration::from_nanos(33_333_333));
        assert_eq!(Fps::new(15).interval(), Duration::from_nanos(66_666_666));
    }

    #[test]
    fn fps_deserialize_clamps() {
        let fps: Fps = serde_json::from_str("120").unwrap();
        assert_eq!(fps.value(), 30);
        assert_eq!(serde_json::to_string(&Fps::new(20)).unwrap(), "20");
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_at_configured_rate() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let clock = FrameClock::start(Fps::new(30), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        let ticks = count.load(Ordering::SeqCst);
        assert!((29..=31).contains(&ticks), "got {ticks} ticks");
        assert!(clock.last_tick_ns().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn timestamps_increase() {
        let stamps = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&stamps);
        let _clock = FrameClock::start(Fps::new(15), move |ns| sink.lock().push(ns));

        tokio::time::sleep(Duration::from_millis(500)).await;
        let stamps = stamps.lock();
        assert!(stamps.len() >= 2);
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_disarms() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let clock = FrameClock::start(Fps::new(30), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        clock.stop();
        assert!(!clock.is_running());

        tokio::time::sleep(Duration::from_millis(10)).await;
        let after_stop = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }
}
