//! Keep-alive record proving the host is still around.
//!
//! The host rewrites a unix-epoch timestamp every `interval` while a
//! session is active. The extension reads it once at startup and refuses
//! to start if it is missing or older than `interval × stale_after`.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Fps;
use crate::error::BridgeError;
use crate::store::KeyValueStore;

/// Unix-epoch milliseconds of the host's last refresh.
pub const KEEP_ALIVE_KEY: &str = "broadcastKeepAliveDate";
/// Frame rate chosen by the host.
pub const FPS_KEY: &str = "broadcastFps";

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_STALE_AFTER: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAliveSettings {
    pub interval: Duration,
    /// Number of missed intervals after which the record is stale.
    pub stale_after: u32,
}

impl Default for KeepAliveSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }
}

impl KeepAliveSettings {
    /// Age at which a record no longer counts.
    pub fn max_age(&self) -> Duration {
        self.interval * self.stale_after
    }
}

pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

// ── KeepAliveMonitor ─────────────────────────────────────────────

pub struct KeepAliveMonitor {
    store: Arc<dyn KeyValueStore>,
    settings: KeepAliveSettings,
    cancel: Mutex<Option<CancellationToken>>,
    // Held around every refresh write and around the final remove.
    writing: Arc<Mutex<()>>,
}

impl KeepAliveMonitor {
    pub fn new(store: Arc<dyn KeyValueStore>, settings: KeepAliveSettings) -> Self {
        Self {
            store,
            settings,
            cancel: Mutex::new(None),
            writing: Arc::new(Mutex::new(())),
        }
    }

    pub fn settings(&self) -> KeepAliveSettings {
        self.settings
    }

    pub fn is_running(&self) -> bool {
        self.cancel.lock().is_some()
    }

    /// Write the timestamp now and then every interval until stopped.
    ///
    /// Returns `Ok(false)` if already running.
    pub fn start(&self) -> Result<bool, BridgeError> {
        let mut cancel = self.cancel.lock();
        if cancel.is_some() {
            return Ok(false);
        }
        self.touch()?;

        let token = CancellationToken::new();
        let task_token = token.clone();
        let store = Arc::clone(&self.store);
        let writing = Arc::clone(&self.writing);
        let interval = self.settings.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {
                        let _guard = writing.lock();
                        if task_token.is_cancelled() {
                            break;
                        }
                        if let Err(e) = store.set(KEEP_ALIVE_KEY, &unix_millis().to_string()) {
                            warn!("keep-alive refresh failed: {e}");
                        }
                    }
                }
            }
            debug!("keep-alive writer stopped");
        });

        *cancel = Some(token);
        info!(interval_ms = interval.as_millis() as u64, "keep-alive started");
        Ok(true)
    }

    /// Stop refreshing and remove the timestamp. No refresh lands after
    /// this returns.
    pub fn stop(&self) -> Result<bool, BridgeError> {
        let Some(token) = self.cancel.lock().take() else {
            return Ok(false);
        };
        let _guard = self.writing.lock();
        token.cancel();
        self.store.remove(KEEP_ALIVE_KEY)?;
        info!("keep-alive stopped");
        Ok(true)
    }

    /// Write the current time once.
    pub fn touch(&self) -> Result<(), BridgeError> {
        self.store.set(KEEP_ALIVE_KEY, &unix_millis().to_string())
    }

    /// Fail with [`BridgeError::NoConnection`] unless the host refreshed the
    /// record recently.
    pub fn check(&self) -> Result<(), BridgeError> {
        self.check_at(unix_millis())
    }

    /// [`check`](Self::check) against an explicit `now` in unix milliseconds.
    pub fn check_at(&self, now_ms: u64) -> Result<(), BridgeError> {
        let Some(raw) = self.store.get(KEEP_ALIVE_KEY)? else {
            debug!("no keep-alive record");
            return Err(BridgeError::NoConnection);
        };
        let Ok(written_ms) = raw.trim().parse::<u64>() else {
            debug!(raw = %raw, "unparsable keep-alive record");
            return Err(BridgeError::NoConnection);
        };

        let age = Duration::from_millis(now_ms.saturating_sub(written_ms));
        if age >= self.settings.max_age() {
            debug!(age_ms = age.as_millis() as u64, "keep-alive record is stale");
            return Err(BridgeError::NoConnection);
        }
        Ok(())
    }
}

impl Drop for KeepAliveMonitor {
    fn drop(&mut self) {
        if let Some(token) = self.cancel.lock().take() {
            token.cancel();
        }
    }
}

// ── Stored frame rate ────────────────────────────────────────────

pub fn store_fps(store: &dyn KeyValueStore, fps: Fps) -> Result<(), BridgeError> {
    store.set(FPS_KEY, &fps.value().to_string())
}

/// The stored rate, clamped; [`Fps::default`] when absent or unreadable.
pub fn load_fps(store: &dyn KeyValueStore) -> Fps {
    let stored = match store.get(FPS_KEY) {
        Ok(value) => value.and_then(|v| v.trim().parse::<u32>().ok()),
        Err(e) => {
            warn!("cannot read stored fps: {e}");
            None
        }
    };
    Fps::from_stored(stored)
}

pub fn clear_fps(store: &dyn KeyValueStore) -> Result<(), BridgeError> {
    store.remove(FPS_KEY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn monitor(store: &Arc<MemoryStore>) -> KeepAliveMonitor {
        KeepAliveMonitor::new(
            Arc::clone(store) as Arc<dyn KeyValueStore>,
            KeepAliveSettings::default(),
        )
    }

    #[test]
    fn missing_record_is_no_connection() {
        let store = Arc::new(MemoryStore::new());
        assert!(matches!(monitor(&store).check(), Err(BridgeError::NoConnection)));
    }

    #[test]
    fn garbage_record_is_no_connection() {
        let store = Arc::new(MemoryStore::new());
        store.set(KEEP_ALIVE_KEY, "yesterday").unwrap();
        assert!(monitor(&store).check().is_err());
    }

    #[test]
    fn staleness_boundary() {
        let store = Arc::new(MemoryStore::new());
        store.set(KEEP_ALIVE_KEY, "100000").unwrap();
        let monitor = monitor(&store);

        // 2 s × 5 = 10 s
        assert!(monitor.check_at(100_000 + 9_999).is_ok());
        assert!(monitor.check_at(100_000 + 10_000).is_err());
        assert!(monitor.check_at(50_000).is_ok());
    }

    #[tokio::test]
    async fn start_writes_fresh_record() {
        let store = Arc::new(MemoryStore::new());
        let monitor = monitor(&store);
        assert!(monitor.start().unwrap());
        assert!(!monitor.start().unwrap());
        monitor.check().unwrap();
    }

    #[tokio::test]
    async fn stop_clears_record() {
        let store = Arc::new(MemoryStore::new());
        let monitor = monitor(&store);
        monitor.start().unwrap();
        assert!(monitor.stop().unwrap());
        assert_eq!(store.get(KEEP_ALIVE_KEY).unwrap(), None);
        assert!(!monitor.stop().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn refreshes_periodically() {
        let store = Arc::new(MemoryStore::new());
        let monitor = monitor(&store);
        monitor.start().unwrap();
        store.set(KEEP_ALIVE_KEY, "0").unwrap();

        tokio::time::sleep(DEFAULT_INTERVAL + Duration::from_millis(10)).await;
        monitor.check().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn no_refresh_survives_stop() {
        let store = Arc::new(MemoryStore::new());
        let monitor = KeepAliveMonitor::new(
            Arc::clone(&store) as Arc<dyn KeyValueStore>,
            KeepAliveSettings {
                interval: Duration::from_millis(1),
                stale_after: DEFAULT_STALE_AFTER,
            },
        );

        for _ in 0..200 {
            monitor.start().unwrap();
            tokio::time::sleep(Duration::from_millis(1)).await;
            monitor.stop().unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
            assert_eq!(store.get(KEEP_ALIVE_KEY).unwrap(), None);
        }
    }

    #[test]
    fn fps_roundtrip_through_store() {
        let store = MemoryStore::new();
        assert_eq!(load_fps(&store), Fps::default());
        store_fps(&store, Fps::new(30)).unwrap();
        assert_eq!(load_fps(&store).value(), 30);
        store.set(FPS_KEY, "90").unwrap();
        assert_eq!(load_fps(&store).value(), 30);
        clear_fps(&store).unwrap();
        assert_eq!(load_fps(&store), Fps::default());
    }
}
