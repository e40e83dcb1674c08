//! Extension-side audio endpoint.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::audio::StopHandler;
use crate::error::BridgeError;
use crate::header::HEADER_LENGTH;
use crate::media::AudioBuffer;
use crate::message::Message;
use crate::network::{ClientEvent, ClientEvents, SocketClient};

/// Bytes that may wait behind the in-flight write before `submit` starts
/// dropping buffers.
pub const MAX_QUEUED_BYTES: usize = 2 * 1024 * 1024;

pub struct AudioSender {
    path: PathBuf,
    on_stopped: StopHandler,
    active: Mutex<Option<Active>>,
}

struct Active {
    client: SocketClient,
    queue: mpsc::UnboundedSender<Message>,
    queued: Arc<AtomicUsize>,
}

impl AudioSender {
    pub fn new(path: impl Into<PathBuf>, on_stopped: StopHandler) -> Self {
        Self {
            path: path.into(),
            on_stopped,
            active: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_running(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|active| active.client.is_connected())
    }

    /// Connect and handshake with the host's server.
    ///
    /// Returns `Ok(false)` if already started.
    pub async fn start(&self) -> Result<bool, BridgeError> {
        if self.active.lock().is_some() {
            return Ok(false);
        }

        let (client, events) = SocketClient::connect(&self.path).await?;

        let (queue, rx) = mpsc::unbounded_channel();
        let queued = Arc::new(AtomicUsize::new(0));
        {
            let mut active = self.active.lock();
            if active.is_some() {
                client.close();
                return Ok(false);
            }
            *active = Some(Active {
                client: client.clone(),
                queue,
                queued: Arc::clone(&queued),
            });
        }

        tokio::spawn(write_loop(client, rx, queued));
        tokio::spawn(watch_events(events, self.on_stopped.clone()));

        info!(path = %self.path.display(), "audio sender started");
        Ok(true)
    }

    /// Queue one buffer for sending. Never blocks.
    ///
    /// Returns `false` if the channel is not connected, the buffer cannot
    /// be framed, or [`MAX_QUEUED_BYTES`] are already waiting. A buffer is
    /// always accepted when nothing is queued.
    pub fn submit(&self, buffer: &AudioBuffer) -> bool {
        let active = self.active.lock();
        let Some(active) = active.as_ref() else {
            return false;
        };
        if !active.client.is_connected() {
            return false;
        }
        let message = match Message::from_audio(buffer) {
            Ok(message) => message,
            Err(e) => {
                warn!("dropping audio buffer: {e}");
                return false;
            }
        };

        let size = wire_size(&message);
        let queued = active.queued.load(Ordering::Acquire);
        if queued > 0 && queued + size > MAX_QUEUED_BYTES {
            debug!(queued, size, "audio queue full, dropping buffer");
            return false;
        }
        active.queued.fetch_add(size, Ordering::AcqRel);
        if active.queue.send(message).is_err() {
            active.queued.fetch_sub(size, Ordering::AcqRel);
            return false;
        }
        true
    }

    /// Bytes accepted by [`submit`](Self::submit) and not yet written.
    pub fn queued_bytes(&self) -> usize {
        self.active
            .lock()
            .as_ref()
            .map_or(0, |active| active.queued.load(Ordering::Acquire))
    }

    /// Close the channel and discard anything still queued.
    pub fn stop(&self) -> bool {
        let Some(active) = self.active.lock().take() else {
            return false;
        };
        active.client.close();
        info!(path = %self.path.display(), "audio sender stopped");
        true
    }
}

impl Drop for AudioSender {
    fn drop(&mut self) {
        self.stop();
    }
}

fn wire_size(message: &Message) -> usize {
    HEADER_LENGTH + message.body_len()
}

async fn write_loop(
    client: SocketClient,
    mut queue: mpsc::UnboundedReceiver<Message>,
    queued: Arc<AtomicUsize>,
) {
    while let Some(message) = queue.recv().await {
        let size = wire_size(&message);
        let sent = client.send(message).await;
        queued.fetch_sub(size, Ordering::AcqRel);
        if !sent {
            break;
        }
    }
    debug!("audio writer exited");
}

async fn watch_events(mut events: ClientEvents, on_stopped: StopHandler) {
    while let Some(event) = events.recv().await {
        match event {
            ClientEvent::Connected => debug!("audio channel connected"),
            ClientEvent::Stopped(reason) => {
                on_stopped(reason);
                break;
            }
        }
    }
}
