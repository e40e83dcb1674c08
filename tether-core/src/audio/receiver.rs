//! Host-side audio endpoint.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::audio::StopHandler;
use crate::error::BridgeError;
use crate::media::AudioBuffer;
use crate::network::{ServerEvent, ServerEvents, SocketServer};

/// Called with every received buffer, in arrival order.
pub type AudioHandler = Arc<dyn Fn(AudioBuffer) + Send + Sync>;

pub struct AudioReceiver {
    path: PathBuf,
    on_audio: AudioHandler,
    on_stopped: StopHandler,
    server: Mutex<Option<SocketServer>>,
}

impl AudioReceiver {
    pub fn new(path: impl Into<PathBuf>, on_audio: AudioHandler, on_stopped: StopHandler) -> Self {
        Self {
            path: path.into(),
            on_audio,
            on_stopped,
            server: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_running(&self) -> bool {
        self.server.lock().is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.server.lock().as_ref().is_some_and(SocketServer::is_connected)
    }

    /// Bind the server and start delivering buffers.
    ///
    /// Returns `Ok(false)` if already started.
    pub async fn start(&self) -> Result<bool, BridgeError> {
        if self.is_running() {
            return Ok(false);
        }

        let (server, events) = SocketServer::bind(&self.path).await?;
        {
            let mut slot = self.server.lock();
            if slot.is_some() {
                return Ok(false);
            }
            *slot = Some(server);
        }

        tokio::spawn(pump(
            events,
            Arc::clone(&self.on_audio),
            Arc::clone(&self.on_stopped),
        ));
        info!(path = %self.path.display(), "audio receiver started");
        Ok(true)
    }

    /// Stop the server and remove the socket path.
    pub fn stop(&self) -> bool {
        let Some(server) = self.server.lock().take() else {
            return false;
        };
        server.stop();
        info!(path = %self.path.display(), "audio receiver stopped");
        true
    }
}

impl Drop for AudioReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn pump(mut events: ServerEvents, on_audio: AudioHandler, on_stopped: StopHandler) {
    while let Some(event) = events.recv().await {
        match event {
            ServerEvent::Started => debug!("audio server listening"),
            ServerEvent::Connected => debug!("audio sender connected"),
            ServerEvent::Message(message) => on_audio(message.into_audio()),
            ServerEvent::Stopped(reason) => {
                on_stopped(reason);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FinishReason;

    #[tokio::test]
    async fn start_twice_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let receiver = AudioReceiver::new(
            dir.path().join("audio.sock"),
            Arc::new(|_: AudioBuffer| {}),
            Arc::new(|_: FinishReason| {}),
        );
        assert!(receiver.start().await.unwrap());
        assert!(!receiver.start().await.unwrap());
        assert!(receiver.is_running());
        assert!(!receiver.is_connected());
    }

    #[tokio::test]
    async fn stop_removes_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio.sock");
        let receiver = AudioReceiver::new(
            &path,
            Arc::new(|_: AudioBuffer| {}),
            Arc::new(|_: FinishReason| {}),
        );
        receiver.start().await.unwrap();
        assert!(path.exists());
        assert!(receiver.stop());
        assert!(!path.exists());
        assert!(!receiver.stop());
    }
}
