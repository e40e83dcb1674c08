//! Sending end of the audio socket.

use std::path::Path;
use std::sync::Arc;

use futures::SinkExt;
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::MessageCodec;
use crate::error::{BridgeError, FinishReason};
use crate::message::Message;
use crate::network::handshake::{client_handshake, new_token};
use crate::state::ChannelPhase;

const EVENT_QUEUE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    /// Handshake validated.
    Connected,
    /// The server went away.
    Stopped(FinishReason),
}

pub type ClientEvents = mpsc::Receiver<ClientEvent>;

type Writer = FramedWrite<OwnedWriteHalf, MessageCodec>;

/// A connected client. Cloning shares the same stream.
#[derive(Clone)]
pub struct SocketClient {
    phase: Arc<Mutex<ChannelPhase>>,
    // One in-flight write per channel; a second `send` waits here.
    writer: Arc<tokio::sync::Mutex<Writer>>,
    cancel: CancellationToken,
}

impl SocketClient {
    /// Connect to the server at `path` and run the handshake.
    ///
    /// Any failure before the echo is validated is reported as
    /// [`BridgeError::NoConnection`].
    pub async fn connect(path: &Path) -> Result<(Self, ClientEvents), BridgeError> {
        let mut stream = UnixStream::connect(path).await.map_err(|e| {
            debug!(path = %path.display(), "connect failed: {e}");
            BridgeError::NoConnection
        })?;

        let mut phase = ChannelPhase::Idle;
        phase.begin_handshake()?;
        client_handshake(&mut stream, &new_token()).await?;
        phase.complete_handshake()?;
        info!(path = %path.display(), "socket client connected");

        let (read_half, write_half) = stream.into_split();
        let phase = Arc::new(Mutex::new(phase));
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        let _ = tx.send(ClientEvent::Connected).await;

        tokio::spawn(watch_peer(read_half, Arc::clone(&phase), tx, cancel.clone()));

        Ok((
            Self {
                phase,
                writer: Arc::new(tokio::sync::Mutex::new(FramedWrite::new(
                    write_half,
                    MessageCodec::new(),
                ))),
                cancel,
            },
            rx,
        ))
    }

    pub fn phase(&self) -> ChannelPhase {
        self.phase.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.phase.lock().is_connected()
    }

    /// Write one message. Returns `false` if the channel is not connected
    /// or the write fails; a failed write disconnects the channel.
    pub async fn send(&self, message: Message) -> bool {
        if !self.is_connected() {
            return false;
        }
        let mut writer = self.writer.lock().await;
        if !self.is_connected() {
            return false;
        }
        match writer.send(message).await {
            Ok(()) => true,
            Err(e) => {
                warn!("socket write failed: {e}");
                self.phase.lock().disconnect(e.finish_reason());
                false
            }
        }
    }

    /// Close the channel. Later sends return `false`.
    pub fn close(&self) {
        self.cancel.cancel();
        self.phase.lock().disconnect(FinishReason::BroadcastFinished);
    }
}

/// The server never writes after the handshake; EOF or an error means
/// it is gone.
async fn watch_peer(
    mut read_half: OwnedReadHalf,
    phase: Arc<Mutex<ChannelPhase>>,
    events: mpsc::Sender<ClientEvent>,
    cancel: CancellationToken,
) {
    let mut buf = [0u8; 64];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            read = read_half.read(&mut buf) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => debug!(bytes = n, "ignoring unexpected bytes from server"),
            },
        }
    }

    let first = phase.lock().disconnect(FinishReason::NoConnection);
    if first {
        info!("socket server closed the connection");
        let _ = events.send(ClientEvent::Stopped(FinishReason::NoConnection)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_without_server_is_no_connection() {
        let dir = tempfile::tempdir().unwrap();
        let result = SocketClient::connect(&dir.path().join("missing.sock")).await;
        assert!(matches!(result, Err(BridgeError::NoConnection)));
    }
}
