//! Receiving end of the audio socket.
//!
//! The server accepts exactly one peer. After the handshake it keeps
//! accepting so that later connection attempts can be closed right away
//! without touching the established stream.

use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::MessageCodec;
use crate::error::{BridgeError, FinishReason};
use crate::message::Message;
use crate::network::handshake::server_handshake;
use crate::shm::remove_if_exists;
use crate::state::ChannelPhase;

const EVENT_QUEUE: usize = 64;

#[derive(Debug)]
pub enum ServerEvent {
    /// Bound and listening.
    Started,
    /// The peer completed the handshake.
    Connected,
    Message(Message),
    /// The channel went down; the socket path has been removed.
    Stopped(FinishReason),
}

pub type ServerEvents = mpsc::Receiver<ServerEvent>;

pub struct SocketServer {
    path: PathBuf,
    phase: Arc<Mutex<ChannelPhase>>,
    cancel: CancellationToken,
    // Held for the server's lifetime; the OS lock is what refuses a second bind.
    _lock: File,
}

impl SocketServer {
    /// Bind `path` and start accepting in the background.
    ///
    /// Fails with [`BridgeError::AddressInUse`] while another server holds
    /// the same path.
    pub async fn bind(path: &Path) -> Result<(Self, ServerEvents), BridgeError> {
        let lock = acquire_lock(path)?;

        remove_if_exists(path)?;
        let listener = UnixListener::bind(path)?;

        let phase = Arc::new(Mutex::new(ChannelPhase::Idle));
        phase.lock().begin_listen()?;

        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        let cancel = CancellationToken::new();
        let _ = tx.send(ServerEvent::Started).await;
        info!(path = %path.display(), "socket server listening");

        tokio::spawn(serve(
            listener,
            path.to_path_buf(),
            Arc::clone(&phase),
            tx,
            cancel.clone(),
        ));

        Ok((
            Self {
                path: path.to_path_buf(),
                phase,
                cancel,
                _lock: lock,
            },
            rx,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn phase(&self) -> ChannelPhase {
        self.phase.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.phase.lock().is_connected()
    }

    /// Stop serving and remove the socket path. No `Stopped` event is sent.
    pub fn stop(&self) {
        self.cancel.cancel();
        self.phase.lock().disconnect(FinishReason::BroadcastFinished);
        if let Err(e) = remove_if_exists(&self.path) {
            warn!(path = %self.path.display(), "failed to remove socket: {e}");
        }
    }
}

impl Drop for SocketServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn acquire_lock(path: &Path) -> Result<File, BridgeError> {
    let mut lock_path = path.as_os_str().to_owned();
    lock_path.push(".lock");
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(PathBuf::from(lock_path))?;

    match file.try_lock() {
        Ok(()) => Ok(file),
        Err(TryLockError::WouldBlock) => Err(BridgeError::AddressInUse(path.display().to_string())),
        Err(TryLockError::Error(e)) => Err(e.into()),
    }
}

async fn serve(
    listener: UnixListener,
    path: PathBuf,
    phase: Arc<Mutex<ChannelPhase>>,
    events: mpsc::Sender<ServerEvent>,
    cancel: CancellationToken,
) {
    let reason = tokio::select! {
        _ = cancel.cancelled() => return,
        reason = run_session(&listener, &phase, &events) => reason,
    };

    let (first, connected_for) = {
        let mut phase = phase.lock();
        let connected_for = phase.connected_duration().unwrap_or_default();
        (phase.disconnect(reason), connected_for)
    };
    if first {
        info!(
            path = %path.display(),
            %reason,
            connected_ms = connected_for.as_millis() as u64,
            "socket server stopped"
        );
        if let Err(e) = remove_if_exists(&path) {
            warn!(path = %path.display(), "failed to remove socket: {e}");
        }
        let _ = events.send(ServerEvent::Stopped(reason)).await;
    }
}

/// Accept, handshake and read until the channel fails.
async fn run_session(
    listener: &UnixListener,
    phase: &Mutex<ChannelPhase>,
    events: &mpsc::Sender<ServerEvent>,
) -> FinishReason {
    let mut stream = match listener.accept().await {
        Ok((stream, _)) => stream,
        Err(e) => return BridgeError::from(e).finish_reason(),
    };

    let began = phase.lock().begin_handshake();
    if let Err(e) = began {
        return e.finish_reason();
    }
    if let Err(e) = server_handshake(&mut stream).await {
        return e.finish_reason();
    }
    let completed = phase.lock().complete_handshake();
    if let Err(e) = completed {
        return e.finish_reason();
    }
    debug!("peer connected");
    let _ = events.send(ServerEvent::Connected).await;

    read_loop(listener, stream, events).await
}

async fn read_loop(
    listener: &UnixListener,
    stream: UnixStream,
    events: &mpsc::Sender<ServerEvent>,
) -> FinishReason {
    let mut framed = FramedRead::new(stream, MessageCodec::new());
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                if let Ok((extra, _)) = accepted {
                    debug!("rejecting second connection");
                    drop(extra);
                }
            }
            next = framed.next() => match next {
                Some(Ok(message)) => {
                    if events.send(ServerEvent::Message(message)).await.is_err() {
                        return FinishReason::BroadcastFinished;
                    }
                }
                Some(Err(e)) => {
                    warn!("socket read failed: {e}");
                    return e.finish_reason();
                }
                None => return FinishReason::NoConnection,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::HEADER_LENGTH;
    use crate::network::handshake::{client_handshake, new_token};
    use tokio::io::AsyncWriteExt;

    async fn connect_raw(path: &Path) -> UnixStream {
        let mut stream = UnixStream::connect(path).await.unwrap();
        client_handshake(&mut stream, &new_token()).await.unwrap();
        stream
    }

    async fn stop_reason(events: &mut ServerEvents) -> FinishReason {
        loop {
            match events.recv().await {
                Some(ServerEvent::Stopped(reason)) => return reason,
                Some(_) => continue,
                None => panic!("server events closed without Stopped"),
            }
        }
    }

    #[tokio::test]
    async fn bind_emits_started_and_creates_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio.sock");
        let (server, mut events) = SocketServer::bind(&path).await.unwrap();

        assert!(matches!(events.recv().await, Some(ServerEvent::Started)));
        assert!(path.exists());
        assert_eq!(server.phase(), ChannelPhase::Listening);
    }

    #[tokio::test]
    async fn second_bind_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio.sock");
        let (_first, _events) = SocketServer::bind(&path).await.unwrap();

        let second = SocketServer::bind(&path).await;
        assert!(matches!(second, Err(BridgeError::AddressInUse(_))));
    }

    #[tokio::test]
    async fn rebind_after_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio.sock");
        let (first, _events) = SocketServer::bind(&path).await.unwrap();
        drop(first);
        assert!(SocketServer::bind(&path).await.is_ok());
    }

    #[tokio::test]
    async fn stop_removes_socket_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio.sock");
        let (server, _events) = SocketServer::bind(&path).await.unwrap();
        server.stop();
        assert!(!path.exists());
        assert!(server.phase().is_disconnected());
    }

    #[tokio::test]
    async fn zeroed_header_stops_with_invalid_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio.sock");
        let (server, mut events) = SocketServer::bind(&path).await.unwrap();

        let mut stream = connect_raw(&path).await;
        stream.write_all(&[0u8; HEADER_LENGTH]).await.unwrap();

        assert_eq!(stop_reason(&mut events).await, FinishReason::InvalidHeader);
        assert!(!path.exists());
        assert!(server.phase().is_disconnected());
    }

    #[tokio::test]
    async fn peer_hang_up_stops_with_no_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio.sock");
        let (server, mut events) = SocketServer::bind(&path).await.unwrap();

        let stream = connect_raw(&path).await;
        drop(stream);

        assert_eq!(stop_reason(&mut events).await, FinishReason::NoConnection);
        assert!(!path.exists());
        assert!(!server.is_connected());
    }
}
