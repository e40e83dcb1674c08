//! Control plane for lifecycle signals.
//!
//! Subscribers register a synchronous handler per [`LifecycleSignal`].
//! Publishing calls every current subscriber of that signal; handlers
//! must not block (the bridges forward into a channel and return).
//!
//! Two implementations:
//!
//! | Bus            | Reach                                            |
//! |----------------|--------------------------------------------------|
//! | [`LocalBus`]   | one process; delivery completes before `publish` returns |
//! | [`DatagramBus`]| every process with a socket in a shared directory |

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::net::UnixDatagram;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::BridgeError;
use crate::signal::LifecycleSignal;

/// Callback invoked for every delivered signal.
pub type SignalHandler = Arc<dyn Fn(LifecycleSignal) + Send + Sync>;

// ── Identity ─────────────────────────────────────────────────────

/// Identifies who registered a subscription, so an owner can drop all
/// of its subscriptions at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(Uuid);

impl OwnerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`ControlBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken {
    id: u64,
    signal: LifecycleSignal,
    owner: OwnerId,
}

impl SubscriptionToken {
    pub fn signal(&self) -> LifecycleSignal {
        self.signal
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }
}

// ── ControlBus ───────────────────────────────────────────────────

pub trait ControlBus: Send + Sync {
    /// Deliver `signal` to every current subscriber.
    fn publish(&self, signal: LifecycleSignal);

    fn subscribe(
        &self,
        owner: OwnerId,
        signal: LifecycleSignal,
        handler: SignalHandler,
    ) -> SubscriptionToken;

    fn unsubscribe(&self, token: SubscriptionToken);

    /// Remove every subscription registered by `owner`.
    fn unsubscribe_all(&self, owner: OwnerId);
}

// ── SubscriberRegistry ───────────────────────────────────────────

struct Subscription {
    id: u64,
    owner: OwnerId,
    handler: SignalHandler,
}

/// Subscriber table shared by both bus implementations.
#[derive(Default)]
struct SubscriberRegistry {
    next_id: AtomicU64,
    topics: Mutex<HashMap<LifecycleSignal, Vec<Subscription>>>,
}

impl SubscriberRegistry {
    fn subscribe(
        &self,
        owner: OwnerId,
        signal: LifecycleSignal,
        handler: SignalHandler,
    ) -> SubscriptionToken {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.topics
            .lock()
            .entry(signal)
            .or_default()
            .push(Subscription { id, owner, handler });
        SubscriptionToken { id, signal, owner }
    }

    fn unsubscribe(&self, token: SubscriptionToken) {
        let mut topics = self.topics.lock();
        if let Some(subscribers) = topics.get_mut(&token.signal) {
            subscribers.retain(|s| s.id != token.id);
            if subscribers.is_empty() {
                topics.remove(&token.signal);
            }
        }
    }

    fn unsubscribe_all(&self, owner: OwnerId) {
        let mut topics = self.topics.lock();
        for subscribers in topics.values_mut() {
            subscribers.retain(|s| s.owner != owner);
        }
        topics.retain(|_, subscribers| !subscribers.is_empty());
    }

    /// Call every handler for `signal`. The lock is released first so a
    /// handler may subscribe, unsubscribe or publish.
    fn dispatch(&self, signal: LifecycleSignal) {
        let handlers: Vec<SignalHandler> = match self.topics.lock().get(&signal) {
            Some(subscribers) => subscribers.iter().map(|s| Arc::clone(&s.handler)).collect(),
            None => return,
        };
        trace!(%signal, subscribers = handlers.len(), "dispatching signal");
        for handler in handlers {
            handler(signal);
        }
    }

    fn subscriber_count(&self, signal: LifecycleSignal) -> usize {
        self.topics.lock().get(&signal).map_or(0, Vec::len)
    }
}

// ── LocalBus ─────────────────────────────────────────────────────

/// In-process bus. Both bridge halves can share one in tests.
#[derive(Default)]
pub struct LocalBus {
    registry: SubscriberRegistry,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self, signal: LifecycleSignal) -> usize {
        self.registry.subscriber_count(signal)
    }
}

impl ControlBus for LocalBus {
    fn publish(&self, signal: LifecycleSignal) {
        debug!(%signal, "publish");
        self.registry.dispatch(signal);
    }

    fn subscribe(
        &self,
        owner: OwnerId,
        signal: LifecycleSignal,
        handler: SignalHandler,
    ) -> SubscriptionToken {
        self.registry.subscribe(owner, signal, handler)
    }

    fn unsubscribe(&self, token: SubscriptionToken) {
        self.registry.unsubscribe(token);
    }

    fn unsubscribe_all(&self, owner: OwnerId) {
        self.registry.unsubscribe_all(owner);
    }
}

// ── DatagramBus ──────────────────────────────────────────────────

const ENDPOINT_EXTENSION: &str = "sock";
const MAX_DATAGRAM: usize = 256;

/// Cross-process bus over Unix datagram sockets.
///
/// Every participant binds `<dir>/<uuid>.sock`. `publish` dispatches
/// locally and then sends the signal's wire name to every other socket in
/// the directory; sockets nobody is listening on are deleted. A receive
/// task dispatches incoming names to local subscribers.
///
/// Must be bound inside a tokio runtime.
pub struct DatagramBus {
    dir: PathBuf,
    endpoint: PathBuf,
    socket: Arc<UnixDatagram>,
    registry: Arc<SubscriberRegistry>,
    cancel: CancellationToken,
}

impl DatagramBus {
    /// Join the bus rooted at `dir`, creating the directory if needed.
    pub fn bind(dir: &Path) -> Result<Self, BridgeError> {
        std::fs::create_dir_all(dir)?;
        let endpoint = dir.join(format!("{}.{ENDPOINT_EXTENSION}", Uuid::new_v4()));
        let socket = Arc::new(UnixDatagram::bind(&endpoint)?);

        let registry = Arc::new(SubscriberRegistry::default());
        let cancel = CancellationToken::new();
        tokio::spawn(receive_loop(
            Arc::clone(&socket),
            Arc::clone(&registry),
            cancel.clone(),
        ));

        debug!(endpoint = %endpoint.display(), "joined datagram bus");
        Ok(Self {
            dir: dir.to_path_buf(),
            endpoint,
            socket,
            registry,
            cancel,
        })
    }

    pub fn endpoint(&self) -> &Path {
        &self.endpoint
    }

    /// Sockets of every other participant currently in the directory.
    fn peers(&self) -> io::Result<Vec<PathBuf>> {
        let mut peers = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path != self.endpoint
                && path.extension().is_some_and(|ext| ext == ENDPOINT_EXTENSION)
            {
                peers.push(path);
            }
        }
        Ok(peers)
    }

    fn send_to_peers(&self, signal: LifecycleSignal) {
        let peers = match self.peers() {
            Ok(peers) => peers,
            Err(e) => {
                warn!(dir = %self.dir.display(), "cannot list bus peers: {e}");
                return;
            }
        };
        let wire = signal.wire_name();
        for peer in peers {
            match self.socket.try_send_to(wire.as_bytes(), &peer) {
                Ok(_) => {}
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
                    ) =>
                {
                    debug!(peer = %peer.display(), "pruning dead bus peer");
                    let _ = std::fs::remove_file(&peer);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    warn!(peer = %peer.display(), %signal, "bus peer not draining, dropped");
                }
                Err(e) => warn!(peer = %peer.display(), "bus send failed: {e}"),
            }
        }
    }
}

async fn receive_loop(
    socket: Arc<UnixDatagram>,
    registry: Arc<SubscriberRegistry>,
    cancel: CancellationToken,
) {
    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        let len = tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv(&mut buf) => match received {
                Ok(len) => len,
                Err(e) => {
                    warn!("bus receive failed: {e}");
                    break;
                }
            },
        };
        let Ok(name) = std::str::from_utf8(&buf[..len]) else {
            continue;
        };
        match LifecycleSignal::try_from(name) {
            Ok(signal) => registry.dispatch(signal),
            Err(e) => debug!("ignoring datagram: {e}"),
        }
    }
    debug!("bus receiver exited");
}

impl ControlBus for DatagramBus {
    fn publish(&self, signal: LifecycleSignal) {
        debug!(%signal, "publish");
        self.registry.dispatch(signal);
        self.send_to_peers(signal);
    }

    fn subscribe(
        &self,
        owner: OwnerId,
        signal: LifecycleSignal,
        handler: SignalHandler,
    ) -> SubscriptionToken {
        self.registry.subscribe(owner, signal, handler)
    }

    fn unsubscribe(&self, token: SubscriptionToken) {
        self.registry.unsubscribe(token);
    }

    fn unsubscribe_all(&self, owner: OwnerId) {
        self.registry.unsubscribe_all(owner);
    }
}

impl Drop for DatagramBus {
    fn drop(&mut self) {
        self.cancel.cancel();
        let _ = std::fs::remove_file(&self.endpoint);
    }
}

// ── Tests ────────────────────────────────────────────────────────
