//! # tether-core
//!
//! Relay bridge between a screen-broadcast extension process and the host
//! application that consumes its video and audio.
//!
//! This crate contains:
//! - **Media**: `PixelBuffer`, `VideoFrame`, `AudioBuffer` and the byte
//!   layouts used to move them (`media::record`, `header`, `message`)
//! - **Transports**: `SharedMemoryCell` (latest-value video cell) and the
//!   framed Unix-socket channel (`network`, `codec`)
//! - **Channels**: `VideoSender`/`VideoReceiver` paced by a `FrameClock`,
//!   `AudioSender`/`AudioReceiver` over the socket
//! - **Control plane**: `LifecycleSignal` and the injectable `ControlBus`
//!   (`LocalBus`, `DatagramBus`)
//! - **Shared state**: `KeyValueStore` and the host's `KeepAliveMonitor`
//! - **Bridges**: `ExtensionBridge` and `HostBridge`, driven by the
//!   `BridgeState` lifecycle
//! - **Error**: `BridgeError` and `FinishReason`, typed with `thiserror`

pub mod audio;
pub mod bridge;
pub mod bus;
pub mod clock;
pub mod codec;
pub mod error;
pub mod header;
pub mod keepalive;
pub mod media;
pub mod message;
pub mod network;
pub mod paths;
pub mod shm;
pub mod signal;
pub mod state;
pub mod store;
pub mod video;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use audio::{AudioReceiver, AudioSender};
pub use bridge::{
    BridgeDelegate, BridgeSettings, CapturePicker, ExtensionBridge, ExtensionDelegate, HostBridge,
    NoopPicker,
};
pub use bus::{ControlBus, DatagramBus, LocalBus, OwnerId, SubscriptionToken};
pub use clock::{FrameClock, Fps, MAX_FPS, MIN_FPS};
pub use codec::MessageCodec;
pub use error::{BridgeError, FinishReason};
pub use header::{HEADER_LENGTH, MAX_BODY_SIZE, MessageHeader};
pub use keepalive::{KeepAliveMonitor, KeepAliveSettings};
pub use media::{
    AudioBuffer, AudioFormat, Orientation, PixelBuffer, PixelFormat, SampleBuffer, VideoFrame,
    VideoSample,
};
pub use message::Message;
pub use network::{SocketClient, SocketServer};
pub use paths::ContainerPaths;
pub use shm::SharedMemoryCell;
pub use signal::{LifecycleSignal, Role};
pub use state::{BridgeState, ChannelPhase};
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use video::{ReceiverStats, VideoReceiver, VideoSender, VideoSettings};
