//! Audio half of the bridge: every captured buffer is framed and sent, in
//! order, over the Unix socket.

pub mod receiver;
pub mod sender;

use std::sync::Arc;

use crate::error::FinishReason;

pub use receiver::{AudioHandler, AudioReceiver};
pub use sender::AudioSender;

/// Called once when the socket channel goes down on its own.
pub type StopHandler = Arc<dyn Fn(FinishReason) + Send + Sync>;
