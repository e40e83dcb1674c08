//! Video half of the bridge: a latest-value cell paced by frame clocks.
//!
//! The sender overwrites the cell at most once per tick of its clock; the
//! receiver re-reads and decodes it on every tick of its own. Frames may
//! be dropped, repeated or (rarely) torn.

pub mod receiver;
pub mod sender;

pub use receiver::{FrameHandler, ReceiverStats, VideoReceiver};
pub use sender::VideoSender;

use crate::shm::DEFAULT_CAPACITY;

/// Tunables shared by both video endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoSettings {
    /// Size of the shared cell in bytes.
    pub capacity: usize,
    /// Deliver a frame again when the cell has not changed since the last
    /// tick. When `false`, a record whose `display_time_ns` equals the last
    /// delivered one is skipped.
    pub deliver_duplicates: bool,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            deliver_duplicates: true,
        }
    }
}
