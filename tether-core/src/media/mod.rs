//! Media types carried across the bridge.
//!
//! These are the in-process representations handed to and received from
//! the bridge. The byte layouts used on the transports live in
//! [`record`] (video, shared memory) and [`crate::header`] (audio, socket).
//!
//! | Module   | Purpose                                              |
//! |----------|------------------------------------------------------|
//! | `format` | Pixel formats and the shared plane-layout table      |
//! | `frame`  | Pixel buffers, decoded frames and capture samples    |
//! | `audio`  | Audio stream descriptions and buffers                |
//! | `record` | `VideoFrameRecord` encode / decode                   |

pub mod audio;
pub mod format;
pub mod frame;
pub mod record;

pub use audio::{AudioBuffer, AudioFormat};
pub use format::{PixelFormat, PlaneLayout};
pub use frame::{Orientation, PixelBuffer, Plane, SampleBuffer, VideoFrame, VideoSample};
pub use record::{RECORD_LAYOUT_VERSION, VideoRecordHeader};
