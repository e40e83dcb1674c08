//! Pixel buffers, decoded video frames and capture samples.
//!
//! These are **in-process** representations. The bytes that actually
//! cross the process boundary are produced by [`super::record`].

use crate::error::BridgeError;
use crate::media::audio::AudioBuffer;
use crate::media::format::{PixelFormat, PlaneLayout};

// ── Orientation ──────────────────────────────────────────────────

/// Intended display orientation of a captured image (EXIF numbering).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Orientation {
    #[default]
    Up = 1,
    UpMirrored = 2,
    Down = 3,
    DownMirrored = 4,
    LeftMirrored = 5,
    Right = 6,
    RightMirrored = 7,
    Left = 8,
}

impl Orientation {
    /// Map a raw value to an orientation, defaulting to [`Orientation::Up`]
    /// for anything unknown.
    pub fn from_raw(value: u32) -> Self {
        match value {
            2 => Self::UpMirrored,
            3 => Self::Down,
            4 => Self::DownMirrored,
            5 => Self::LeftMirrored,
            6 => Self::Right,
            7 => Self::RightMirrored,
            8 => Self::Left,
            _ => Self::Up,
        }
    }

    pub const fn raw(self) -> u32 {
        self as u32
    }
}

// ── Plane ────────────────────────────────────────────────────────

/// One plane of a pixel buffer: `rows` rows of `bytes_per_row` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plane {
    pub bytes_per_row: usize,
    pub rows: usize,
    pub data: Vec<u8>,
}

impl Plane {
    pub fn zeroed(layout: PlaneLayout) -> Self {
        Self {
            bytes_per_row: layout.bytes_per_row,
            rows: layout.rows,
            data: vec![0; layout.bytes_per_row * layout.rows],
        }
    }

    pub fn layout(&self) -> PlaneLayout {
        PlaneLayout::new(self.bytes_per_row, self.rows)
    }

    /// Returns a row slice (including possible padding bytes).
    pub fn row(&self, y: usize) -> &[u8] {
        let start = y * self.bytes_per_row;
        &self.data[start..start + self.bytes_per_row]
    }
}

// ── PixelBuffer ──────────────────────────────────────────────────

/// A captured or decoded image, stored plane by plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    format: PixelFormat,
    width: u32,
    height: u32,
    planes: Vec<Plane>,
}

impl PixelBuffer {
    /// Allocate a zeroed buffer whose planes follow the shared layout table.
    pub fn new(format: PixelFormat, width: u32, height: u32) -> Self {
        let planes = format
            .plane_layouts(width, height)
            .into_iter()
            .map(Plane::zeroed)
            .collect();
        Self {
            format,
            width,
            height,
            planes,
        }
    }

    /// Wrap planes produced elsewhere (e.g. by the OS capture facility).
    ///
    /// Each plane must be internally consistent and the plane count must
    /// match the format. Strides are taken as given; a buffer whose strides
    /// differ from [`PixelFormat::plane_layouts`] still encodes, but the
    /// receiving side will reinterpret it with the table's strides.
    pub fn from_planes(
        format: PixelFormat,
        width: u32,
        height: u32,
        planes: Vec<Plane>,
    ) -> Result<Self, BridgeError> {
        if planes.len() != format.plane_count() {
            return Err(BridgeError::InvalidPixelBuffer("plane count does not match format"));
        }
        if planes
            .iter()
            .any(|p| p.bytes_per_row.checked_mul(p.rows) != Some(p.data.len()))
        {
            return Err(BridgeError::InvalidPixelBuffer("plane data does not match its geometry"));
        }
        Ok(Self {
            format,
            width,
            height,
            planes,
        })
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    pub fn plane_mut(&mut self, index: usize) -> Option<&mut Plane> {
        self.planes.get_mut(index)
    }

    /// Total bytes across all planes.
    pub fn byte_len(&self) -> usize {
        self.planes.iter().map(|p| p.data.len()).sum()
    }

    /// Whether the planes match the shared layout table exactly.
    pub fn matches_layout_table(&self) -> bool {
        let expected = self.format.plane_layouts(self.width, self.height);
        expected.len() == self.planes.len()
            && expected.iter().zip(&self.planes).all(|(e, p)| *e == p.layout())
    }
}

// ── VideoFrame ───────────────────────────────────────────────────

/// A decoded frame handed to the host's delegate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub pixel_buffer: PixelBuffer,
    pub orientation: Orientation,
    /// When the frame was displayed on the sending side, in nanoseconds
    /// of that process's frame clock.
    pub display_time_ns: u64,
}

impl VideoFrame {
    pub fn width(&self) -> u32 {
        self.pixel_buffer.width()
    }

    pub fn height(&self) -> u32 {
        self.pixel_buffer.height()
    }
}

// ── SampleBuffer ─────────────────────────────────────────────────

/// A video sample pushed by the capture facility.
#[derive(Debug, Clone)]
pub struct VideoSample {
    pub pixel_buffer: PixelBuffer,
    pub orientation: Orientation,
}

/// One sample buffer as delivered by the OS capture callback.
#[derive(Debug, Clone)]
pub enum SampleBuffer {
    Video(VideoSample),
    Audio(AudioBuffer),
}
