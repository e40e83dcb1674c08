//! Pixel formats and their plane layouts.
//!
//! The video record carries no per-plane lengths. Both ends derive every
//! plane's geometry from `(format, width, height)` through
//! [`PixelFormat::plane_layouts`], so this table is the contract between
//! encoder and decoder.

use crate::error::BridgeError;

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layouts the bridge knows how to carry.
///
/// Discriminants are the four-character codes written into the record.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// `'BGRA'`: one packed plane, 4 bytes per pixel.
    Bgra32 = 0x4247_5241,
    /// `'420v'`: bi-planar Y + interleaved CbCr, video range.
    Nv12VideoRange = 0x3432_3076,
    /// `'420f'`: bi-planar Y + interleaved CbCr, full range.
    Nv12FullRange = 0x3432_3066,
    /// `'y420'`: tri-planar Y, Cb, Cr.
    I420 = 0x7934_3230,
}

impl TryFrom<u32> for PixelFormat {
    type Error = BridgeError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0x4247_5241 => Ok(PixelFormat::Bgra32),
            0x3432_3076 => Ok(PixelFormat::Nv12VideoRange),
            0x3432_3066 => Ok(PixelFormat::Nv12FullRange),
            0x7934_3230 => Ok(PixelFormat::I420),
            _ => Err(BridgeError::UnsupportedPixelFormat(value)),
        }
    }
}

impl PixelFormat {
    /// The four-character code as written on the wire.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Number of planes a buffer of this format has.
    pub const fn plane_count(self) -> usize {
        match self {
            PixelFormat::Bgra32 => 1,
            PixelFormat::Nv12VideoRange | PixelFormat::Nv12FullRange => 2,
            PixelFormat::I420 => 3,
        }
    }

    /// Geometry of each plane for a `width` × `height` image, in plane order.
    ///
    /// Rows are tightly packed. Chroma planes round odd dimensions up.
    pub fn plane_layouts(self, width: u32, height: u32) -> Vec<PlaneLayout> {
        let w = width as usize;
        let h = height as usize;
        let half_w = w.div_ceil(2);
        let half_h = h.div_ceil(2);

        match self {
            PixelFormat::Bgra32 => vec![PlaneLayout::new(w * 4, h)],
            PixelFormat::Nv12VideoRange | PixelFormat::Nv12FullRange => vec![
                PlaneLayout::new(w, h),
                PlaneLayout::new(half_w * 2, half_h),
            ],
            PixelFormat::I420 => vec![
                PlaneLayout::new(w, h),
                PlaneLayout::new(half_w, half_h),
                PlaneLayout::new(half_w, half_h),
            ],
        }
    }

    /// Total bytes of all planes, or `None` if the size overflows.
    pub fn frame_size(self, width: u32, height: u32) -> Option<usize> {
        self.plane_layouts(width, height)
            .iter()
            .try_fold(0usize, |acc, plane| acc.checked_add(plane.len()?))
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = self.code().to_be_bytes();
        write!(f, "{}", String::from_utf8_lossy(&code))
    }
}

// ── PlaneLayout ──────────────────────────────────────────────────

/// Row pitch and row count of one plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    /// Row pitch in bytes.
    pub bytes_per_row: usize,
    /// Number of rows.
    pub rows: usize,
}

impl PlaneLayout {
    pub const fn new(bytes_per_row: usize, rows: usize) -> Self {
        Self {
            bytes_per_row,
            rows,
        }
    }

    /// Byte length of the plane, `None` on overflow.
    pub fn len(&self) -> Option<usize> {
        self.bytes_per_row.checked_mul(self.rows)
    }
}
