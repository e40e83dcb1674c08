//! `VideoFrameRecord`: the byte layout written into the shared cell.
//!
//! ## Wire format (layout version 1)
//!
//! ```text
//! display_time_ns: u64  (8)
//! pixel_format:    u32  (4)
//! width:           u32  (4)
//! height:          u32  (4)
//! orientation:     u32  (4)
//! planes:          [u8] (variable, every plane concatenated in order)
//! ```
//!
//! All integers are little-endian. There are no plane-length fields;
//! the decoder derives them from `pixel_format`, `width` and `height`
//! through [`PixelFormat::plane_layouts`]. The shared cell is never
//! cleared, so anything past the planes is stale data from earlier frames.

use bytes::{Buf, BufMut};

use crate::error::BridgeError;
use crate::media::format::PixelFormat;
use crate::media::frame::{Orientation, PixelBuffer, Plane, VideoFrame};

/// Version of the layout described above.
pub const RECORD_LAYOUT_VERSION: u8 = 1;

// ── VideoRecordHeader ────────────────────────────────────────────

/// Fixed part of a video record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoRecordHeader {
    pub display_time_ns: u64,
    pub pixel_format: u32,
    pub width: u32,
    pub height: u32,
    pub orientation: u32,
}

impl VideoRecordHeader {
    /// Encoded size on the wire.
    pub const SIZE: usize = 24;

    /// Serialize to bytes (little-endian).
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        let mut buf = &mut bytes[..];
        buf.put_u64_le(self.display_time_ns);
        buf.put_u32_le(self.pixel_format);
        buf.put_u32_le(self.width);
        buf.put_u32_le(self.height);
        buf.put_u32_le(self.orientation);
        bytes
    }

    /// Deserialize from bytes.
    pub fn decode(data: &[u8]) -> Result<Self, BridgeError> {
        if data.len() < Self::SIZE {
            return Err(BridgeError::InvalidHeader("video record shorter than header"));
        }
        let mut buf = &data[..Self::SIZE];
        Ok(Self {
            display_time_ns: buf.get_u64_le(),
            pixel_format: buf.get_u32_le(),
            width: buf.get_u32_le(),
            height: buf.get_u32_le(),
            orientation: buf.get_u32_le(),
        })
    }
}

// ── Encode / decode ──────────────────────────────────────────────

/// Number of bytes [`encode`] produces for `pixel_buffer`.
pub fn encoded_len(pixel_buffer: &PixelBuffer) -> usize {
    VideoRecordHeader::SIZE + pixel_buffer.byte_len()
}

/// Build a record from a pixel buffer using the buffer's own planes.
pub fn encode(pixel_buffer: &PixelBuffer, orientation: Orientation, display_time_ns: u64) -> Vec<u8> {
    let header = VideoRecordHeader {
        display_time_ns,
        pixel_format: pixel_buffer.format().code(),
        width: pixel_buffer.width(),
        height: pixel_buffer.height(),
        orientation: orientation.raw(),
    };

    let mut out = Vec::with_capacity(encoded_len(pixel_buffer));
    out.extend_from_slice(&header.encode());
    for plane in pixel_buffer.planes() {
        out.extend_from_slice(&plane.data);
    }
    out
}

/// Parse a record out of (possibly oversized) cell contents.
///
/// Fails when the bytes are clearly not a complete frame: too short for
/// the header, zero dimensions, an unknown pixel format, or planes that
/// would run past the end of `data`.
pub fn decode(data: &[u8]) -> Result<VideoFrame, BridgeError> {
    let header = VideoRecordHeader::decode(data)?;

    if header.width == 0 || header.height == 0 {
        return Err(BridgeError::InvalidHeader("video record has zero dimensions"));
    }
    let format = PixelFormat::try_from(header.pixel_format)?;
    let total = format
        .frame_size(header.width, header.height)
        .and_then(|size| size.checked_add(VideoRecordHeader::SIZE))
        .ok_or(BridgeError::InvalidHeader("video record dimensions overflow"))?;
    if total > data.len() {
        return Err(BridgeError::PayloadTooLarge {
            size: total,
            max: data.len(),
        });
    }

    let mut position = VideoRecordHeader::SIZE;
    let mut planes = Vec::with_capacity(format.plane_count());
    for layout in format.plane_layouts(header.width, header.height) {
        let len = layout.bytes_per_row * layout.rows;
        planes.push(Plane {
            bytes_per_row: layout.bytes_per_row,
            rows: layout.rows,
            data: data[position..position + len].to_vec(),
        });
        position += len;
    }

    Ok(VideoFrame {
        pixel_buffer: PixelBuffer::from_planes(format, header.width, header.height, planes)?,
        orientation: Orientation::from_raw(header.orientation),
        display_time_ns: header.display_time_ns,
    })
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn patterned(format: PixelFormat, width: u32, height: u32) -> PixelBuffer {
        let mut buffer = PixelBuffer::new(format, width, height);
        for index in 0..format.plane_count() {
            let plane = buffer.plane_mut(index).unwrap();
            for (i, byte) in plane.data.iter_mut().enumerate() {
                *byte = (i as u8).wrapping_mul(31).wrapping_add(index as u8);
            }
        }
        buffer
    }

    #[test]
    fn header_roundtrip() {
        let hdr = VideoRecordHeader {
            display_time_ns: 1_234_567_890,
            pixel_format: PixelFormat::Nv12FullRange.code(),
            width: 1920,
            height: 1080,
            orientation: 6,
        };
        let decoded = VideoRecordHeader::decode(&hdr.encode()).unwrap();
        assert_eq!(decoded, hdr);
    }

    #[test]
    fn header_layout_is_little_endian() {
        let hdr = VideoRecordHeader {
            display_time_ns: 1,
            pixel_format: PixelFormat::Bgra32.code(),
            width: 2,
            height: 3,
            orientation: 1,
        };
        let bytes = hdr.encode();
        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[8..12], b"ARGB");
        assert_eq!(bytes[12], 2);
        assert_eq!(bytes[16], 3);
        assert_eq!(bytes[20], 1);
    }

    #[test]
    fn frame_roundtrip_every_format() {
        for format in [
            PixelFormat::Bgra32,
            PixelFormat::Nv12VideoRange,
            PixelFormat::Nv12FullRange,
            PixelFormat::I420,
        ] {
            let buffer = patterned(format, 33, 17);
            let bytes = encode(&buffer, Orientation::Left, 42_000);
            assert_eq!(bytes.len(), encoded_len(&buffer));

            let frame = decode(&bytes).unwrap();
            assert_eq!(frame.display_time_ns, 42_000);
            assert_eq!(frame.orientation, Orientation::Left);
            assert_eq!(frame.pixel_buffer, buffer);
        }
    }

    #[test]
    fn decode_ignores_trailing_stale_bytes() {
        let buffer = patterned(PixelFormat::Bgra32, 4, 4);
        let mut cell = vec![0xEE; 4096];
        let bytes = encode(&buffer, Orientation::Up, 7);
        cell[..bytes.len()].copy_from_slice(&bytes);

        let frame = decode(&cell).unwrap();
        assert_eq!(frame.pixel_buffer, buffer);
    }

    #[test]
    fn decode_rejects_short_input() {
        assert!(decode(&[0u8; 10]).is_err());
    }

    #[test]
    fn decode_rejects_zeroed_cell() {
        assert!(decode(&vec![0u8; 1024]).is_err());
    }

    #[test]
    fn decode_rejects_truncated_planes() {
        let buffer = patterned(PixelFormat::I420, 16, 16);
        let bytes = encode(&buffer, Orientation::Up, 1);
        assert!(decode(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn decode_rejects_unknown_format() {
        let hdr = VideoRecordHeader {
            display_time_ns: 1,
            pixel_format: 0x1234_5678,
            width: 2,
            height: 2,
            orientation: 1,
        };
        let mut bytes = hdr.encode().to_vec();
        bytes.extend_from_slice(&[0u8; 64]);
        assert!(matches!(
            decode(&bytes),
            Err(BridgeError::UnsupportedPixelFormat(0x1234_5678))
        ));
    }
}
