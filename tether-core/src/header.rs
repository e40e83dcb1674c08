//! Fixed-size header that precedes every message on the audio socket.
//!
//! ## Wire format (44 bytes, little-endian)
//!
//! ```text
//! sample_rate:        f64  (8)
//! format_id:          u32  (4)
//! format_flags:       u32  (4)
//! bytes_per_packet:   u32  (4)
//! frames_per_packet:  u32  (4)
//! bytes_per_frame:    u32  (4)
//! channels_per_frame: u32  (4)
//! bits_per_channel:   u32  (4)
//! reserved:           u32  (4)
//! content_length:     u32  (4)
//! ```

use bytes::{Buf, BufMut};

use crate::error::BridgeError;
use crate::media::audio::AudioFormat;

/// Encoded size of a [`MessageHeader`] on the wire.
pub const HEADER_LENGTH: usize = 44;

/// Largest body a single message may carry.
pub const MAX_BODY_SIZE: usize = 2 * 1024 * 1024;

pub type MessageHeaderBytes = [u8; HEADER_LENGTH];

/// Header of one framed message: the audio stream description followed
/// by the length of the body that comes after it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MessageHeader {
    format: AudioFormat,
    content_length: u32,
}

impl MessageHeader {
    pub fn new(format: AudioFormat, content_length: u32) -> Self {
        Self {
            format,
            content_length,
        }
    }

    pub fn to_bytes(&self) -> MessageHeaderBytes {
        let mut bytes: MessageHeaderBytes = [0; HEADER_LENGTH];
        let mut buf = &mut bytes[..];
        buf.put_f64_le(self.format.sample_rate);
        buf.put_u32_le(self.format.format_id);
        buf.put_u32_le(self.format.format_flags);
        buf.put_u32_le(self.format.bytes_per_packet);
        buf.put_u32_le(self.format.frames_per_packet);
        buf.put_u32_le(self.format.bytes_per_frame);
        buf.put_u32_le(self.format.channels_per_frame);
        buf.put_u32_le(self.format.bits_per_channel);
        buf.put_u32_le(self.format.reserved);
        buf.put_u32_le(self.content_length);
        bytes
    }

    /// Parse and validate a header.
    ///
    /// A zero or oversized `content_length` is rejected: the reader would
    /// otherwise either spin on empty bodies or allocate without bound.
    pub fn from_bytes(bytes: &MessageHeaderBytes) -> Result<Self, BridgeError> {
        let mut buf = &bytes[..];
        let format = AudioFormat {
            sample_rate: buf.get_f64_le(),
            format_id: buf.get_u32_le(),
            format_flags: buf.get_u32_le(),
            bytes_per_packet: buf.get_u32_le(),
            frames_per_packet: buf.get_u32_le(),
            bytes_per_frame: buf.get_u32_le(),
            channels_per_frame: buf.get_u32_le(),
            bits_per_channel: buf.get_u32_le(),
            reserved: buf.get_u32_le(),
        };
        let content_length = buf.get_u32_le();

        if content_length == 0 {
            return Err(BridgeError::InvalidHeader("zero content length"));
        }
        if content_length as usize > MAX_BODY_SIZE {
            return Err(BridgeError::InvalidHeader("content length exceeds maximum"));
        }

        Ok(Self {
            format,
            content_length,
        })
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    pub fn content_length(&self) -> u32 {
        self.content_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm() -> AudioFormat {
        AudioFormat::pcm_s16(48_000.0, 2)
    }

    #[test]
    fn header_roundtrip() {
        let header = MessageHeader::new(pcm(), 3840);
        let decoded = MessageHeader::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.content_length(), 3840);
        assert_eq!(decoded.format().channels_per_frame, 2);
    }

    #[test]
    fn content_length_is_last_field() {
        let bytes = MessageHeader::new(pcm(), 0x0102_0304).to_bytes();
        assert_eq!(&bytes[40..44], &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn zero_length_rejected() {
        let bytes = MessageHeader::new(pcm(), 0).to_bytes();
        assert!(matches!(
            MessageHeader::from_bytes(&bytes),
            Err(BridgeError::InvalidHeader(_))
        ));
    }

    #[test]
    fn oversized_length_rejected() {
        let bytes = MessageHeader::new(pcm(), MAX_BODY_SIZE as u32 + 1).to_bytes();
        assert!(MessageHeader::from_bytes(&bytes).is_err());
    }
}
