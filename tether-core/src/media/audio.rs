//! Audio stream descriptions and buffers.

use bytes::Bytes;

/// `'lpcm'`: linear PCM.
pub const FORMAT_LINEAR_PCM: u32 = 0x6C70_636D;
/// Samples are signed integers.
pub const FLAG_SIGNED_INTEGER: u32 = 1 << 2;
/// Samples are packed with no padding bits.
pub const FLAG_PACKED: u32 = 1 << 3;

/// Description of an audio stream, mirroring the fields the capture
/// facility reports for each buffer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AudioFormat {
    pub sample_rate: f64,
    pub format_id: u32,
    pub format_flags: u32,
    pub bytes_per_packet: u32,
    pub frames_per_packet: u32,
    pub bytes_per_frame: u32,
    pub channels_per_frame: u32,
    pub bits_per_channel: u32,
    pub reserved: u32,
}

impl AudioFormat {
    /// Interleaved signed 16-bit linear PCM.
    pub fn pcm_s16(sample_rate: f64, channels: u32) -> Self {
        let bytes_per_frame = 2 * channels;
        Self {
            sample_rate,
            format_id: FORMAT_LINEAR_PCM,
            format_flags: FLAG_SIGNED_INTEGER | FLAG_PACKED,
            bytes_per_packet: bytes_per_frame,
            frames_per_packet: 1,
            bytes_per_frame,
            channels_per_frame: channels,
            bits_per_channel: 16,
            reserved: 0,
        }
    }
}

/// One captured audio buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub format: AudioFormat,
    pub data: Bytes,
}

impl AudioBuffer {
    pub fn new(format: AudioFormat, data: impl Into<Bytes>) -> Self {
        Self {
            format,
            data: data.into(),
        }
    }

    /// Number of audio frames in the buffer, 0 if the format is unknown.
    pub fn frame_count(&self) -> usize {
        match self.format.bytes_per_frame {
            0 => 0,
            n => self.data.len() / n as usize,
        }
    }
}
