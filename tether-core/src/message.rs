//! A framed message on the audio socket: a [`MessageHeader`] plus its body.

use std::fmt::Debug;

use bytes::{Bytes, BytesMut};

use crate::error::BridgeError;
use crate::header::{HEADER_LENGTH, MAX_BODY_SIZE, MessageHeader, MessageHeaderBytes};
use crate::media::audio::{AudioBuffer, AudioFormat};

#[derive(Clone, PartialEq)]
pub struct Message {
    header: MessageHeader,
    body: Bytes,
}

impl Message {
    /// Build a message, rejecting bodies the receiver would refuse.
    pub fn new(format: AudioFormat, body: impl Into<Bytes>) -> Result<Self, BridgeError> {
        let body = body.into();
        if body.is_empty() {
            return Err(BridgeError::InvalidHeader("empty message body"));
        }
        if body.len() > MAX_BODY_SIZE {
            return Err(BridgeError::PayloadTooLarge {
                size: body.len(),
                max: MAX_BODY_SIZE,
            });
        }
        Ok(Self {
            header: MessageHeader::new(format, body.len() as u32),
            body,
        })
    }

    pub fn from_audio(buffer: &AudioBuffer) -> Result<Self, BridgeError> {
        Self::new(buffer.format, buffer.data.clone())
    }

    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    pub fn into_audio(self) -> AudioBuffer {
        AudioBuffer::new(*self.header.format(), self.body)
    }

    /// Header bytes followed by the body.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(HEADER_LENGTH + self.body.len());
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.body);
        out.freeze()
    }

    /// Parse exactly one message; trailing or missing bytes are errors.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BridgeError> {
        if bytes.len() < HEADER_LENGTH {
            return Err(BridgeError::InvalidHeader("message shorter than header"));
        }
        let header_bytes: &MessageHeaderBytes = bytes[..HEADER_LENGTH]
            .try_into()
            .map_err(|_| BridgeError::InvalidHeader("message shorter than header"))?;
        let header = MessageHeader::from_bytes(header_bytes)?;

        if bytes.len() != HEADER_LENGTH + header.content_length() as usize {
            return Err(BridgeError::InvalidHeader("body length does not match header"));
        }

        Ok(Self {
            header,
            body: Bytes::copy_from_slice(&bytes[HEADER_LENGTH..]),
        })
    }
}

impl Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("header", &self.header)
            .field("body_len", &self.body.len())
            .finish()
    }
}
