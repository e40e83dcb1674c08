//! `tokio_util` codec for framed I/O on the audio socket.
//!
//! The header is always read to completion before the body, and a body is
//! only yielded once all `content_length` bytes have arrived.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::BridgeError;
use crate::header::{HEADER_LENGTH, MessageHeader, MessageHeaderBytes};
use crate::message::Message;

#[derive(Debug, Default)]
pub struct MessageCodec {
    // Header already parsed while waiting for the rest of its body.
    pending: Option<MessageHeader>,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = BridgeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header = match self.pending {
            Some(header) => header,
            None => {
                if src.len() < HEADER_LENGTH {
                    return Ok(None);
                }
                let bytes: MessageHeaderBytes = src[..HEADER_LENGTH]
                    .try_into()
                    .map_err(|_| BridgeError::InvalidHeader("short header"))?;
                let header = MessageHeader::from_bytes(&bytes)?;
                src.advance(HEADER_LENGTH);
                self.pending = Some(header);
                header
            }
        };

        let body_len = header.content_length() as usize;
        if src.len() < body_len {
            src.reserve(body_len - src.len());
            return Ok(None);
        }

        self.pending = None;
        let body = src.split_to(body_len).freeze();
        Message::new(*header.format(), body).map(Some)
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = BridgeError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(HEADER_LENGTH + item.body_len());
        dst.extend_from_slice(&item.header().to_bytes());
        dst.extend_from_slice(item.body());
        Ok(())
    }
}
