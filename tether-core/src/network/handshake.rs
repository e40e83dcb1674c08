//! Token-echo handshake run before any framed data.
//!
//! The client writes a random 36-byte token (a hyphenated UUID), the
//! server reads exactly that many bytes and writes them back, and the
//! client compares the echo with what it sent.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;
use uuid::Uuid;

use crate::error::BridgeError;

pub const TOKEN_LENGTH: usize = 36;

pub type HandshakeToken = [u8; TOKEN_LENGTH];

/// A fresh random token.
pub fn new_token() -> HandshakeToken {
    let mut token = [0u8; TOKEN_LENGTH];
    Uuid::new_v4().hyphenated().encode_lower(&mut token);
    token
}

/// Client side: send `token`, then wait for the identical echo.
pub async fn client_handshake<S>(stream: &mut S, token: &HandshakeToken) -> Result<(), BridgeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(token).await.map_err(no_connection)?;
    stream.flush().await.map_err(no_connection)?;

    let mut echo = [0u8; TOKEN_LENGTH];
    stream.read_exact(&mut echo).await.map_err(no_connection)?;

    if &echo != token {
        debug!("handshake echo mismatch");
        return Err(BridgeError::NoConnection);
    }
    Ok(())
}

/// Server side: read one token and echo it back unmodified.
pub async fn server_handshake<S>(stream: &mut S) -> Result<HandshakeToken, BridgeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut token = [0u8; TOKEN_LENGTH];
    stream.read_exact(&mut token).await.map_err(no_connection)?;
    stream.write_all(&token).await.map_err(no_connection)?;
    stream.flush().await.map_err(no_connection)?;
    Ok(token)
}

fn no_connection(e: std::io::Error) -> BridgeError {
    debug!("handshake i/o failed: {e}");
    BridgeError::NoConnection
}
