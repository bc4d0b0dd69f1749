//! Socket read/write helpers shared by the wire client.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::errors::Error;
use crate::messages::constants::MAX_MESSAGE_SIZE;

/// Write everything in `buf` and flush.
pub async fn write_all_flush<S>(stream: &mut S, buf: &[u8]) -> Result<(), Error>
where
    S: tokio::io::AsyncWrite + std::marker::Unpin,
{
    stream
        .write_all(buf)
        .await
        .map_err(|err| Error::SocketError(format!("failed to write to socket: {err}")))?;
    stream
        .flush()
        .await
        .map_err(|err| Error::SocketError(format!("failed to flush socket: {err}")))
}

/// Read one backend message header: code byte and length.
pub async fn read_message_header<S>(stream: &mut S) -> Result<(u8, i32), Error>
where
    S: tokio::io::AsyncRead + std::marker::Unpin,
{
    let code = stream
        .read_u8()
        .await
        .map_err(|err| Error::SocketError(format!("failed to read message code: {err}")))?;
    let len = stream
        .read_i32()
        .await
        .map_err(|err| Error::SocketError(format!("failed to read message length: {err}")))?;

    if len < 4 || len > MAX_MESSAGE_SIZE {
        return Err(Error::ProtocolSyncError(format!(
            "message code '{}' carries invalid length {len}",
            code as char
        )));
    }

    Ok((code, len))
}

/// Read the payload of a message whose header was already consumed.
pub async fn read_message_body<S>(stream: &mut S, len: i32) -> Result<BytesMut, Error>
where
    S: tokio::io::AsyncRead + std::marker::Unpin,
{
    let payload_len = (len - 4) as usize;
    let mut payload = vec![0u8; payload_len];
    stream
        .read_exact(&mut payload)
        .await
        .map_err(|err| Error::SocketError(format!("failed to read message payload: {err}")))?;

    let mut bytes = BytesMut::with_capacity(payload_len);
    bytes.put_slice(&payload);
    Ok(bytes)
}
