//! Length-prefixed framing and the role announcement.
//!
//! Wire format per direction:
//!
//! ```text
//! [role: u32 BE]                      once, dialer -> listener, after TLS
//! [ack: u8 = 0x01]                    once, listener -> dialer, opt-in
//! [len: u32 BE][payload: len bytes]   repeated
//! ```
//!
//! The acknowledgement is only exchanged when both ends enable
//! `confirm_registration`.

use mpc_types::RoleId;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const LENGTH_PREFIX_LEN: usize = 4;

/// Sent by the listener once it has accepted a role announcement.
pub const REGISTRATION_ACK: u8 = 0x01;

/// Write one frame. Header and payload go out in a single write.
pub async fn write_frame<W>(stream: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let len = u32::try_from(payload.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame of {} bytes exceeds u32 length prefix", payload.len()),
        )
    })?;

    let mut buf = Vec::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(payload);

    stream.write_all(&buf).await?;
    stream.flush().await
}

/// Read one frame. A zero length yields an empty payload.
///
/// Frames announcing more than `max_len` bytes are rejected with
/// `InvalidData` before any payload is allocated.
pub async fn read_frame<R>(stream: &mut R, max_len: usize) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len_buf = [0u8; LENGTH_PREFIX_LEN];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > max_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit of {}", len, max_len),
        ));
    }

    let mut payload = vec![0u8; len];
    if len > 0 {
        stream.read_exact(&mut payload).await?;
    }
    Ok(payload)
}

pub async fn write_role_id<W>(stream: &mut W, role: RoleId) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    stream.write_all(&role.0.to_be_bytes()).await?;
    stream.flush().await
}

pub async fn read_role_id<R>(stream: &mut R) -> io::Result<RoleId>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).await?;
    Ok(RoleId(u32::from_be_bytes(buf)))
}

pub async fn write_registration_ack<W>(stream: &mut W) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    stream.write_all(&[REGISTRATION_ACK]).await?;
    stream.flush().await
}

/// Wait for the listener's acknowledgement. Any other byte is `InvalidData`.
pub async fn read_registration_ack<R>(stream: &mut R) -> io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    match stream.read_u8().await? {
        REGISTRATION_ACK => Ok(()),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unexpected registration ack byte {:#04x}", other),
        )),
    }
}
