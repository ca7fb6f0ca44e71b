//! Length-prefixed frames: a 4-byte little-endian payload length followed by
//! the bincode payload.

use anyhow::{Result, bail};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MAX_MESSAGE_BYTES: usize = 256 * 1024;
const PREFIX_LEN: usize = 4;

fn check_len(len: usize, max: usize) -> Result<()> {
    if len == 0 || len > max {
        bail!("invalid frame length {len} (max {max})");
    }
    Ok(())
}

/// Prefix `payload` with its length.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>> {
    check_len(payload.len(), MAX_MESSAGE_BYTES)?;
    let mut out = Vec::with_capacity(PREFIX_LEN + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Split one frame off the front of `buf`, returning `(payload, remainder)`.
pub fn decode_frame(buf: &[u8]) -> Result<(&[u8], &[u8])> {
    let Some((prefix, rest)) = buf.split_first_chunk::<PREFIX_LEN>() else {
        bail!("frame shorter than its length prefix");
    };
    let len = u32::from_le_bytes(*prefix) as usize;
    check_len(len, MAX_MESSAGE_BYTES)?;
    if rest.len() < len {
        bail!("truncated frame: need {len} bytes, have {}", rest.len());
    }
    Ok(rest.split_at(len))
}

/// Read one frame. `Ok(None)` means the peer closed the stream cleanly
/// before a new frame started; closing partway through the prefix is an error.
pub async fn read_frame<R>(reader: &mut R, max_message_bytes: usize) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; PREFIX_LEN];
    let mut filled = 0;
    while filled < PREFIX_LEN {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            bail!("connection closed after {filled} of {PREFIX_LEN} length-prefix bytes");
        }
        filled += n;
    }
    let len = u32::from_le_bytes(prefix) as usize;
    check_len(len, max_message_bytes)?;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

pub async fn write_frame<W>(writer: &mut W, payload: &[u8], max_message_bytes: usize) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    check_len(payload.len(), max_message_bytes)?;
    writer
        .write_all(&(payload.len() as u32).to_le_bytes())
        .await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
