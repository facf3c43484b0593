//! # Relay Wire Protocol
//!
//! Frames are a big-endian `u32` length followed by that many bytes of JSON.
//!
//! ```text
//!  control connection                     data connection (per stream)
//!  ──────────────────                     ────────────────────────────
//!  → Hello{token}                         → Attach{stream_id}
//!  ← Accepted{session_id} | Rejected      ⇄ raw bytes until either side closes
//!  ← OpenStream{stream_id, hostname, port, is_tls}
//!  → Refuse{stream_id, reason}   (no data connection is opened)
//!  ← Ping{nonce}  → Pong{nonce}
//! ```

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::domain::WireError;

/// Largest frame either side accepts.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Hello {
        token: String,
    },
    Accepted {
        session_id: String,
    },
    Rejected {
        reason: String,
    },
    OpenStream {
        stream_id: u64,
        hostname: String,
        port: u16,
        is_tls: bool,
    },
    Attach {
        stream_id: u64,
    },
    Refuse {
        stream_id: u64,
        reason: String,
    },
    Ping {
        nonce: u64,
    },
    Pong {
        nonce: u64,
    },
}

impl Frame {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::Accepted { .. } => "accepted",
            Self::Rejected { .. } => "rejected",
            Self::OpenStream { .. } => "open_stream",
            Self::Attach { .. } => "attach",
            Self::Refuse { .. } => "refuse",
            Self::Ping { .. } => "ping",
            Self::Pong { .. } => "pong",
        }
    }
}

pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let body = serde_json::to_vec(frame)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(body.len()));
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. `Ok(None)` on a clean close between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>, WireError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            WireError::Closed
        } else {
            WireError::Io(e)
        }
    })?;
    Ok(Some(serde_json::from_slice(&body)?))
}

/// Read a frame where the connection must stay open.
pub async fn expect_frame<R>(reader: &mut R) -> Result<Frame, WireError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    read_frame(reader).await?.ok_or(WireError::Closed)
}
