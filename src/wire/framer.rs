// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Single-stream read/write of length-prefixed frames with configurable
//! read deadlines.
//!
//! Frames on the wire are `<uint32 big-endian length><CBOR payload>`.
//! `Framer::write` emits the length prefix then the payload; `Framer::read`
//! reads exactly four length bytes, allocates that many, reads them, and
//! returns the bytes. Invalid length (zero, or exceeding
//! [`MAX_FRAME_LEN`](crate::wire::codec::MAX_FRAME_LEN)) fails with a
//! protocol error; short reads fail as infrastructure errors.

use std::{future::Future, time::Duration};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    error::{HarnessError, Result},
    wire::codec::MAX_FRAME_LEN,
};

/// Wraps a single bidirectional stream (raw TCP or TLS) with length-prefixed
/// framing. Generic over the transport so the same code path serves
/// commissioning TLS, operational TLS, and in-memory test duplexes.
pub struct Framer<S> {
    stream: S,
}

impl<S> Framer<S>
where S: AsyncRead + AsyncWrite + Unpin + Send
{
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Writes one length-prefixed frame. The caller supplies the already
    /// CBOR-encoded payload.
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() as u64 > MAX_FRAME_LEN as u64 {
            return Err(HarnessError::protocol(format!(
                "frame too large to send: {} bytes",
                payload.len()
            )));
        }
        let len = payload.len() as u32;
        self.stream.write_all(&len.to_be_bytes()).await?;
        self.stream.write_all(payload).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Reads one length-prefixed frame with no deadline. Use
    /// [`read_frame_with_deadline`](Self::read_frame_with_deadline) for
    /// bounded reads.
    pub async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let mut len_buf = [0u8; 4];
        self.stream.read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf);
        if len == 0 {
            return Err(HarnessError::protocol("zero-length frame"));
        }
        if len > MAX_FRAME_LEN {
            return Err(HarnessError::protocol(format!(
                "frame length {len} exceeds maximum {MAX_FRAME_LEN}"
            )));
        }
        let mut buf = vec![0u8; len as usize];
        self.stream.read_exact(&mut buf).await?;
        Ok(buf)
    }

    /// Reads one length-prefixed frame, failing as an infrastructure error
    /// if nothing arrives within `deadline`. The deadline governs only this
    /// call; it is not sticky on the underlying transport.
    pub async fn read_frame_with_deadline(&mut self, deadline: Duration) -> Result<Vec<u8>> {
        with_deadline(deadline, self.read_frame()).await
    }
}

/// Scoped deadline guard: runs `fut` and converts a timeout into an
/// infrastructure error. Matches the teacher's `io_with_timeout` shape
/// (spec.md §9's "with-deadline scoped guard").
pub async fn with_deadline<F, T>(deadline: Duration, fut: F) -> Result<T>
where F: Future<Output = Result<T>> {
    match tokio::time::timeout(deadline, fut).await {
        Ok(res) => res,
        Err(_) => Err(HarnessError::infra(format!("read timed out after {deadline:?}"))),
    }
}
