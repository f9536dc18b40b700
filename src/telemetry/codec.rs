// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the aqua-regulator project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Frame wire codec
//!
//! Each frame travels as a UTF-8 JSON body preceded by its length as a
//! 4-byte big-endian unsigned integer. The length covers the body only,
//! never the prefix itself. Inbound command lines use plain `\n`-terminated
//! JSON and do not pass through this codec.

use anyhow::Result;
use thiserror::Error;

use super::models::TelemetryFrame;

/// Number of bytes in the length prefix.
pub const HEADER_LEN: usize = 4;

/// Errors produced when decoding a frame from a byte buffer.
#[derive(Debug, Error)]
pub enum FrameDecodeError {
    #[error("frame header truncated: have {0} of 4 bytes")]
    TruncatedHeader(usize),
    #[error("frame body truncated: expected {expected} bytes, have {actual}")]
    TruncatedBody { expected: usize, actual: usize },
    #[error("frame body is not valid JSON: {0}")]
    Body(#[from] serde_json::Error),
}

/// Serialise a frame to its wire form, length prefix included.
pub fn encode_frame(frame: &TelemetryFrame) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(frame)?;
    let mut buffer = Vec::with_capacity(HEADER_LEN + body.len());
    buffer.extend_from_slice(&(body.len() as u32).to_be_bytes());
    buffer.extend_from_slice(&body);
    Ok(buffer)
}

/// Decode one frame from the front of `buffer`.
///
/// Returns the frame and the total number of bytes consumed, so a caller
/// draining a stream can advance past the decoded frame.
pub fn decode_frame(buffer: &[u8]) -> Result<(TelemetryFrame, usize), FrameDecodeError> {
    if buffer.len() < HEADER_LEN {
        return Err(FrameDecodeError::TruncatedHeader(buffer.len()));
    }

    let mut header = [0u8; HEADER_LEN];
    header.copy_from_slice(&buffer[..HEADER_LEN]);
    let body_len = u32::from_be_bytes(header) as usize;

    let available = buffer.len() - HEADER_LEN;
    if available < body_len {
        return Err(FrameDecodeError::TruncatedBody {
            expected: body_len,
            actual: available,
        });
    }

    let body = &buffer[HEADER_LEN..HEADER_LEN + body_len];
    let frame = serde_json::from_slice(body)?;
    Ok((frame, HEADER_LEN + body_len))
}
