// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Modbus/TCP framing: a 7-byte MBAP header followed by `length - 1` PDU
//! bytes. This is the only place that decides where one ADU ends and the
//! next begins; no partial frame is visible above this module.

use std::{fmt::Write as _, io, time::Duration};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    time::timeout,
};

use crate::error::FrameError;

/// Length of the MBAP header: transaction id, protocol id, length, unit id.
pub const MBAP_HEADER_LEN: usize = 7;

/// Ceiling for the MBAP length field. A Modbus PDU is at most 253 bytes, so
/// anything declaring more than this is not a frame boundary we can trust.
pub const MAX_FIELD_LEN: u16 = 260;

/// Parsed MBAP header. The proxy forwards frames byte-for-byte and never
/// rewrites any of these fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    /// Number of bytes following the length field: unit id plus PDU.
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    pub fn parse(raw: &[u8; MBAP_HEADER_LEN]) -> Self {
        let mut buf = &raw[..];
        Self {
            transaction_id: buf.get_u16(),
            protocol_id: buf.get_u16(),
            length: buf.get_u16(),
            unit_id: buf.get_u8(),
        }
    }

    pub fn encode(&self) -> [u8; MBAP_HEADER_LEN] {
        let mut raw = [0u8; MBAP_HEADER_LEN];
        let mut buf = &mut raw[..];
        buf.put_u16(self.transaction_id);
        buf.put_u16(self.protocol_id);
        buf.put_u16(self.length);
        buf.put_u8(self.unit_id);
        raw
    }

    /// Total ADU size implied by this header.
    pub fn adu_len(&self) -> usize {
        MBAP_HEADER_LEN - 1 + self.length as usize
    }
}

/// Read exactly one ADU from `stream`, or fail within `deadline`.
///
/// Short reads are retried internally; the deadline covers the whole frame.
/// EOF before the first header byte is a clean [`FrameError::Closed`], EOF
/// anywhere later is [`FrameError::ShortRead`].
pub async fn read_frame<R>(stream: &mut R, deadline: Duration) -> Result<Bytes, FrameError>
where R: AsyncRead + Unpin {
    timeout(deadline, read_frame_inner(stream))
        .await
        .map_err(|_| FrameError::Timeout)?
}

async fn read_frame_inner<R>(stream: &mut R) -> Result<Bytes, FrameError>
where R: AsyncRead + Unpin {
    let mut header = [0u8; MBAP_HEADER_LEN];

    // The first byte is read separately to tell a close between frames
    // apart from a close inside one.
    let n = stream.read(&mut header[..1]).await?;
    if n == 0 {
        return Err(FrameError::Closed);
    }
    stream
        .read_exact(&mut header[1..])
        .await
        .map_err(eof_as_short_read)?;

    let parsed = MbapHeader::parse(&header);
    if parsed.length == 0 || parsed.length > MAX_FIELD_LEN {
        return Err(FrameError::Malformed(parsed.length));
    }

    let mut adu = BytesMut::with_capacity(parsed.adu_len());
    adu.extend_from_slice(&header);
    adu.resize(parsed.adu_len(), 0);
    stream
        .read_exact(&mut adu[MBAP_HEADER_LEN..])
        .await
        .map_err(eof_as_short_read)?;

    Ok(adu.freeze())
}

/// Write a full ADU in a single `write_all`. No fragmentation at this layer.
pub async fn write_frame<W>(stream: &mut W, adu: &[u8]) -> io::Result<()>
where W: AsyncWrite + Unpin {
    stream.write_all(adu).await
}

/// Function code of a framed ADU: PDU byte 0, right after the MBAP header.
/// `None` for a header-only frame (declared length 1).
pub fn function_code(adu: &[u8]) -> Option<u8> {
    adu.get(MBAP_HEADER_LEN).copied()
}

/// Lowercase hex rendering for debug logs of exchanged frames.
pub fn hex_dump(buf: &[u8]) -> String {
    let mut out = String::with_capacity(buf.len() * 2);
    for byte in buf {
        write!(&mut out, "{byte:02x}").expect("write to String cannot fail");
    }
    out
}

fn eof_as_short_read(e: io::Error) -> FrameError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        FrameError::ShortRead
    } else {
        FrameError::Io(e)
    }
}
