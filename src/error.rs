// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{io, net::SocketAddr};

use thiserror::Error;

/// Errors surfaced at the component boundaries of the proxy.
///
/// Startup errors (`Config`, `BindFailed`, and `UpstreamUnavailable` before
/// the listener is serving) are fatal; everything else terminates at most
/// the affected client connection.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to bind {addr}: {source}")]
    BindFailed { addr: String, source: io::Error },

    /// The reconnect budget was exhausted without reaching the upstream.
    #[error("upstream unavailable after {attempts} connect attempts")]
    UpstreamUnavailable { attempts: u32 },

    #[error("upstream i/o failed: {0}")]
    UpstreamIo(#[source] FrameError),

    #[error("client i/o failed: {0}")]
    ClientIo(#[source] FrameError),

    #[error("malformed frame: declared length {0}")]
    MalformedFrame(u16),

    #[error("connection from {0} rejected")]
    AdmissionDenied(SocketAddr),

    #[error("shutting down")]
    ShuttingDown,
}

/// Errors produced while delimiting Modbus/TCP frames on a byte stream.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The peer closed the stream at a frame boundary.
    #[error("peer closed the connection")]
    Closed,

    /// The stream ended in the middle of a frame.
    #[error("connection aborted mid-frame")]
    ShortRead,

    #[error("i/o timed out")]
    Timeout,

    /// Declared MBAP length of zero or above the protocol ceiling. Fatal
    /// for the stream: the frame boundary can no longer be trusted.
    #[error("malformed frame: declared length {0}")]
    Malformed(u16),

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] io::Error),
}
