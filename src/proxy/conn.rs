// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use tokio::{io::AsyncWriteExt, net::tcp::OwnedWriteHalf, sync::Mutex};
use tokio_util::sync::CancellationToken;

use crate::{client::common::io_with_timeout, error::FrameError, frame};

/// Write side of an accepted client connection, shared between its handler
/// and the upstream worker.
///
/// Reply writes and the close call are serialized by the writer mutex. The
/// `closed` token is the idempotent closed flag; cancelling it also wakes
/// the handler's read loop.
#[derive(Debug)]
pub struct ClientConn {
    conn_id: String,
    writer: Mutex<OwnedWriteHalf>,
    closed: CancellationToken,
}

impl ClientConn {
    pub fn new(conn_id: String, writer: OwnedWriteHalf) -> Self {
        Self {
            conn_id,
            writer: Mutex::new(writer),
            closed: CancellationToken::new(),
        }
    }

    /// "ip:port" of the peer.
    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token cancelled exactly when the connection is closed.
    pub fn closed_token(&self) -> &CancellationToken {
        &self.closed
    }

    /// Writes one reply ADU back to the client.
    pub async fn write_frame(
        &self,
        adu: &[u8],
        io_timeout: Duration,
    ) -> Result<(), FrameError> {
        if self.is_closed() {
            return Err(FrameError::Cancelled);
        }
        let mut w = self.writer.lock().await;
        io_with_timeout(
            "client reply write",
            frame::write_frame(&mut *w, adu),
            io_timeout,
            &self.closed,
        )
        .await
    }

    /// Closes the connection. Safe to call from both the handler and the
    /// worker, any number of times.
    pub async fn close(&self) {
        self.closed.cancel();
        let mut w = self.writer.lock().await;
        // ignore errors if already closed
        let _ = w.shutdown().await;
    }
}
