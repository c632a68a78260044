// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use tokio::{net::tcp::OwnedReadHalf, sync::OwnedSemaphorePermit};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::{FrameError, ProxyError},
    frame,
    proxy::{
        admission,
        conn::ClientConn,
        queue::{RequestQueue, WorkItem},
        registry::ConnectionRegistry,
    },
};

/// A client that sends nothing for this long is disconnected.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-connection task: reads frames from the client, filters them, and
/// enqueues them for the upstream worker.
///
/// The permit is the admission slot; dropping it on task exit releases the
/// slot exactly once no matter which path left the loop. The rest of the
/// cleanup is idempotent and tolerates close races with the worker.
pub async fn run(
    mut reader: OwnedReadHalf,
    conn: Arc<ClientConn>,
    queue: RequestQueue,
    registry: Arc<ConnectionRegistry>,
    cancel: CancellationToken,
    read_only: bool,
    _permit: OwnedSemaphorePermit,
) -> Result<(), ProxyError> {
    info!(conn_id = conn.conn_id(), "client connected");

    let result = read_loop(&mut reader, &conn, &queue, &cancel, read_only).await;

    registry.remove(conn.conn_id());
    conn.close().await;
    info!(conn_id = conn.conn_id(), "client disconnected");
    result
}

async fn read_loop(
    reader: &mut OwnedReadHalf,
    conn: &Arc<ClientConn>,
    queue: &RequestQueue,
    cancel: &CancellationToken,
    read_only: bool,
) -> Result<(), ProxyError> {
    loop {
        let adu = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = conn.closed_token().cancelled() => return Ok(()),
            res = frame::read_frame(reader, IDLE_TIMEOUT) => match res {
                Ok(adu) => adu,
                Err(FrameError::Closed) => return Ok(()),
                Err(FrameError::Timeout) => {
                    debug!(conn_id = conn.conn_id(), "client idle, closing");
                    return Ok(());
                },
                Err(FrameError::Malformed(length)) => {
                    warn!(conn_id = conn.conn_id(), length, "malformed frame from client");
                    return Err(ProxyError::MalformedFrame(length));
                },
                Err(e) => return Err(ProxyError::ClientIo(e)),
            },
        };

        if read_only {
            match frame::function_code(&adu) {
                Some(code) if admission::is_read_function(code) => {},
                code => {
                    warn!(
                        conn_id = conn.conn_id(),
                        function_code = ?code,
                        "write request dropped by read-only policy"
                    );
                    continue;
                },
            }
        }

        let item = WorkItem {
            adu,
            reply_to: Arc::clone(conn),
            conn_id: conn.conn_id().to_string(),
        };
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            res = queue.put(item) => {
                // the queue only refuses items during shutdown
                if res.is_err() {
                    return Ok(());
                }
            },
        }
    }
}
