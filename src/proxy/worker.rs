// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{
    client::upstream::UpstreamClient,
    error::ProxyError,
    proxy::{queue::QueueReceiver, registry::ConnectionRegistry},
};

/// Poll window for the queue; bounds how long shutdown waits on an idle
/// worker.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// The single consumer of the request queue.
///
/// One worker is enough: the upstream link is serialized by
/// `UpstreamClient::exchange` anyway, and a single consumer is what keeps
/// per-client responses in request order.
pub async fn run(
    mut queue: QueueReceiver,
    upstream: Arc<UpstreamClient>,
    registry: Arc<ConnectionRegistry>,
    cancel: CancellationToken,
    reply_timeout: Duration,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let item = match queue.get(POLL_INTERVAL).await {
            Ok(Some(item)) => item,
            Ok(None) => continue,
            Err(_) => break,
        };

        if !registry.contains(&item.conn_id) || item.reply_to.is_closed() {
            warn!(conn_id = %item.conn_id, "client gone before its request was served, dropping");
            continue;
        }

        match upstream.exchange(&item.adu).await {
            Ok(response) => {
                if let Err(e) = item.reply_to.write_frame(&response, reply_timeout).await
                {
                    warn!(conn_id = %item.conn_id, error = %e, "reply write failed, closing client");
                    registry.remove(&item.conn_id);
                    item.reply_to.close().await;
                }
            },
            Err(e @ ProxyError::UpstreamUnavailable { .. }) => {
                // CRITICAL in the config vocabulary: the proxy stays up and
                // reconnects on the next item.
                error!(conn_id = %item.conn_id, error = %e, "upstream unavailable, failing client");
                registry.remove(&item.conn_id);
                item.reply_to.close().await;
            },
            Err(e) => {
                // the client's request went unanswered; a reset is less
                // misleading than a silent hang
                warn!(conn_id = %item.conn_id, error = %e, "upstream exchange failed, closing client");
                registry.remove(&item.conn_id);
                item.reply_to.close().await;
            },
        }
    }
    // refuse further items so producers blocked in put are released now
    queue.close();
    debug!("upstream worker stopped");
}
