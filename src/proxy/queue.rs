// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, thread, time::Duration};

use bytes::Bytes;
use tokio::{sync::mpsc, time::timeout};

use crate::{error::ProxyError, proxy::conn::ClientConn};

/// One client request waiting for the upstream worker. Consumed exactly
/// once: the worker either writes the reply to `reply_to` or closes it.
#[derive(Debug)]
pub struct WorkItem {
    /// The full ADU as read from the client, forwarded byte-for-byte.
    pub adu: Bytes,
    /// Write handle of the originating connection.
    pub reply_to: Arc<ClientConn>,
    /// "ip:port" of the originating connection.
    pub conn_id: String,
}

/// Queue capacity: wide enough to ride bursts, bounded so a stalled
/// upstream pushes back on client TCP windows instead of growing the heap.
pub fn default_capacity() -> usize {
    let cpus = thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
    (cpus * 25).clamp(10, 1000)
}

/// Producer half of the bounded request queue. Strict FIFO, no priority.
#[derive(Debug, Clone)]
pub struct RequestQueue {
    tx: mpsc::Sender<WorkItem>,
}

/// Consumer half, owned by the upstream worker.
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::Receiver<WorkItem>,
}

pub fn bounded(capacity: usize) -> (RequestQueue, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (RequestQueue { tx }, QueueReceiver { rx })
}

impl RequestQueue {
    /// Enqueues a work item, waiting while the queue is full.
    pub async fn put(&self, item: WorkItem) -> Result<(), ProxyError> {
        self.tx
            .send(item)
            .await
            .map_err(|_| ProxyError::ShuttingDown)
    }
}

impl QueueReceiver {
    /// Dequeues the next item, waiting at most `wait`. `Ok(None)` means the
    /// queue stayed empty for the whole window.
    pub async fn get(&mut self, wait: Duration) -> Result<Option<WorkItem>, ProxyError> {
        match timeout(wait, self.rx.recv()).await {
            Ok(Some(item)) => Ok(Some(item)),
            Ok(None) => Err(ProxyError::ShuttingDown),
            Err(_) => Ok(None),
        }
    }

    /// Refuses new items and unblocks every producer stuck in `put`.
    pub fn close(&mut self) {
        self.rx.close();
    }
}
