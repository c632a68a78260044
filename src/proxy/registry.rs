// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use dashmap::DashMap;

use crate::proxy::conn::ClientConn;

/// Live client connections, keyed by "ip:port".
///
/// An entry exists exactly between admission and handler exit. The
/// upstream worker only reads it as a liveness hint before spending an
/// exchange on a request whose client is already gone.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    conns: DashMap<String, Arc<ClientConn>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, conn: Arc<ClientConn>) {
        self.conns.insert(conn.conn_id().to_string(), conn);
    }

    /// Idempotent: the handler exit path and the worker's error path may
    /// race on the same entry.
    pub fn remove(&self, conn_id: &str) -> Option<Arc<ClientConn>> {
        self.conns.remove(conn_id).map(|(_, conn)| conn)
    }

    pub fn contains(&self, conn_id: &str) -> bool {
        self.conns.contains_key(conn_id)
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// Closes every connection. Used by the supervisor during shutdown.
    pub async fn shutdown_all(&self) {
        let conns: Vec<_> = self
            .conns
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.conns.clear();
        for conn in conns {
            conn.close().await;
        }
    }
}
