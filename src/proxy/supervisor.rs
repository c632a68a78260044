// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    net::{TcpListener, TcpSocket, TcpStream, lookup_host},
    signal::unix::{SignalKind, signal},
    sync::{OwnedSemaphorePermit, Semaphore},
    task::{JoinError, JoinSet},
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    cfg::config::Config,
    client::upstream::UpstreamClient,
    error::ProxyError,
    proxy::{
        admission::AllowList,
        conn::ClientConn,
        handler,
        queue::{self, RequestQueue},
        registry::ConnectionRegistry,
        worker,
    },
};

/// Time tasks get to finish after the stop signal before they are aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Owns the listener and every task spawned from it. No ambient state:
/// handles flow down into handlers and the worker explicitly.
pub struct Supervisor {
    cfg: Arc<Config>,
    listener: TcpListener,
    local_addr: SocketAddr,
    cancel: CancellationToken,
}

impl Supervisor {
    /// Resolves and binds the listening socket with `SO_REUSEADDR` and the
    /// configured backlog.
    pub async fn bind(cfg: Config) -> Result<Self, ProxyError> {
        let host_port = cfg.listen_addr();
        let bind_err = |source: io::Error| ProxyError::BindFailed {
            addr: host_port.clone(),
            source,
        };

        let addr = resolve(&cfg.proxy.server_host, cfg.proxy.server_port)
            .await
            .map_err(bind_err)?;
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(bind_err)?;
        socket.set_reuseaddr(true).map_err(bind_err)?;
        socket.bind(addr).map_err(bind_err)?;
        let listener = socket.listen(cfg.proxy.listen_backlog).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;
        info!(addr = %local_addr, "listening");

        Ok(Self {
            cfg: Arc::new(cfg),
            listener,
            local_addr,
            cancel: CancellationToken::new(),
        })
    }

    /// Address the listener actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Token that stops the proxy when cancelled. SIGINT/SIGTERM cancel it
    /// too.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs the proxy until cancelled. Connects the upstream eagerly: an
    /// unreachable upstream at startup is fatal, at runtime it is not.
    pub async fn serve(self) -> Result<(), ProxyError> {
        let Self {
            cfg,
            listener,
            local_addr: _,
            cancel,
        } = self;

        // signals must be caught before the initial connect: its retry loop
        // can run for a long time and has to stay interruptible
        let signal_cancel = cancel.clone();
        tokio::spawn(async move {
            match shutdown_signal().await {
                Ok(()) => {
                    info!("stop signal received, shutting down");
                    signal_cancel.cancel();
                },
                Err(e) => warn!(error = %e, "failed to install signal handlers"),
            }
        });

        let allow_list = AllowList::parse(&cfg.proxy.allowed_ips)?;
        let upstream = Arc::new(UpstreamClient::new(
            cfg.modbus_server.clone(),
            cancel.clone(),
        ));
        upstream.connect().await?;

        let registry = Arc::new(ConnectionRegistry::new());
        let semaphore = Arc::new(Semaphore::new(cfg.proxy.max_connections as usize));
        let (queue, receiver) = queue::bounded(queue::default_capacity());

        let mut worker = tokio::spawn(worker::run(
            receiver,
            Arc::clone(&upstream),
            Arc::clone(&registry),
            cancel.clone(),
            cfg.modbus_server.connection_timeout,
        ));

        let mut handlers: JoinSet<(String, Result<(), ProxyError>)> = JoinSet::new();
        let read_only = cfg.security.read_only;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                // reap finished handlers so the set does not grow unbounded;
                // an empty set yields None and the branch stays disabled
                Some(res) = handlers.join_next() => {
                    log_handler_exit(res);
                },
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        },
                    };
                    match admit(&allow_list, &semaphore, peer) {
                        Ok(permit) => spawn_handler(
                            &mut handlers,
                            stream,
                            peer,
                            permit,
                            queue.clone(),
                            Arc::clone(&registry),
                            cancel.clone(),
                            read_only,
                        ),
                        // dropping the stream closes it before any read
                        Err(_) => {},
                    }
                },
            }
        }

        // stop accepting, then tear down in dependency order
        drop(listener);
        registry.shutdown_all().await;
        upstream.close().await;

        let drain = async {
            while let Some(res) = handlers.join_next().await {
                log_handler_exit(res);
            }
        };
        if timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!("grace period expired, aborting remaining client handlers");
            handlers.abort_all();
            while handlers.join_next().await.is_some() {}
        }
        if timeout(SHUTDOWN_GRACE, &mut worker).await.is_err() {
            warn!("grace period expired, aborting upstream worker");
            worker.abort();
        }

        info!("proxy stopped");
        Ok(())
    }
}

/// Accept-time checks: allow-list first, then a non-blocking slot acquire.
fn admit(
    allow_list: &AllowList,
    semaphore: &Arc<Semaphore>,
    peer: SocketAddr,
) -> Result<OwnedSemaphorePermit, ProxyError> {
    if !allow_list.is_allowed(peer.ip()) {
        warn!(%peer, "peer not in allow-list, closing");
        return Err(ProxyError::AdmissionDenied(peer));
    }
    Arc::clone(semaphore).try_acquire_owned().map_err(|_| {
        warn!(%peer, "connection limit reached, closing");
        ProxyError::AdmissionDenied(peer)
    })
}

#[allow(clippy::too_many_arguments)]
fn spawn_handler(
    handlers: &mut JoinSet<(String, Result<(), ProxyError>)>,
    stream: TcpStream,
    peer: SocketAddr,
    permit: OwnedSemaphorePermit,
    queue: RequestQueue,
    registry: Arc<ConnectionRegistry>,
    cancel: CancellationToken,
    read_only: bool,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%peer, error = %e, "set_nodelay failed");
    }
    let (reader, writer) = stream.into_split();
    let conn_id = peer.to_string();
    let conn = Arc::new(ClientConn::new(conn_id.clone(), writer));
    registry.insert(Arc::clone(&conn));

    handlers.spawn(async move {
        let res =
            handler::run(reader, conn, queue, registry, cancel, read_only, permit).await;
        (conn_id, res)
    });
}

fn log_handler_exit(res: Result<(String, Result<(), ProxyError>), JoinError>) {
    match res {
        Ok((conn_id, Err(e))) => {
            warn!(%conn_id, error = %e, "client handler ended with error");
        },
        Ok((_, Ok(()))) => {},
        Err(e) if e.is_cancelled() => {},
        Err(e) => warn!(error = %e, "client handler panicked"),
    }
}

/// Completes on SIGINT or SIGTERM.
async fn shutdown_signal() -> io::Result<()> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = interrupt.recv() => {},
        _ = terminate.recv() => {},
    }
    Ok(())
}

async fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    lookup_host((host, port)).await?.next().ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "no addresses resolved")
    })
}
