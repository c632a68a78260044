// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use bytes::Bytes;
use tokio::{
    io::AsyncWriteExt,
    net::TcpStream,
    sync::Mutex,
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    cfg::config::ModbusServerConfig,
    client::common::io_with_timeout,
    error::{FrameError, ProxyError},
    frame,
};

/// Connection state of the upstream link. The stream is present exactly
/// while the link is open; `consecutive_failures` counts connect attempts
/// since the last success.
#[derive(Debug, Default)]
struct UpstreamState {
    stream: Option<TcpStream>,
    consecutive_failures: u32,
}

/// Owner of the single persistent connection to the Modbus server.
///
/// All upstream I/O happens under the state mutex, so the link carries one
/// request/response pair at a time. Transaction-id multiplexing is
/// deliberately not used: the small devices this proxy targets answer one
/// frame at a time anyway, and skipping it removes the re-pairing logic.
#[derive(Debug)]
pub struct UpstreamClient {
    cfg: ModbusServerConfig,
    state: Mutex<UpstreamState>,
    cancel: CancellationToken,
}

impl UpstreamClient {
    pub fn new(cfg: ModbusServerConfig, cancel: CancellationToken) -> Self {
        Self {
            cfg,
            state: Mutex::new(UpstreamState::default()),
            cancel,
        }
    }

    /// Establishes the upstream connection, retrying with capped
    /// exponential backoff up to the configured budget.
    pub async fn connect(&self) -> Result<(), ProxyError> {
        let mut st = self.state.lock().await;
        if st.stream.is_none() {
            self.connect_locked(&mut st).await?;
        }
        Ok(())
    }

    async fn connect_locked(&self, st: &mut UpstreamState) -> Result<(), ProxyError> {
        let addr = (self.cfg.host.as_str(), self.cfg.port);
        let mut attempt: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(ProxyError::ShuttingDown);
            }

            match timeout(self.cfg.connection_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    stream
                        .set_nodelay(true)
                        .map_err(|e| ProxyError::UpstreamIo(FrameError::Io(e)))?;
                    // Some devices refuse traffic right after accepting.
                    sleep(self.cfg.delay_after_connection).await;
                    info!(host = %self.cfg.host, port = self.cfg.port, "connected to upstream");
                    st.stream = Some(stream);
                    st.consecutive_failures = 0;
                    return Ok(());
                },
                Ok(Err(e)) => {
                    warn!(attempt, error = %e, "upstream connect failed");
                },
                Err(_) => {
                    warn!(attempt, "upstream connect timed out");
                },
            }

            attempt += 1;
            st.consecutive_failures = st.consecutive_failures.saturating_add(1);
            if attempt >= self.cfg.max_retries {
                return Err(ProxyError::UpstreamUnavailable { attempts: attempt });
            }

            let delay = backoff_delay(attempt, self.cfg.max_backoff);
            debug!(attempt, ?delay, "waiting before next connect attempt");
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(ProxyError::ShuttingDown),
                _ = sleep(delay) => {},
            }
        }
    }

    /// Performs one framed request/response with the upstream server.
    ///
    /// Holds the state mutex for the whole exchange. Any socket error drops
    /// the connection and surfaces to the caller; the request is never
    /// retried here, since a replayed Modbus write could double-actuate a
    /// coil.
    pub async fn exchange(&self, adu: &[u8]) -> Result<Bytes, ProxyError> {
        let mut st = self.state.lock().await;
        if st.stream.is_none() {
            self.connect_locked(&mut st).await?;
        }
        let Some(stream) = st.stream.as_mut() else {
            // connect_locked always leaves the stream set on success
            return Err(ProxyError::ShuttingDown);
        };

        debug!(adu = %frame::hex_dump(adu), "sending request upstream");
        let res =
            exchange_on(stream, adu, self.cfg.connection_timeout, &self.cancel).await;
        match res {
            Ok(response) => {
                debug!(adu = %frame::hex_dump(&response), "received upstream response");
                Ok(response)
            },
            Err(e) => {
                st.stream = None;
                warn!(error = %e, "upstream exchange failed, dropping connection");
                Err(ProxyError::UpstreamIo(e))
            },
        }
    }

    /// Drops the upstream connection if present.
    pub async fn close(&self) {
        let mut st = self.state.lock().await;
        if let Some(mut stream) = st.stream.take() {
            let _ = stream.shutdown().await;
            info!("upstream connection closed");
        }
    }
}

async fn exchange_on(
    stream: &mut TcpStream,
    adu: &[u8],
    io_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Bytes, FrameError> {
    io_with_timeout(
        "upstream write",
        frame::write_frame(stream, adu),
        io_timeout,
        cancel,
    )
    .await?;

    tokio::select! {
        _ = cancel.cancelled() => Err(FrameError::Cancelled),
        res = frame::read_frame(stream, io_timeout) => res,
    }
}

/// `min(max_backoff, 2^attempt + jitter[0,1))` seconds.
fn backoff_delay(attempt: u32, max_backoff: Duration) -> Duration {
    let exp = 2u64.saturating_pow(attempt.min(16)) as f64;
    let jitter: f64 = rand::random();
    Duration::from_secs_f64((exp + jitter).min(max_backoff.as_secs_f64()))
}
