// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use anyhow::Result;
use modbus_proxy::frame;
use tokio::net::TcpStream;

use crate::integration_tests::common::{
    READ_HOLDING, WRITE_SINGLE, adu, exchange, proxy_config, reads_eof,
    spawn_echo_upstream, start_proxy,
};

#[tokio::test]
async fn peer_outside_allow_list_is_closed_before_any_read() -> Result<()> {
    let upstream = spawn_echo_upstream().await?;
    let mut cfg = proxy_config(upstream);
    cfg.proxy.allowed_ips = vec!["10.0.0.0/8".to_string()];
    let (addr, cancel, handle) = start_proxy(cfg).await?;

    // loopback is not in 10.0.0.0/8
    let mut client = TcpStream::connect(addr).await?;
    assert!(reads_eof(&mut client).await, "rejected peer must see a close");

    cancel.cancel();
    handle.await??;
    Ok(())
}

#[tokio::test]
async fn connection_limit_rejects_the_extra_client() -> Result<()> {
    let upstream = spawn_echo_upstream().await?;
    let mut cfg = proxy_config(upstream);
    cfg.proxy.max_connections = 1;
    let (addr, cancel, handle) = start_proxy(cfg).await?;

    // the first client takes the only slot and keeps working
    let mut first = TcpStream::connect(addr).await?;
    let request = adu(READ_HOLDING);
    let reply = exchange(&mut first, &request).await?;
    assert_eq!(reply, request);

    let mut second = TcpStream::connect(addr).await?;
    assert!(
        reads_eof(&mut second).await,
        "the client over the limit must see a close"
    );

    let reply = exchange(&mut first, &request).await?;
    assert_eq!(reply, request, "the admitted client is unaffected");

    cancel.cancel();
    handle.await??;
    Ok(())
}

#[tokio::test]
async fn read_only_drops_writes_and_forwards_reads() -> Result<()> {
    let upstream = spawn_echo_upstream().await?;
    let mut cfg = proxy_config(upstream);
    cfg.security.read_only = true;
    let (addr, cancel, handle) = start_proxy(cfg).await?;

    let mut client = TcpStream::connect(addr).await?;

    // the write is consumed without an answer and without a close
    frame::write_frame(&mut client, &adu(WRITE_SINGLE)).await?;
    let silent =
        tokio::time::timeout(Duration::from_millis(300), async {
            frame::read_frame(&mut client, Duration::from_secs(1)).await
        })
        .await;
    assert!(silent.is_err(), "a dropped write must produce no reply");

    // the connection stays open and reads still flow
    let request = adu(READ_HOLDING);
    let reply = exchange(&mut client, &request).await?;
    assert_eq!(reply, request);

    cancel.cancel();
    handle.await??;
    Ok(())
}
