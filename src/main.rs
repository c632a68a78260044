// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::process::ExitCode;

use clap::Parser;
use modbus_proxy::{
    cfg::{cli::Args, config::Config, logger::init_logger},
    proxy::supervisor::Supervisor,
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let cfg = match args
        .config_path()
        .map_err(anyhow::Error::new)
        .and_then(Config::load_from_file)
    {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            return ExitCode::from(1);
        },
    };

    // Guards flush buffered log lines when dropped at exit.
    let _log_guards = match init_logger(&cfg.logging) {
        Ok(guards) => guards,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            return ExitCode::from(1);
        },
    };

    info!(
        listen = %cfg.listen_addr(),
        upstream = %cfg.upstream_addr(),
        "starting modbus proxy"
    );

    let supervisor = match Supervisor::bind(cfg).await {
        Ok(supervisor) => supervisor,
        Err(e) => {
            error!(error = %e, "failed to start");
            return ExitCode::from(2);
        },
    };

    match supervisor.serve().await {
        Ok(()) => {
            info!("shutdown complete");
            ExitCode::SUCCESS
        },
        Err(e) => {
            error!(error = %e, "fatal error");
            ExitCode::from(2)
        },
    }
}
