// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::path::PathBuf;

use clap::Parser;

use crate::error::ProxyError;

/// Command-line arguments of the proxy binary.
#[derive(Parser, Debug)]
#[command(name = "modbus-proxy", about = "Modbus/TCP reverse proxy", version)]
pub struct Args {
    /// Path to the YAML configuration file.
    #[arg(long, value_name = "PATH")]
    pub config: PathBuf,
}

impl Args {
    /// Canonicalized path to the configuration file. A missing or
    /// unreadable path is a configuration error, exit code 1 like every
    /// other one.
    pub fn config_path(&self) -> Result<PathBuf, ProxyError> {
        self.config.canonicalize().map_err(|e| {
            ProxyError::Config(format!("config file {:?}: {e}", self.config))
        })
    }
}
