// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt};

use crate::cfg::config::LoggingConfig;

/// Initializes the global tracing subscriber: a non-blocking stderr sink
/// always, plus a file sink when `Logging.Enable` is set.
///
/// The returned guards must be held until process exit or buffered log
/// lines are lost.
pub fn init_logger(cfg: &LoggingConfig) -> Result<Vec<WorkerGuard>> {
    let mut guards = Vec::with_capacity(2);

    let env_filter = EnvFilter::try_new(cfg.log_level.as_directive())
        .or_else(|_| EnvFilter::try_from_default_env())
        .context("failed to build log filter")?;

    let (stderr_writer, guard) = tracing_appender::non_blocking(std::io::stderr());
    guards.push(guard);
    let stderr_layer = fmt::layer().with_writer(stderr_writer).with_ansi(false);

    let file_layer = if cfg.enable {
        let path = PathBuf::from(&cfg.log_file);
        let dir = path.parent().unwrap_or_else(|| Path::new(""));

        let file_appender = RollingFileAppender::new(
            Rotation::NEVER,
            dir,
            path.file_name().unwrap_or_default(),
        );
        let (writer, guard) = tracing_appender::non_blocking(file_appender);
        guards.push(guard);
        Some(fmt::layer().with_writer(writer).with_ansi(false))
    } else {
        None
    };

    let subscriber = Registry::default()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer);

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set global default subscriber")?;

    Ok(guards)
}
