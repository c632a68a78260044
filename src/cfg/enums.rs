// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Minimum severity emitted by the proxy.
///
/// The names follow the configuration file vocabulary; `WARNING` and
/// `CRITICAL` map onto the `warn` and `error` tracing levels.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    #[serde(rename = "DEBUG", alias = "debug", alias = "Debug")]
    Debug,
    #[default]
    #[serde(rename = "INFO", alias = "info", alias = "Info")]
    Info,
    #[serde(
        rename = "WARNING",
        alias = "warning",
        alias = "Warning",
        alias = "WARN",
        alias = "warn"
    )]
    Warning,
    #[serde(rename = "ERROR", alias = "error", alias = "Error")]
    Error,
    #[serde(rename = "CRITICAL", alias = "critical", alias = "Critical")]
    Critical,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        })
    }
}

impl LogLevel {
    /// Filter directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" | "WARN" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            "CRITICAL" => Ok(LogLevel::Critical),
            other => Err(format!("unknown log level {other:?}")),
        }
    }
}
