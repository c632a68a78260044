// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{env, fs, path::Path, str::FromStr, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::{cfg::enums::LogLevel, proxy::admission::AllowList};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Listening side: where clients connect and who is admitted.
    #[serde(rename = "Proxy")]
    pub proxy: ProxyConfig,
    /// Upstream side: the one Modbus TCP server requests are forwarded to.
    #[serde(rename = "ModbusServer")]
    pub modbus_server: ModbusServerConfig,
    #[serde(default, rename = "Logging")]
    pub logging: LoggingConfig,
    #[serde(default, rename = "Security")]
    pub security: SecurityConfig,
}

/// Listener and admission settings.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ProxyConfig {
    #[serde(rename = "ServerHost")]
    /// Listen address (IP or hostname).
    pub server_host: String,

    #[serde(rename = "ServerPort")]
    /// Listen port.
    pub server_port: u16,

    #[serde(default, rename = "AllowedIPs")]
    /// Admission allow-list as CIDR networks or single addresses. Empty
    /// admits every peer.
    pub allowed_ips: Vec<String>,

    #[serde(default = "default_max_connections", rename = "MaxConnections")]
    /// Cap on concurrently served clients.
    pub max_connections: u32,

    #[serde(default = "default_listen_backlog", rename = "ListenBacklog")]
    /// Backlog passed to `listen(2)`.
    pub listen_backlog: u32,
}

/// Upstream connection settings.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ModbusServerConfig {
    #[serde(rename = "ModbusServerHost")]
    /// Upstream address (IP or hostname).
    pub host: String,

    #[serde(rename = "ModbusServerPort")]
    /// Upstream port.
    pub port: u16,

    #[serde(
        default = "default_connection_timeout",
        rename = "ConnectionTimeout",
        with = "serde_secs"
    )]
    /// Per-connect and per-frame read timeout.
    pub connection_timeout: Duration,

    #[serde(
        default = "default_post_connect_delay",
        rename = "DelayAfterConnection",
        with = "serde_secs_f64"
    )]
    /// Quiet time after a successful connect; some devices refuse traffic
    /// right after accepting.
    pub delay_after_connection: Duration,

    #[serde(default = "default_max_retries", rename = "MaxRetries")]
    /// Reconnect budget before an exchange fails with upstream-unavailable.
    pub max_retries: u32,

    #[serde(
        default = "default_max_backoff",
        rename = "MaxBackoff",
        with = "serde_secs_f64"
    )]
    /// Ceiling for the exponential reconnect backoff.
    pub max_backoff: Duration,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LoggingConfig {
    #[serde(default, rename = "Enable")]
    /// Emit to the log file in addition to stderr.
    pub enable: bool,

    #[serde(default = "default_log_file", rename = "LogFile")]
    pub log_file: String,

    #[serde(default, rename = "LogLevel")]
    pub log_level: LogLevel,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enable: false,
            log_file: default_log_file(),
            log_level: LogLevel::default(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct SecurityConfig {
    #[serde(default, rename = "ReadOnly")]
    /// Drop Modbus write function codes instead of forwarding them.
    pub read_only: bool,
}

fn default_max_connections() -> u32 {
    100
}
fn default_listen_backlog() -> u32 {
    5
}
fn default_connection_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_post_connect_delay() -> Duration {
    Duration::from_millis(500)
}
fn default_max_retries() -> u32 {
    5
}
fn default_max_backoff() -> Duration {
    Duration::from_secs(30)
}
fn default_log_file() -> String {
    "modbus_proxy.log".to_string()
}

impl Config {
    /// Loads the configuration from YAML, applies environment overrides,
    /// validates it, and returns the ready-to-use snapshot. The snapshot is
    /// immutable for the lifetime of the process.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("failed to read config file {:?}", path.as_ref())
        })?;
        let mut cfg: Config =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.apply_env_overrides();
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Overrides scalar values from `MODBUS_PROXY_<SECTION>_<KEY>`
    /// environment variables. Values that fail to parse are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse("MODBUS_PROXY_PROXY_SERVERHOST") {
            self.proxy.server_host = v;
        }
        if let Some(v) = env_parse("MODBUS_PROXY_PROXY_SERVERPORT") {
            self.proxy.server_port = v;
        }
        if let Some(v) = env_parse("MODBUS_PROXY_PROXY_MAXCONNECTIONS") {
            self.proxy.max_connections = v;
        }
        if let Some(v) = env_parse("MODBUS_PROXY_PROXY_LISTENBACKLOG") {
            self.proxy.listen_backlog = v;
        }

        if let Some(v) = env_parse("MODBUS_PROXY_MODBUSSERVER_MODBUSSERVERHOST") {
            self.modbus_server.host = v;
        }
        if let Some(v) = env_parse("MODBUS_PROXY_MODBUSSERVER_MODBUSSERVERPORT") {
            self.modbus_server.port = v;
        }
        if let Some(v) = env_parse("MODBUS_PROXY_MODBUSSERVER_CONNECTIONTIMEOUT") {
            self.modbus_server.connection_timeout = Duration::from_secs(v);
        }
        if let Some(v) =
            env_parse::<f64>("MODBUS_PROXY_MODBUSSERVER_DELAYAFTERCONNECTION")
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        {
            self.modbus_server.delay_after_connection = v;
        }
        if let Some(v) = env_parse("MODBUS_PROXY_MODBUSSERVER_MAXRETRIES") {
            self.modbus_server.max_retries = v;
        }
        if let Some(v) = env_parse::<f64>("MODBUS_PROXY_MODBUSSERVER_MAXBACKOFF")
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        {
            self.modbus_server.max_backoff = v;
        }

        if let Some(v) = env_parse("MODBUS_PROXY_LOGGING_ENABLE") {
            self.logging.enable = v;
        }
        if let Some(v) = env_parse("MODBUS_PROXY_LOGGING_LOGFILE") {
            self.logging.log_file = v;
        }
        if let Some(v) = env_parse("MODBUS_PROXY_LOGGING_LOGLEVEL") {
            self.logging.log_level = v;
        }

        if let Some(v) = env_parse("MODBUS_PROXY_SECURITY_READONLY") {
            self.security.read_only = v;
        }
    }

    /// Validates invariants of the snapshot.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(
            !self.proxy.server_host.is_empty(),
            "Proxy.ServerHost must not be empty"
        );
        ensure!(
            self.proxy.server_port != 0,
            "Proxy.ServerPort must be between 1 and 65535"
        );
        ensure!(
            (1..=10_000).contains(&self.proxy.max_connections),
            "Proxy.MaxConnections must be between 1 and 10000"
        );
        ensure!(
            self.proxy.listen_backlog >= 1,
            "Proxy.ListenBacklog must be >= 1"
        );
        AllowList::parse(&self.proxy.allowed_ips).context("Proxy.AllowedIPs")?;

        ensure!(
            !self.modbus_server.host.is_empty(),
            "ModbusServer.ModbusServerHost must not be empty"
        );
        ensure!(
            self.modbus_server.port != 0,
            "ModbusServer.ModbusServerPort must be between 1 and 65535"
        );
        ensure!(
            self.modbus_server.connection_timeout >= Duration::from_secs(1),
            "ModbusServer.ConnectionTimeout must be >= 1 second"
        );
        ensure!(
            self.modbus_server.max_retries >= 1,
            "ModbusServer.MaxRetries must be >= 1"
        );
        ensure!(
            self.modbus_server.max_backoff >= Duration::from_secs(1),
            "ModbusServer.MaxBackoff must be >= 1 second"
        );

        Ok(())
    }

    /// "host:port" the listener binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.proxy.server_host, self.proxy.server_port)
    }

    /// "host:port" of the upstream server.
    pub fn upstream_addr(&self) -> String {
        format!("{}:{}", self.modbus_server.host, self.modbus_server.port)
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Serde helpers for representing `Duration` as a whole number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde helpers for representing `Duration` as fractional seconds.
mod serde_secs_f64 {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|_| de::Error::custom(format!("invalid duration: {secs}")))
    }
}
