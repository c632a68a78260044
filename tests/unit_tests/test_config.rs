// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use anyhow::Result;
use modbus_proxy::cfg::{config::Config, enums::LogLevel};
use serial_test::serial;

fn fixture(name: &str) -> String {
    format!("tests/unit_tests/fixtures/config/{name}")
}

fn parse(yaml: &str) -> Result<Config> {
    let mut cfg: Config = serde_yaml::from_str(yaml)?;
    cfg.validate_and_normalize()?;
    Ok(cfg)
}

const MINIMAL: &str = "\
Proxy:
  ServerHost: 127.0.0.1
  ServerPort: 5020
ModbusServer:
  ModbusServerHost: 127.0.0.1
  ModbusServerPort: 502
";

#[test]
#[serial]
fn full_config_loads() -> Result<()> {
    let cfg = Config::load_from_file(fixture("full.yaml"))?;

    assert_eq!(cfg.proxy.server_host, "0.0.0.0");
    assert_eq!(cfg.proxy.server_port, 5020);
    assert_eq!(cfg.proxy.allowed_ips, vec!["192.168.1.0/24", "10.0.0.1"]);
    assert_eq!(cfg.proxy.max_connections, 50);
    assert_eq!(cfg.proxy.listen_backlog, 10);

    assert_eq!(cfg.modbus_server.host, "192.168.1.100");
    assert_eq!(cfg.modbus_server.port, 502);
    assert_eq!(cfg.modbus_server.connection_timeout, Duration::from_secs(5));
    assert_eq!(
        cfg.modbus_server.delay_after_connection,
        Duration::from_millis(100)
    );
    assert_eq!(cfg.modbus_server.max_retries, 3);
    assert_eq!(cfg.modbus_server.max_backoff, Duration::from_secs(10));

    assert!(cfg.logging.enable);
    assert_eq!(cfg.logging.log_file, "proxy.log");
    assert_eq!(cfg.logging.log_level, LogLevel::Debug);

    assert!(cfg.security.read_only);
    Ok(())
}

#[test]
#[serial]
fn minimal_config_gets_defaults() -> Result<()> {
    let cfg = Config::load_from_file(fixture("minimal.yaml"))?;

    assert!(cfg.proxy.allowed_ips.is_empty());
    assert_eq!(cfg.proxy.max_connections, 100);
    assert_eq!(cfg.proxy.listen_backlog, 5);
    assert_eq!(
        cfg.modbus_server.connection_timeout,
        Duration::from_secs(10)
    );
    assert_eq!(
        cfg.modbus_server.delay_after_connection,
        Duration::from_millis(500)
    );
    assert_eq!(cfg.modbus_server.max_retries, 5);
    assert_eq!(cfg.modbus_server.max_backoff, Duration::from_secs(30));
    assert!(!cfg.logging.enable);
    assert_eq!(cfg.logging.log_file, "modbus_proxy.log");
    assert_eq!(cfg.logging.log_level, LogLevel::Info);
    assert!(!cfg.security.read_only);
    Ok(())
}

#[test]
fn missing_required_field_is_rejected() {
    let yaml = "\
Proxy:
  ServerPort: 5020
ModbusServer:
  ModbusServerHost: 127.0.0.1
  ModbusServerPort: 502
";
    assert!(parse(yaml).is_err());
}

#[test]
fn out_of_range_port_is_rejected() {
    let yaml = MINIMAL.replace("ServerPort: 5020", "ServerPort: 70000");
    assert!(parse(&yaml).is_err());
}

#[test]
fn zero_max_connections_is_rejected() {
    let yaml = MINIMAL.replace(
        "  ServerPort: 5020\n",
        "  ServerPort: 5020\n  MaxConnections: 0\n",
    );
    let err = parse(&yaml).expect_err("MaxConnections 0 must fail validation");
    assert!(err.to_string().contains("MaxConnections"));
}

#[test]
fn bad_allow_list_entry_is_rejected() {
    let yaml = MINIMAL.replace(
        "  ServerPort: 5020\n",
        "  ServerPort: 5020\n  AllowedIPs: [\"not-an-ip\"]\n",
    );
    let err = parse(&yaml).expect_err("junk allow-list entry must fail validation");
    assert!(err.to_string().contains("AllowedIPs"));
}

#[test]
fn short_backoff_is_rejected() {
    let yaml = MINIMAL.replace(
        "  ModbusServerPort: 502\n",
        "  ModbusServerPort: 502\n  MaxBackoff: 0.2\n",
    );
    let err = parse(&yaml).expect_err("sub-second backoff must fail validation");
    assert!(err.to_string().contains("MaxBackoff"));
}

#[test]
fn log_level_aliases_parse() -> Result<()> {
    let yaml = format!("{MINIMAL}Logging:\n  LogLevel: warn\n");
    let cfg = parse(&yaml)?;
    assert_eq!(cfg.logging.log_level, LogLevel::Warning);
    assert_eq!(cfg.logging.log_level.as_directive(), "warn");

    let yaml = format!("{MINIMAL}Logging:\n  LogLevel: CRITICAL\n");
    let cfg = parse(&yaml)?;
    assert_eq!(cfg.logging.log_level, LogLevel::Critical);
    assert_eq!(cfg.logging.log_level.as_directive(), "error");
    Ok(())
}

#[test]
#[serial]
fn env_overrides_scalars() -> Result<()> {
    // SAFETY: guarded by #[serial]; no other thread reads the environment
    // while these tests run.
    unsafe {
        std::env::set_var("MODBUS_PROXY_PROXY_SERVERPORT", "5555");
        std::env::set_var("MODBUS_PROXY_MODBUSSERVER_CONNECTIONTIMEOUT", "7");
        std::env::set_var("MODBUS_PROXY_LOGGING_ENABLE", "true");
        std::env::set_var("MODBUS_PROXY_SECURITY_READONLY", "true");
    }

    let mut cfg: Config = serde_yaml::from_str(MINIMAL)?;
    cfg.apply_env_overrides();
    cfg.validate_and_normalize()?;

    unsafe {
        std::env::remove_var("MODBUS_PROXY_PROXY_SERVERPORT");
        std::env::remove_var("MODBUS_PROXY_MODBUSSERVER_CONNECTIONTIMEOUT");
        std::env::remove_var("MODBUS_PROXY_LOGGING_ENABLE");
        std::env::remove_var("MODBUS_PROXY_SECURITY_READONLY");
    }

    assert_eq!(cfg.proxy.server_port, 5555);
    assert_eq!(cfg.modbus_server.connection_timeout, Duration::from_secs(7));
    assert!(cfg.logging.enable);
    assert!(cfg.security.read_only);
    Ok(())
}

#[test]
#[serial]
fn unparseable_env_value_is_ignored() -> Result<()> {
    unsafe {
        std::env::set_var("MODBUS_PROXY_PROXY_SERVERPORT", "not-a-port");
    }

    let mut cfg: Config = serde_yaml::from_str(MINIMAL)?;
    cfg.apply_env_overrides();

    unsafe {
        std::env::remove_var("MODBUS_PROXY_PROXY_SERVERPORT");
    }

    assert_eq!(cfg.proxy.server_port, 5020);
    Ok(())
}

#[test]
fn addr_helpers_join_host_and_port() -> Result<()> {
    let cfg = parse(MINIMAL)?;
    assert_eq!(cfg.listen_addr(), "127.0.0.1:5020");
    assert_eq!(cfg.upstream_addr(), "127.0.0.1:502");
    Ok(())
}
