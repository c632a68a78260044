// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::net::IpAddr;

use anyhow::Result;
use modbus_proxy::proxy::admission::{AllowList, IpNet, is_read_function};

fn ip(s: &str) -> IpAddr {
    s.parse().expect("valid test address")
}

#[test]
fn cidr_membership() -> Result<()> {
    let net = IpNet::parse("10.0.0.0/8")?;
    assert!(net.contains(ip("10.1.2.3")));
    assert!(net.contains(ip("10.255.255.255")));
    assert!(!net.contains(ip("127.0.0.1")));
    assert!(!net.contains(ip("11.0.0.1")));
    Ok(())
}

#[test]
fn bare_address_is_a_host_network() -> Result<()> {
    let net = IpNet::parse("192.168.1.7")?;
    assert!(net.contains(ip("192.168.1.7")));
    assert!(!net.contains(ip("192.168.1.8")));
    Ok(())
}

#[test]
fn zero_prefix_matches_everything() -> Result<()> {
    let net = IpNet::parse("0.0.0.0/0")?;
    assert!(net.contains(ip("1.2.3.4")));
    assert!(net.contains(ip("255.255.255.255")));
    Ok(())
}

#[test]
fn ipv6_networks_work() -> Result<()> {
    let net = IpNet::parse("fd00::/8")?;
    assert!(net.contains(ip("fd12:3456::1")));
    assert!(!net.contains(ip("fe80::1")));

    let host = IpNet::parse("::1")?;
    assert!(host.contains(ip("::1")));
    assert!(!host.contains(ip("::2")));
    Ok(())
}

#[test]
fn families_never_cross_match() -> Result<()> {
    let v4 = IpNet::parse("0.0.0.0/0")?;
    assert!(!v4.contains(ip("::1")));
    Ok(())
}

#[test]
fn invalid_entries_are_rejected() {
    for entry in ["not-an-ip", "10.0.0.0/33", "::1/129", "10.0.0.0/x", ""] {
        assert!(IpNet::parse(entry).is_err(), "{entry:?} must not parse");
    }
}

#[test]
fn empty_allow_list_admits_everyone() -> Result<()> {
    let list = AllowList::parse(&[])?;
    assert!(list.is_allowed(ip("127.0.0.1")));
    assert!(list.is_allowed(ip("8.8.8.8")));
    Ok(())
}

#[test]
fn allow_list_filters_by_any_network() -> Result<()> {
    let entries = ["10.0.0.0/8".to_string(), "192.168.1.7".to_string()];
    let list = AllowList::parse(&entries)?;

    assert!(list.is_allowed(ip("10.1.2.3")));
    assert!(list.is_allowed(ip("192.168.1.7")));
    assert!(!list.is_allowed(ip("127.0.0.1")));
    assert!(!list.is_allowed(ip("192.168.1.8")));
    Ok(())
}

#[test]
fn read_functions_pass_the_read_only_filter() {
    for code in [1, 2, 3, 4, 7, 11, 12, 17, 20, 24] {
        assert!(is_read_function(code), "{code} is a read");
    }
}

#[test]
fn write_functions_are_filtered() {
    for code in [5, 6, 15, 16, 22, 23] {
        assert!(!is_read_function(code), "{code} is a write");
    }
    // unknown codes cannot be proven side-effect free
    assert!(!is_read_function(0x2b));
    assert!(!is_read_function(0x80));
}
