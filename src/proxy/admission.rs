// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::net::IpAddr;

use crate::error::ProxyError;

/// Modbus function codes that cannot mutate device state. In read-only
/// mode anything outside this set is dropped: an unknown code cannot be
/// proven side-effect free.
const READ_FUNCTIONS: [u8; 10] = [1, 2, 3, 4, 7, 11, 12, 17, 20, 24];

pub fn is_read_function(function_code: u8) -> bool {
    READ_FUNCTIONS.contains(&function_code)
}

/// One allow-list entry: a network in CIDR notation, or a single address
/// admitted as /32 (v4) or /128 (v6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpNet {
    addr: IpAddr,
    prefix: u8,
}

impl IpNet {
    pub fn parse(entry: &str) -> Result<Self, ProxyError> {
        let bad = || ProxyError::Config(format!("invalid allow-list entry {entry:?}"));

        match entry.split_once('/') {
            Some((addr, prefix)) => {
                let addr: IpAddr = addr.trim().parse().map_err(|_| bad())?;
                let prefix: u8 = prefix.trim().parse().map_err(|_| bad())?;
                let max = if addr.is_ipv4() { 32 } else { 128 };
                if prefix > max {
                    return Err(bad());
                }
                Ok(Self { addr, prefix })
            },
            None => {
                let addr: IpAddr = entry.trim().parse().map_err(|_| bad())?;
                let prefix = if addr.is_ipv4() { 32 } else { 128 };
                Ok(Self { addr, prefix })
            },
        }
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = mask_v4(self.prefix);
                u32::from(net) & mask == u32::from(ip) & mask
            },
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = mask_v6(self.prefix);
                u128::from(net) & mask == u128::from(ip) & mask
            },
            _ => false,
        }
    }
}

/// Admission allow-list. An empty list admits every peer.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    networks: Vec<IpNet>,
}

impl AllowList {
    pub fn parse(entries: &[String]) -> Result<Self, ProxyError> {
        let networks = entries
            .iter()
            .map(|entry| IpNet::parse(entry))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { networks })
    }

    pub fn is_allowed(&self, ip: IpAddr) -> bool {
        self.networks.is_empty() || self.networks.iter().any(|net| net.contains(ip))
    }
}

fn mask_v4(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

fn mask_v6(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix))
    }
}
