//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;

use crate::error::Error;
use crate::subnet::{Route, SubnetInterface, SubnetSite, SubnetStatus};

// Errors raised while parsing a subnet file.
#[derive(Debug, Eq, PartialEq)]
pub enum ParseError {
    MissingField(&'static str),
    InvalidPrefix(String),
    InvalidStatus(String),
    InvalidTtl(String),
    InvalidInterface(String),
    InvalidHop(String),
}

// ===== impl ParseError =====

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::MissingField(field) => {
                write!(f, "missing field: {field}")
            }
            ParseError::InvalidPrefix(value) => {
                write!(f, "invalid CIDR prefix: {value}")
            }
            ParseError::InvalidStatus(value) => {
                write!(f, "invalid status token: {value}")
            }
            ParseError::InvalidTtl(value) => {
                write!(f, "invalid TTL: {value}")
            }
            ParseError::InvalidInterface(value) => {
                write!(f, "invalid interface entry: {value}")
            }
            ParseError::InvalidHop(value) => {
                write!(f, "invalid route hop: {value}")
            }
        }
    }
}

impl std::error::Error for ParseError {}

// ===== global functions =====

// Parses a whole subnet file: one record per block, blocks separated
// by blank lines.
pub fn parse_subnet_records(input: &str) -> Result<Vec<SubnetSite>, Error> {
    let mut sites = Vec::new();
    let mut block: Vec<&str> = Vec::new();
    for line in input.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            if !block.is_empty() {
                sites.push(parse_record(&block)?);
                block.clear();
            }
            continue;
        }
        block.push(line);
    }
    if !block.is_empty() {
        sites.push(parse_record(&block)?);
    }
    Ok(sites)
}

// Parses one record: a `prefix status ttl` header, optionally
// followed by `interfaces:` and `route:` lines.
fn parse_record(lines: &[&str]) -> Result<SubnetSite, Error> {
    let mut header = lines[0].split_whitespace();

    let prefix = header
        .next()
        .ok_or(ParseError::MissingField("prefix"))?;
    let prefix: Ipv4Network = prefix
        .parse()
        .map_err(|_| ParseError::InvalidPrefix(prefix.to_owned()))?;

    let status = header
        .next()
        .ok_or(ParseError::MissingField("status"))?;
    let status: SubnetStatus = status
        .parse()
        .map_err(|_| ParseError::InvalidStatus(status.to_owned()))?;

    let ttl = header
        .next()
        .ok_or(ParseError::MissingField("pivot TTL"))?;
    let pivot_ttl: u8 = ttl
        .parse()
        .map_err(|_| ParseError::InvalidTtl(ttl.to_owned()))?;

    let mut interfaces = Vec::new();
    let mut route = Route::new();
    for line in &lines[1..] {
        if let Some(rest) = line.strip_prefix("interfaces:") {
            for entry in rest.split_whitespace() {
                interfaces.push(parse_interface(entry)?);
            }
        } else if let Some(rest) = line.strip_prefix("route:") {
            for hop in rest.split_whitespace() {
                let hop: Ipv4Addr = hop.parse().map_err(|_| {
                    ParseError::InvalidHop(hop.to_owned())
                })?;
                route.push(hop);
            }
        }
    }

    // The pivot is the first interface at the pivot distance; the
    // prefix address stands in for subnets with no interface list.
    let pivot = interfaces
        .iter()
        .find(|iface: &&SubnetInterface| iface.ttl == pivot_ttl)
        .or(interfaces.first())
        .map(|iface| iface.addr)
        .unwrap_or_else(|| prefix.ip());

    SubnetSite::new(prefix, status, pivot, pivot_ttl, interfaces, route)
}

// Parses one `address:ttl` interface entry.
fn parse_interface(entry: &str) -> Result<SubnetInterface, ParseError> {
    let invalid = || ParseError::InvalidInterface(entry.to_owned());
    let (addr, ttl) = entry.split_once(':').ok_or_else(invalid)?;
    let addr: Ipv4Addr = addr.parse().map_err(|_| invalid())?;
    let ttl: u8 = ttl.parse().map_err(|_| invalid())?;
    Ok(SubnetInterface::new(addr, ttl))
}
