// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Absolute service addresses.
//!
//! ```text
//! scheme://host[:port][/path]
//! ```
//!
//! Only absolute, well-formed addresses are accepted. Whitespace, backslashes
//! and the characters `<>"{}|^` are rejected anywhere in the string.

use crate::error::{Error, Result};
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};

/// Host name used for port-based addresses.
pub const LOCALHOST: &str = "localhost";

const FORBIDDEN: &[char] = &['<', '>', '"', '{', '}', '|', '^', '`', '\\'];

/// A parsed absolute address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceAddress {
    scheme: String,
    host: String,
    port: Option<u16>,
    path: String,
}

impl ServiceAddress {
    /// Parse an absolute address.
    pub fn parse(input: &str) -> Result<Self> {
        if input.is_empty() {
            return Err(Error::uri(input, "empty address"));
        }
        if let Some(c) = input
            .chars()
            .find(|c| c.is_whitespace() || c.is_control() || FORBIDDEN.contains(c))
        {
            return Err(Error::uri(input, format!("illegal character {:?}", c)));
        }

        let (scheme, rest) = input
            .split_once("://")
            .ok_or_else(|| Error::uri(input, "not an absolute URI"))?;
        if !is_valid_scheme(scheme) {
            return Err(Error::uri(input, format!("invalid scheme '{}'", scheme)));
        }

        let (authority, path) = match rest.find(['/', '?', '#']) {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };
        if authority.contains('@') {
            return Err(Error::uri(input, "user info is not supported"));
        }

        let parse_port = |port: &str| -> Result<u16> {
            port.parse()
                .map_err(|_| Error::uri(input, format!("invalid port '{}'", port)))
        };
        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            // IPv6 literal
            let (inner, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| Error::uri(input, "unterminated IPv6 literal"))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => Some(parse_port(port)?),
                None if tail.is_empty() => None,
                None => return Err(Error::uri(input, "garbage after IPv6 literal")),
            };
            (&authority[..inner.len() + 2], port)
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, Some(parse_port(port)?)),
                None => (authority, None),
            }
        };
        if host.is_empty() {
            return Err(Error::uri(input, "missing host"));
        }

        let scheme = scheme.to_ascii_lowercase();
        let port = port.filter(|p| default_port(&scheme) != Some(*p));

        Ok(Self {
            scheme,
            host: host.to_ascii_lowercase(),
            port,
            path: path.to_string(),
        })
    }

    /// `http://localhost:{port}/{contract}`.
    pub fn for_port(port: u16, contract_full_name: &str) -> Result<Self> {
        Self::parse(&format!(
            "http://{}:{}/{}",
            LOCALHOST, port, contract_full_name
        ))
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Explicit port, or the scheme's default.
    pub fn port(&self) -> Option<u16> {
        self.port.or_else(|| default_port(&self.scheme))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// `host:port` key shared by endpoints served from one socket.
    pub fn authority(&self) -> String {
        match self.port() {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    /// Resolve to a socket address, preferring IPv4.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let port = self
            .port()
            .ok_or_else(|| Error::uri(self.to_string(), "no port for scheme"))?;
        let host = self.host.trim_start_matches('[').trim_end_matches(']');
        let host = match host {
            "+" | "*" => "0.0.0.0",
            other => other,
        };
        let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
        addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| Error::uri(self.to_string(), "host does not resolve"))
    }

    /// Resolve `relative` against this address.
    ///
    /// Absolute inputs are parsed as-is; an empty input yields `self`.
    pub fn join(&self, relative: &str) -> Result<Self> {
        if relative.contains("://") {
            return Self::parse(relative);
        }
        if relative.is_empty() {
            return Ok(self.clone());
        }
        let mut joined = self.clone();
        let base = self.path.trim_end_matches('/');
        joined.path = format!("{}/{}", base, relative.trim_start_matches('/'));
        Ok(joined)
    }
}

impl fmt::Display for ServiceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        f.write_str(&self.path)
    }
}

impl std::str::FromStr for ServiceAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn is_valid_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        "net.tcp" => Some(808),
        _ => None,
    }
}
