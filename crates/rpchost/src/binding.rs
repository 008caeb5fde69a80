// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport bindings.
//!
//! A [`Binding`] is the transport, encoding and security policy applied to
//! an endpoint. Every kind is carried by the framed TCP transport; the kind
//! decides which address schemes an endpoint may use.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default maximum size of a received frame (64 KiB).
pub const DEFAULT_MAX_RECEIVED_MESSAGE_SIZE: usize = 65_536;

/// Default open/close/send timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default idle timeout of an inbound session.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(600);

/// Recognized binding kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BindingKind {
    BasicHttp,
    WsHttp,
    WebHttp,
    NetTcp,
}

impl BindingKind {
    pub const ALL: [BindingKind; 4] = [
        BindingKind::BasicHttp,
        BindingKind::WsHttp,
        BindingKind::WebHttp,
        BindingKind::NetTcp,
    ];

    /// Element name used in declarative configuration.
    pub fn config_name(self) -> &'static str {
        match self {
            Self::BasicHttp => "basicHttpBinding",
            Self::WsHttp => "wsHttpBinding",
            Self::WebHttp => "webHttpBinding",
            Self::NetTcp => "netTcpBinding",
        }
    }

    /// Resolve a binding type name.
    ///
    /// Accepts the configuration element name (`basicHttpBinding`) or the
    /// type name (`BasicHttpBinding`), case-insensitively.
    pub fn from_name(name: &str) -> Result<Self> {
        let wanted = name.trim();
        Self::ALL
            .into_iter()
            .find(|kind| {
                let config = kind.config_name();
                config.eq_ignore_ascii_case(wanted)
                    || config
                        .strip_suffix("Binding")
                        .is_some_and(|short| short.eq_ignore_ascii_case(wanted))
            })
            .ok_or_else(|| Error::InvalidBindingType(name.to_string()))
    }

    pub fn schemes(self) -> &'static [&'static str] {
        match self {
            Self::BasicHttp | Self::WsHttp | Self::WebHttp => &["http", "https"],
            Self::NetTcp => &["net.tcp"],
        }
    }

    pub fn accepts_scheme(self, scheme: &str) -> bool {
        self.schemes().contains(&scheme)
    }
}

impl fmt::Display for BindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_name())
    }
}

/// Security mode of a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SecurityMode {
    #[default]
    None,
    Transport,
    Message,
    TransportWithMessageCredential,
}

impl SecurityMode {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "None" => Ok(Self::None),
            "Transport" => Ok(Self::Transport),
            "Message" => Ok(Self::Message),
            "TransportWithMessageCredential" => Ok(Self::TransportWithMessageCredential),
            other => Err(Error::ServiceModel(format!(
                "unknown security mode '{}'",
                other
            ))),
        }
    }
}

/// Transport binding settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub kind: BindingKind,
    /// Configuration name, empty for programmatic bindings.
    pub name: String,
    pub max_received_message_size: usize,
    pub open_timeout: Duration,
    pub close_timeout: Duration,
    pub send_timeout: Duration,
    pub receive_timeout: Duration,
    pub security: SecurityMode,
}

impl Binding {
    pub fn new(kind: BindingKind) -> Self {
        Self {
            kind,
            name: String::new(),
            max_received_message_size: DEFAULT_MAX_RECEIVED_MESSAGE_SIZE,
            open_timeout: DEFAULT_TIMEOUT,
            close_timeout: DEFAULT_TIMEOUT,
            send_timeout: DEFAULT_TIMEOUT,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            security: SecurityMode::None,
        }
    }

    pub fn basic_http() -> Self {
        Self::new(BindingKind::BasicHttp)
    }

    pub fn net_tcp() -> Self {
        Self::new(BindingKind::NetTcp)
    }

    pub fn web_http() -> Self {
        Self::new(BindingKind::WebHttp)
    }

    pub fn with_max_received_message_size(mut self, size: usize) -> Self {
        self.max_received_message_size = size;
        self
    }

    pub fn with_security(mut self, security: SecurityMode) -> Self {
        self.security = security;
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn is_web_http(&self) -> bool {
        self.kind == BindingKind::WebHttp
    }
}

impl Default for Binding {
    fn default() -> Self {
        Self::basic_http()
    }
}

/// Where an endpoint's binding comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BindingSource {
    /// Basic HTTP binding.
    #[default]
    Default,
    /// A binding type name, instantiated with default settings.
    Type(String),
    /// A fully configured binding.
    Instance(Binding),
}

impl From<Binding> for BindingSource {
    fn from(binding: Binding) -> Self {
        Self::Instance(binding)
    }
}

impl From<BindingKind> for BindingSource {
    fn from(kind: BindingKind) -> Self {
        Self::Type(kind.config_name().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name() {
        assert_eq!(
            BindingKind::from_name("basicHttpBinding").unwrap(),
            BindingKind::BasicHttp
        );
        assert_eq!(
            BindingKind::from_name("NetTcpBinding").unwrap(),
            BindingKind::NetTcp
        );
        assert_eq!(
            BindingKind::from_name("webhttp").unwrap(),
            BindingKind::WebHttp
        );
        assert!(matches!(
            BindingKind::from_name("msmqBinding"),
            Err(Error::InvalidBindingType(_))
        ));
    }

    #[test]
    fn test_schemes() {
        assert!(BindingKind::BasicHttp.accepts_scheme("https"));
        assert!(!BindingKind::BasicHttp.accepts_scheme("net.tcp"));
        assert!(BindingKind::NetTcp.accepts_scheme("net.tcp"));
    }

    #[test]
    fn test_defaults() {
        let binding = Binding::default();
        assert_eq!(binding.kind, BindingKind::BasicHttp);
        assert_eq!(binding.max_received_message_size, 65_536);
        assert_eq!(binding.receive_timeout, Duration::from_secs(600));
        assert_eq!(binding.security, SecurityMode::None);
        assert!(Binding::web_http().is_web_http());
    }

    #[test]
    fn test_security_mode_names() {
        assert_eq!(
            SecurityMode::from_name("Transport").unwrap(),
            SecurityMode::Transport
        );
        assert!(SecurityMode::from_name("Bogus").is_err());
    }
}
