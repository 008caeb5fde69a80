// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for the RPC endpoint host.
//!
//! Every variant maps onto one [`ErrorKind`] so callers can branch on the
//! failure class without matching individual variants.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for host operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure class of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad or missing argument, malformed URI, out-of-range port.
    Configuration,
    /// Missing assembly manifest or config file.
    NotFound,
    /// No matching service/contract type, wrong binding type.
    TypeResolution,
    /// Operation called before `initialize`.
    NotInitialized,
    /// Operation called after `dispose`.
    Disposed,
    /// Propagated from a listener or client socket.
    Transport,
    /// The remote operation replied with a fault.
    Fault,
}

/// Host errors.
#[derive(Debug, Error)]
pub enum Error {
    // ---------------------------------------------------------------
    // Configuration
    // ---------------------------------------------------------------
    #[error("Invalid argument '{name}': {reason}")]
    Argument { name: &'static str, reason: String },

    #[error("Invalid URI '{uri}': {reason}")]
    UriFormat { uri: String, reason: String },

    #[error("Port {0} out of range (1..=65535)")]
    PortOutOfRange(u32),

    #[error("Invalid service model configuration: {0}")]
    ServiceModel(String),

    #[error("Manifest parse error: {0}")]
    Manifest(#[from] toml::de::Error),

    // ---------------------------------------------------------------
    // Not found
    // ---------------------------------------------------------------
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    // ---------------------------------------------------------------
    // Type resolution
    // ---------------------------------------------------------------
    #[error("Cannot load assembly {}: {reason}", path.display())]
    AssemblyLoad { path: PathBuf, reason: String },

    #[error("No service type found in {0}")]
    NoServiceTypeFound(String),

    #[error("Cannot resolve contract: {0}")]
    ContractResolution(String),

    #[error("Invalid binding type: {0}")]
    InvalidBindingType(String),

    // ---------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------
    #[error("Host is not initialized")]
    NotInitialized,

    #[error("Host is disposed")]
    Disposed,

    // ---------------------------------------------------------------
    // Transport
    // ---------------------------------------------------------------
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Fault {code}: {reason}")]
    Fault { code: String, reason: String },
}

impl Error {
    /// Failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Argument { .. }
            | Self::UriFormat { .. }
            | Self::PortOutOfRange(_)
            | Self::ServiceModel(_)
            | Self::Manifest(_) => ErrorKind::Configuration,
            Self::FileNotFound(_) => ErrorKind::NotFound,
            Self::AssemblyLoad { .. }
            | Self::NoServiceTypeFound(_)
            | Self::ContractResolution(_)
            | Self::InvalidBindingType(_) => ErrorKind::TypeResolution,
            Self::NotInitialized => ErrorKind::NotInitialized,
            Self::Disposed => ErrorKind::Disposed,
            Self::Io(_) | Self::Protocol(_) | Self::Serialization(_) | Self::Timeout(_) => {
                ErrorKind::Transport
            }
            Self::Fault { .. } => ErrorKind::Fault,
        }
    }

    pub(crate) fn argument(name: &'static str, reason: impl Into<String>) -> Self {
        Self::Argument {
            name,
            reason: reason.into(),
        }
    }

    pub(crate) fn uri(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UriFormat {
            uri: uri.into(),
            reason: reason.into(),
        }
    }
}

impl From<roxmltree::Error> for Error {
    fn from(e: roxmltree::Error) -> Self {
        Self::ServiceModel(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(Error::PortOutOfRange(0).kind(), ErrorKind::Configuration);
        assert_eq!(
            Error::FileNotFound(PathBuf::from("x")).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            Error::InvalidBindingType("foo".into()).kind(),
            ErrorKind::TypeResolution
        );
        assert_eq!(Error::Disposed.kind(), ErrorKind::Disposed);
        assert_eq!(Error::NotInitialized.kind(), ErrorKind::NotInitialized);
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "busy");
        assert_eq!(Error::from(io).kind(), ErrorKind::Transport);
    }

    #[test]
    fn test_display() {
        let err = Error::PortOutOfRange(70000);
        assert!(err.to_string().contains("70000"));

        let err = Error::uri("http//bad", "missing scheme");
        assert!(err.to_string().contains("http//bad"));
    }
}
