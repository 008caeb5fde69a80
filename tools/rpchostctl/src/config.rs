// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Host file.
//!
//! A TOML file naming what to host and where. Relative paths are resolved
//! against the directory of the host file.

use rpchost::{BindingKind, HostOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Host file errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid host file: {0}")]
    Invalid(String),
}

/// What to host and where.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostFile {
    /// Assembly manifest listing contracts and service types.
    pub assembly: PathBuf,

    /// Host only this type of the assembly.
    #[serde(default)]
    pub service_type: Option<String>,

    /// Binding type name (`basicHttpBinding`, `netTcpBinding`, ...).
    #[serde(default)]
    pub binding: Option<String>,

    /// XML endpoint configuration.
    #[serde(default)]
    pub config_file: Option<PathBuf>,

    /// Base address URI.
    #[serde(default)]
    pub address: Option<String>,

    /// Base port, used when no address is given.
    #[serde(default)]
    pub port: Option<u32>,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub client: ClientSection,
}

/// Defaults for `call`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSection {
    /// Send timeout (seconds).
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,

    /// Largest frame sent or accepted (bytes).
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_send_timeout() -> u64 {
    60
}

fn default_max_message_size() -> usize {
    rpchost::binding::DEFAULT_MAX_RECEIVED_MESSAGE_SIZE
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            send_timeout_secs: default_send_timeout(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl ClientSection {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

impl Default for HostFile {
    fn default() -> Self {
        Self {
            assembly: PathBuf::from("services.toml"),
            service_type: None,
            binding: None,
            config_file: None,
            address: None,
            port: Some(8080),
            log_level: default_log_level(),
            client: ClientSection::default(),
        }
    }
}

impl HostFile {
    /// Load and validate a host file. Relative paths become relative to its directory.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut file: Self = toml::from_str(&content)?;
        if let Some(dir) = path.parent() {
            file.resolve_paths(dir);
        }
        file.validate()?;
        Ok(file)
    }

    /// Check the host file without touching the file system.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.assembly.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("assembly is empty".into()));
        }
        if self.address.is_some() && self.port.is_some() {
            return Err(ConfigError::Invalid(
                "address and port are mutually exclusive".into(),
            ));
        }
        if self.address.is_none() && self.port.is_none() && self.config_file.is_none() {
            return Err(ConfigError::Invalid(
                "one of address, port or config_file is required".into(),
            ));
        }
        if let Some(binding) = &self.binding {
            BindingKind::from_name(binding).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        if self.client.max_message_size == 0 {
            return Err(ConfigError::Invalid(
                "client.max_message_size must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Hosting options described by this file.
    pub fn host_options(&self) -> HostOptions {
        let mut options = HostOptions::assembly(&self.assembly);
        if let Some(name) = &self.service_type {
            options = options.with_service_type_name(name);
        }
        if let Some(binding) = &self.binding {
            options = options.with_binding_type(binding);
        }
        if let Some(path) = &self.config_file {
            options = options.with_config_file(path);
        }
        if let Some(address) = &self.address {
            options = options.with_address(address);
        } else if let Some(port) = self.port {
            options = options.with_port(port);
        }
        options
    }

    fn resolve_paths(&mut self, dir: &Path) {
        if self.assembly.is_relative() {
            self.assembly = dir.join(&self.assembly);
        }
        if let Some(path) = self.config_file.as_mut() {
            if path.is_relative() {
                *path = dir.join(&*path);
            }
        }
    }
}
