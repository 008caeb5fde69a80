// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ephemeral configuration copies.
//!
//! When a caller supplies both a config file and a base address, the base
//! address wins. The host then loads a temporary copy of the config file in
//! which every `configuration/system.serviceModel/services/service/host`
//! element has been emptied, so the caller's file is never touched.

use crate::error::{Error, Result};
use roxmltree::Document;
use std::io::Write;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tempfile::TempPath;

const HOST_PATH: [&str; 5] = [
    "configuration",
    "system.serviceModel",
    "services",
    "service",
    "host",
];

/// A temporary config file, deleted on drop.
#[derive(Debug)]
pub struct MaterializedConfig {
    source: PathBuf,
    path: TempPath,
}

impl MaterializedConfig {
    /// Path of the temporary copy.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The caller's original file.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Delete the copy now, reporting failures.
    pub fn delete(self) -> std::io::Result<()> {
        self.path.close()
    }
}

/// Writes sanitized config copies to the OS temp directory.
pub struct TempConfigMaterializer;

impl TempConfigMaterializer {
    /// Copy `config_file` with host overrides stripped.
    pub fn materialize<P: AsRef<Path>>(config_file: P) -> Result<MaterializedConfig> {
        let source = config_file.as_ref();
        if !source.is_file() {
            return Err(Error::FileNotFound(source.to_path_buf()));
        }

        let xml = std::fs::read_to_string(source)?;
        let sanitized = Self::strip_host_overrides(&xml)?;

        let mut file = tempfile::Builder::new()
            .prefix("rpchost-")
            .suffix(".config")
            .tempfile()?;
        file.write_all(sanitized.as_bytes())?;
        file.flush()?;
        let path = file.into_temp_path();

        tracing::debug!(
            "Materialized {} -> {}",
            source.display(),
            path.display()
        );
        Ok(MaterializedConfig {
            source: source.to_path_buf(),
            path,
        })
    }

    /// Empty every `host` element under `services/service` (children and
    /// attributes). Everything else is kept byte for byte.
    pub fn strip_host_overrides(xml: &str) -> Result<String> {
        let doc = Document::parse(xml)?;

        let mut ranges: Vec<(Range<usize>, String)> = doc
            .descendants()
            .filter(|n| n.is_element() && n.tag_name().name() == "host")
            .filter(|n| {
                let mut path: Vec<&str> = n
                    .ancestors()
                    .filter(|a| a.is_element())
                    .map(|a| a.tag_name().name())
                    .collect();
                path.reverse();
                path == HOST_PATH
            })
            .map(|n| {
                let range = n.range();
                let qualified = xml[range.start + 1..range.end]
                    .split(|c: char| c.is_whitespace() || c == '/' || c == '>')
                    .next()
                    .unwrap_or("host")
                    .to_string();
                (range, qualified)
            })
            .collect();

        // Replace back to front so earlier ranges stay valid.
        ranges.sort_by_key(|(r, _)| std::cmp::Reverse(r.start));
        let mut out = xml.to_string();
        for (range, name) in ranges {
            out.replace_range(range, &format!("<{} />", name));
        }
        Ok(out)
    }
}
