// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service assemblies.
//!
//! An assembly is a named set of [`ServiceType`]s. It is either built in
//! memory or loaded from a TOML manifest describing contracts and types;
//! manifest types get their activators from a [`TypeRegistry`].
//!
//! # Manifest format
//!
//! ```toml
//! name = "Demo.Services"
//!
//! [[contracts]]
//! full_name = "Demo.ICalculator"
//! operations = [{ name = "Add" }, { name = "Reset", one_way = true }]
//!
//! [[types]]
//! full_name = "Demo.Calculator"
//! contracts = ["Demo.ICalculator"]
//! ```

use crate::contract::{Activator, ContractDescription, InstanceMode, Service, ServiceType};
use crate::error::{Error, Result};
use dashmap::DashMap;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

static GLOBAL_REGISTRY: OnceLock<TypeRegistry> = OnceLock::new();

/// Maps type full names to activators.
#[derive(Default)]
pub struct TypeRegistry {
    activators: DashMap<String, Activator>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry used by [`ServiceAssembly::load`].
    pub fn global() -> &'static TypeRegistry {
        GLOBAL_REGISTRY.get_or_init(TypeRegistry::new)
    }

    /// Register (or replace) the activator for `full_name`.
    pub fn register<F>(&self, full_name: &str, activator: F)
    where
        F: Fn() -> Arc<dyn Service> + Send + Sync + 'static,
    {
        self.activators
            .insert(full_name.to_string(), Arc::new(activator));
    }

    pub fn unregister(&self, full_name: &str) -> bool {
        self.activators.remove(full_name).is_some()
    }

    pub fn get(&self, full_name: &str) -> Option<Activator> {
        self.activators.get(full_name).map(|a| Arc::clone(a.value()))
    }

    pub fn len(&self) -> usize {
        self.activators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activators.is_empty()
    }
}

/// A named set of service types.
#[derive(Debug, Clone)]
pub struct ServiceAssembly {
    name: String,
    location: Option<PathBuf>,
    types: Vec<ServiceType>,
}

impl ServiceAssembly {
    /// In-memory assembly.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: None,
            types: Vec::new(),
        }
    }

    pub fn with_type(mut self, ty: ServiceType) -> Self {
        self.types.push(ty);
        self
    }

    /// Load a manifest, resolving activators from [`TypeRegistry::global`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_with_registry(path, TypeRegistry::global())
    }

    /// Load a manifest, resolving activators from `registry`.
    pub fn load_with_registry<P: AsRef<Path>>(path: P, registry: &TypeRegistry) -> Result<Self> {
        let path = path.as_ref();
        let load_err = |reason: String| Error::AssemblyLoad {
            path: path.to_path_buf(),
            reason,
        };

        if !path.is_file() {
            return Err(load_err("file does not exist".into()));
        }
        let content = std::fs::read_to_string(path).map_err(|e| load_err(e.to_string()))?;
        let manifest: Manifest = toml::from_str(&content).map_err(|e| load_err(e.to_string()))?;

        let mut assembly = Self {
            name: manifest.name.unwrap_or_else(|| {
                path.file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default()
            }),
            location: Some(path.to_path_buf()),
            types: Vec::with_capacity(manifest.types.len()),
        };

        let contracts: Vec<ContractDescription> =
            manifest.contracts.into_iter().map(ContractEntry::build).collect();

        for entry in manifest.types {
            let mut ty = ServiceType::new(entry.full_name.clone())
                .with_instance_mode(entry.instance_mode);
            if entry.is_abstract {
                ty = ty.abstract_type();
            }
            for name in &entry.contracts {
                let contract = contracts
                    .iter()
                    .find(|c| c.full_name() == name)
                    .ok_or_else(|| {
                        load_err(format!(
                            "type '{}' references unknown contract '{}'",
                            entry.full_name, name
                        ))
                    })?;
                ty = ty.implements(contract.clone());
            }
            match registry.get(&entry.full_name) {
                Some(activator) => ty.set_activator(activator),
                None if !entry.is_abstract => {
                    tracing::debug!(
                        "No activator registered for '{}' ({})",
                        entry.full_name,
                        path.display()
                    );
                }
                None => {}
            }
            assembly.types.push(ty);
        }

        Ok(assembly)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Manifest path, for loaded assemblies.
    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    pub fn types(&self) -> &[ServiceType] {
        &self.types
    }

    pub fn find(&self, full_name: &str) -> Option<&ServiceType> {
        self.types.iter().find(|t| t.full_name() == full_name)
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    contracts: Vec<ContractEntry>,
    #[serde(default)]
    types: Vec<TypeEntry>,
}

#[derive(Debug, Deserialize)]
struct ContractEntry {
    full_name: String,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default = "default_true")]
    service_contract: bool,
    #[serde(default)]
    operations: Vec<OperationEntry>,
}

#[derive(Debug, Deserialize)]
struct OperationEntry {
    name: String,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    one_way: bool,
}

#[derive(Debug, Deserialize)]
struct TypeEntry {
    full_name: String,
    #[serde(default)]
    contracts: Vec<String>,
    #[serde(default, rename = "abstract")]
    is_abstract: bool,
    #[serde(default)]
    instance_mode: InstanceMode,
}

fn default_true() -> bool {
    true
}

impl ContractEntry {
    fn build(self) -> ContractDescription {
        let mut contract = ContractDescription::new(self.full_name);
        if let Some(ns) = self.namespace {
            contract = contract.with_namespace(ns);
        }
        contract = contract.service_contract(self.service_contract);
        for op in self.operations {
            contract = match (op.action, op.one_way) {
                (Some(action), one_way) => contract.operation_with_action(&op.name, &action, one_way),
                (None, true) => contract.one_way_operation(&op.name),
                (None, false) => contract.operation(&op.name),
            };
        }
        contract
    }
}
