// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Contracts, operations and service types.
//!
//! A [`ContractDescription`] is the set of operations an endpoint exposes.
//! A [`ServiceType`] is a named implementation declaring one or more
//! contracts, plus the activator the host uses to create instances.
//!
//! # Example
//!
//! ```rust
//! use rpchost::{ContractDescription, ServiceType};
//!
//! let contract = ContractDescription::new("Demo.ICalculator")
//!     .operation("Add")
//!     .one_way_operation("Reset");
//!
//! let calc = ServiceType::new("Demo.Calculator")
//!     .implements(contract)
//!     .with_activator(|| rpchost::service_fn(|_op, body| Ok(body.clone())));
//! assert!(calc.activate().is_some());
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Namespace used to build default action names.
pub const DEFAULT_NAMESPACE: &str = "http://tempuri.org/";

/// One operation of a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationDescription {
    pub name: String,
    pub action: String,
    pub reply_action: String,
    pub is_one_way: bool,
}

/// The set of operations an endpoint exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractDescription {
    full_name: String,
    namespace: String,
    is_service_contract: bool,
    operations: Vec<OperationDescription>,
}

impl ContractDescription {
    /// Create an empty service contract named `full_name` (e.g. `Demo.ICalculator`).
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            is_service_contract: true,
            operations: Vec::new(),
        }
    }

    /// Set the namespace used for default actions.
    ///
    /// Operations already added keep their actions.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Mark or unmark this contract as a service contract.
    pub fn service_contract(mut self, marked: bool) -> Self {
        self.is_service_contract = marked;
        self
    }

    /// Add a request/reply operation.
    pub fn operation(self, name: &str) -> Self {
        self.push_operation(name, false)
    }

    /// Add a one-way operation.
    pub fn one_way_operation(self, name: &str) -> Self {
        self.push_operation(name, true)
    }

    /// Add an operation with an explicit action.
    pub fn operation_with_action(mut self, name: &str, action: &str, is_one_way: bool) -> Self {
        self.operations.push(OperationDescription {
            name: name.to_string(),
            action: action.to_string(),
            reply_action: format!("{}Response", action),
            is_one_way,
        });
        self
    }

    fn push_operation(self, name: &str, is_one_way: bool) -> Self {
        let action = self.default_action(name);
        self.operation_with_action(name, &action, is_one_way)
    }

    fn default_action(&self, operation: &str) -> String {
        let ns = if self.namespace.ends_with('/') {
            self.namespace.clone()
        } else {
            format!("{}/", self.namespace)
        };
        format!("{}{}/{}", ns, self.name(), operation)
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Short name (last `.` segment of the full name).
    pub fn name(&self) -> &str {
        self.full_name
            .rsplit('.')
            .next()
            .unwrap_or(self.full_name.as_str())
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn is_service_contract(&self) -> bool {
        self.is_service_contract
    }

    pub fn operations(&self) -> &[OperationDescription] {
        &self.operations
    }

    pub fn find_by_action(&self, action: &str) -> Option<&OperationDescription> {
        self.operations.iter().find(|op| op.action == action)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&OperationDescription> {
        self.operations.iter().find(|op| op.name == name)
    }

    /// Actions of all one-way operations.
    pub fn one_way_actions(&self) -> HashSet<String> {
        self.operations
            .iter()
            .filter(|op| op.is_one_way)
            .map(|op| op.action.clone())
            .collect()
    }
}

/// A fault returned by an operation instead of a reply body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    pub code: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Fault {
    pub const SENDER: &'static str = "Sender";
    pub const RECEIVER: &'static str = "Receiver";
    pub const ACTION_NOT_SUPPORTED: &'static str = "ActionNotSupported";
    pub const ACCESS_DENIED: &'static str = "AccessDenied";
    pub const QUOTA_EXCEEDED: &'static str = "QuotaExceeded";

    pub fn new(code: &str, reason: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            reason: reason.into(),
            detail: None,
        }
    }

    /// The caller sent something invalid.
    pub fn sender(reason: impl Into<String>) -> Self {
        Self::new(Self::SENDER, reason)
    }

    /// The service failed processing a valid request.
    pub fn receiver(reason: impl Into<String>) -> Self {
        Self::new(Self::RECEIVER, reason)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.reason)
    }
}

/// Service implementation invoked by a listener.
pub trait Service: Send + Sync + 'static {
    /// Invoke `operation` with the request body.
    ///
    /// The returned value is discarded for one-way operations.
    fn invoke(&self, operation: &OperationDescription, body: &Value) -> Result<Value, Fault>;
}

impl<F> Service for F
where
    F: Fn(&OperationDescription, &Value) -> Result<Value, Fault> + Send + Sync + 'static,
{
    fn invoke(&self, operation: &OperationDescription, body: &Value) -> Result<Value, Fault> {
        self(operation, body)
    }
}

/// Wrap a closure as a shared service instance.
pub fn service_fn<F>(f: F) -> Arc<dyn Service>
where
    F: Fn(&OperationDescription, &Value) -> Result<Value, Fault> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Creates service instances.
pub type Activator = Arc<dyn Fn() -> Arc<dyn Service> + Send + Sync>;

/// How a listener provides service instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceMode {
    /// A new instance per call.
    #[default]
    PerCall,
    /// One instance per listener.
    Single,
}

/// A named service implementation.
#[derive(Clone)]
pub struct ServiceType {
    full_name: String,
    is_abstract: bool,
    contracts: Vec<ContractDescription>,
    instance_mode: InstanceMode,
    activator: Option<Activator>,
}

impl ServiceType {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            is_abstract: false,
            contracts: Vec::new(),
            instance_mode: InstanceMode::PerCall,
            activator: None,
        }
    }

    /// Declare a contract implemented by this type.
    pub fn implements(mut self, contract: ContractDescription) -> Self {
        self.contracts.push(contract);
        self
    }

    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn with_instance_mode(mut self, mode: InstanceMode) -> Self {
        self.instance_mode = mode;
        self
    }

    pub fn with_activator<F>(mut self, activator: F) -> Self
    where
        F: Fn() -> Arc<dyn Service> + Send + Sync + 'static,
    {
        self.activator = Some(Arc::new(activator));
        self
    }

    pub(crate) fn set_activator(&mut self, activator: Activator) {
        self.activator = Some(activator);
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    pub fn contracts(&self) -> &[ContractDescription] {
        &self.contracts
    }

    pub fn instance_mode(&self) -> InstanceMode {
        self.instance_mode
    }

    pub fn activator(&self) -> Option<Activator> {
        self.activator.clone()
    }

    pub fn has_activator(&self) -> bool {
        self.activator.is_some()
    }

    /// Create an instance, if the type can be activated.
    pub fn activate(&self) -> Option<Arc<dyn Service>> {
        self.activator.as_ref().map(|activate| activate())
    }
}

impl fmt::Debug for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceType")
            .field("full_name", &self.full_name)
            .field("is_abstract", &self.is_abstract)
            .field("contracts", &self.contracts)
            .field("instance_mode", &self.instance_mode)
            .field("activator", &self.activator.is_some())
            .finish()
    }
}

impl PartialEq for ServiceType {
    fn eq(&self, other: &Self) -> bool {
        self.full_name == other.full_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_actions() {
        let contract = ContractDescription::new("Demo.ICalculator")
            .operation("Add")
            .one_way_operation("Reset");
        assert_eq!(contract.name(), "ICalculator");
        assert_eq!(
            contract.operations()[0].action,
            "http://tempuri.org/ICalculator/Add"
        );
        assert_eq!(
            contract.operations()[0].reply_action,
            "http://tempuri.org/ICalculator/AddResponse"
        );
        assert!(contract.operations()[1].is_one_way);
    }

    #[test]
    fn test_namespace_without_trailing_slash() {
        let contract = ContractDescription::new("IEcho")
            .with_namespace("urn:demo")
            .operation("Echo");
        assert_eq!(contract.name(), "IEcho");
        assert_eq!(contract.operations()[0].action, "urn:demo/IEcho/Echo");
    }

    #[test]
    fn test_one_way_actions() {
        let contract = ContractDescription::new("Demo.ILog")
            .operation("Read")
            .one_way_operation("Write")
            .one_way_operation("Flush");
        let actions = contract.one_way_actions();
        assert_eq!(actions.len(), 2);
        assert!(actions.contains("http://tempuri.org/ILog/Write"));
        assert!(!actions.contains("http://tempuri.org/ILog/Read"));
    }

    #[test]
    fn test_closure_service() {
        let contract = ContractDescription::new("IEcho").operation("Echo");
        let op = contract.operations()[0].clone();
        let ty = ServiceType::new("Echo")
            .implements(contract)
            .with_activator(|| service_fn(|_, body| Ok(body.clone())));

        let instance = ty.activate().unwrap();
        let reply = instance.invoke(&op, &serde_json::json!({"x": 1})).unwrap();
        assert_eq!(reply["x"], 1);
    }

    #[test]
    fn test_service_type_without_activator() {
        let ty = ServiceType::new("Demo.Base").abstract_type();
        assert!(ty.is_abstract());
        assert!(!ty.has_activator());
        assert!(ty.activate().is_none());
    }
}
