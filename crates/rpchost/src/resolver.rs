// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service type resolution.
//!
//! Finds the concrete service implementations of an assembly, their declared
//! contracts and the bindings their endpoints use.

use crate::assembly::{ServiceAssembly, TypeRegistry};
use crate::binding::{Binding, BindingKind, BindingSource};
use crate::contract::{ContractDescription, ServiceType};
use crate::error::{Error, Result};
use crate::service_model::ServiceModelConfig;
use std::path::Path;

/// Resolves service types, contracts and bindings.
#[derive(Clone, Copy)]
pub struct ServiceTypeResolver<'r> {
    registry: &'r TypeRegistry,
}

impl Default for ServiceTypeResolver<'static> {
    fn default() -> Self {
        Self::new(TypeRegistry::global())
    }
}

impl<'r> ServiceTypeResolver<'r> {
    /// Resolver pulling activators from `registry`.
    pub fn new(registry: &'r TypeRegistry) -> Self {
        Self { registry }
    }

    /// Load the assembly at `path` and return its service implementations.
    ///
    /// With a config file, only types named by one of its `<service>`
    /// elements qualify.
    pub fn load_candidate_types<P: AsRef<Path>>(
        &self,
        path: P,
        config: Option<&ServiceModelConfig>,
    ) -> Result<Vec<ServiceType>> {
        let assembly = ServiceAssembly::load_with_registry(path, self.registry)?;
        self.candidate_types(&assembly, config)
    }

    /// Service implementations of an already loaded assembly.
    pub fn candidate_types(
        &self,
        assembly: &ServiceAssembly,
        config: Option<&ServiceModelConfig>,
    ) -> Result<Vec<ServiceType>> {
        let types: Vec<ServiceType> = assembly
            .types()
            .iter()
            .filter(|t| Self::is_service_implementation(t))
            .filter(|t| config.map_or(true, |c| c.service(t.full_name()).is_some()))
            .cloned()
            .collect();

        if types.is_empty() {
            return Err(Error::NoServiceTypeFound(match assembly.location() {
                Some(path) => path.display().to_string(),
                None => assembly.name().to_string(),
            }));
        }
        tracing::debug!(
            "Resolved {} service type(s) from {}",
            types.len(),
            assembly.name()
        );
        Ok(types)
    }

    /// Concrete and implementing at least one service contract.
    pub fn is_service_implementation(ty: &ServiceType) -> bool {
        !ty.is_abstract() && ty.contracts().iter().any(Self::is_contract_type)
    }

    /// Marked as a service contract and declaring operations.
    pub fn is_contract_type(contract: &ContractDescription) -> bool {
        contract.is_service_contract() && !contract.operations().is_empty()
    }

    /// Service contracts implemented by `ty`, in declaration order.
    pub fn get_declared_contracts(ty: &ServiceType) -> Result<Vec<ContractDescription>> {
        let contracts: Vec<ContractDescription> = ty
            .contracts()
            .iter()
            .filter(|c| Self::is_contract_type(c))
            .cloned()
            .collect();
        if contracts.is_empty() {
            return Err(Error::ContractResolution(format!(
                "'{}' declares no service contract",
                ty.full_name()
            )));
        }
        Ok(contracts)
    }

    /// Turn a binding source into a binding.
    ///
    /// [`BindingSource::Default`] yields a basic HTTP binding; use
    /// [`ServiceTypeResolver::default_binding_for`] to pick one by scheme.
    pub fn resolve_binding(source: &BindingSource) -> Result<Binding> {
        match source {
            BindingSource::Default => Ok(Binding::basic_http()),
            BindingSource::Type(name) => Ok(Binding::new(BindingKind::from_name(name)?)),
            BindingSource::Instance(binding) => Ok(binding.clone()),
        }
    }

    /// Default binding for an address scheme.
    pub fn default_binding_for(scheme: &str) -> Result<Binding> {
        match scheme {
            "http" | "https" => Ok(Binding::basic_http()),
            "net.tcp" => Ok(Binding::net_tcp()),
            other => Err(Error::InvalidBindingType(format!(
                "no default binding for scheme '{}'",
                other
            ))),
        }
    }

    /// Resolve `source`, falling back to the scheme default.
    pub fn resolve_binding_for(source: &BindingSource, scheme: &str) -> Result<Binding> {
        match source {
            BindingSource::Default => Self::default_binding_for(scheme),
            other => Self::resolve_binding(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::service_fn;
    use crate::error::ErrorKind;
    use std::io::Write;

    fn calc_contract() -> ContractDescription {
        ContractDescription::new("Demo.ICalculator").operation("Add")
    }

    fn assembly() -> ServiceAssembly {
        ServiceAssembly::new("Demo")
            .with_type(
                ServiceType::new("Demo.Calculator")
                    .implements(calc_contract())
                    .with_activator(|| service_fn(|_, b| Ok(b.clone()))),
            )
            .with_type(
                ServiceType::new("Demo.CalculatorBase")
                    .implements(calc_contract())
                    .abstract_type(),
            )
            .with_type(
                ServiceType::new("Demo.Helper")
                    .implements(ContractDescription::new("Demo.IHelper").service_contract(false)),
            )
            .with_type(
                ServiceType::new("Demo.Other")
                    .implements(ContractDescription::new("Demo.IOther").operation("Ping")),
            )
    }

    #[test]
    fn test_candidate_types() {
        let registry = TypeRegistry::new();
        let resolver = ServiceTypeResolver::new(&registry);
        let types = resolver.candidate_types(&assembly(), None).unwrap();
        let names: Vec<&str> = types.iter().map(|t| t.full_name()).collect();
        assert_eq!(names, ["Demo.Calculator", "Demo.Other"]);
    }

    #[test]
    fn test_candidate_types_narrowed_by_config() {
        let config = ServiceModelConfig::parse(
            r#"<configuration><system.serviceModel><services>
                 <service name="Demo.Other" />
               </services></system.serviceModel></configuration>"#,
        )
        .unwrap();
        let registry = TypeRegistry::new();
        let types = ServiceTypeResolver::new(&registry)
            .candidate_types(&assembly(), Some(&config))
            .unwrap();
        assert_eq!(types.len(), 1);
        assert_eq!(types[0].full_name(), "Demo.Other");
    }

    #[test]
    fn test_no_service_type() {
        let registry = TypeRegistry::new();
        let only_abstract = ServiceAssembly::new("Empty").with_type(
            ServiceType::new("Demo.Base")
                .implements(calc_contract())
                .abstract_type(),
        );
        let err = ServiceTypeResolver::new(&registry)
            .candidate_types(&only_abstract, None)
            .unwrap_err();
        assert!(matches!(err, Error::NoServiceTypeFound(ref n) if n == "Empty"));
        assert_eq!(err.kind(), ErrorKind::TypeResolution);
    }

    #[test]
    fn test_load_candidate_types_from_manifest() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"
[[contracts]]
full_name = "Demo.IEcho"
operations = [{ name = "Echo" }]

[[types]]
full_name = "Demo.Echo"
contracts = ["Demo.IEcho"]
"#,
        )
        .unwrap();

        let registry = TypeRegistry::new();
        registry.register("Demo.Echo", || service_fn(|_, b| Ok(b.clone())));
        let types = ServiceTypeResolver::new(&registry)
            .load_candidate_types(file.path(), None)
            .unwrap();
        assert_eq!(types.len(), 1);
        assert!(types[0].has_activator());

        let err = ServiceTypeResolver::new(&registry)
            .load_candidate_types("/nonexistent/echo.toml", None)
            .unwrap_err();
        assert!(matches!(err, Error::AssemblyLoad { .. }));
    }

    #[test]
    fn test_predicates() {
        assert!(ServiceTypeResolver::is_contract_type(&calc_contract()));
        assert!(!ServiceTypeResolver::is_contract_type(
            &ContractDescription::new("Demo.IEmpty")
        ));
        assert!(!ServiceTypeResolver::is_contract_type(
            &ContractDescription::new("Demo.IPlain")
                .operation("X")
                .service_contract(false)
        ));

        let asm = assembly();
        assert!(ServiceTypeResolver::is_service_implementation(
            asm.find("Demo.Calculator").unwrap()
        ));
        assert!(!ServiceTypeResolver::is_service_implementation(
            asm.find("Demo.CalculatorBase").unwrap()
        ));
        assert!(!ServiceTypeResolver::is_service_implementation(
            asm.find("Demo.Helper").unwrap()
        ));
    }

    #[test]
    fn test_declared_contracts() {
        let asm = assembly();
        let contracts =
            ServiceTypeResolver::get_declared_contracts(asm.find("Demo.Calculator").unwrap())
                .unwrap();
        assert_eq!(contracts[0].full_name(), "Demo.ICalculator");

        assert!(matches!(
            ServiceTypeResolver::get_declared_contracts(asm.find("Demo.Helper").unwrap()),
            Err(Error::ContractResolution(_))
        ));
    }

    #[test]
    fn test_resolve_binding() {
        let b = ServiceTypeResolver::resolve_binding(&BindingSource::Default).unwrap();
        assert_eq!(b.kind, BindingKind::BasicHttp);

        let b = ServiceTypeResolver::resolve_binding(&BindingSource::Type("netTcpBinding".into()))
            .unwrap();
        assert_eq!(b.kind, BindingKind::NetTcp);

        let custom = Binding::web_http().with_max_received_message_size(1024);
        let b = ServiceTypeResolver::resolve_binding(&custom.clone().into()).unwrap();
        assert_eq!(b, custom);

        assert!(matches!(
            ServiceTypeResolver::resolve_binding(&BindingSource::Type("msmqBinding".into())),
            Err(Error::InvalidBindingType(_))
        ));
    }

    #[test]
    fn test_default_binding_by_scheme() {
        assert_eq!(
            ServiceTypeResolver::resolve_binding_for(&BindingSource::Default, "net.tcp")
                .unwrap()
                .kind,
            BindingKind::NetTcp
        );
        assert_eq!(
            ServiceTypeResolver::resolve_binding_for(&BindingSource::Default, "https")
                .unwrap()
                .kind,
            BindingKind::BasicHttp
        );
        assert!(ServiceTypeResolver::default_binding_for("ftp").is_err());
    }
}
