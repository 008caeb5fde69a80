// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Declarative service model configuration.
//!
//! Reads the `system.serviceModel` section of an XML configuration file:
//!
//! ```xml
//! <configuration>
//!   <system.serviceModel>
//!     <services>
//!       <service name="Demo.Calculator">
//!         <host>
//!           <baseAddresses>
//!             <add baseAddress="http://localhost:8080/calc" />
//!           </baseAddresses>
//!         </host>
//!         <endpoint address="" binding="basicHttpBinding"
//!                   bindingConfiguration="large" contract="Demo.ICalculator" />
//!       </service>
//!     </services>
//!     <bindings>
//!       <basicHttpBinding>
//!         <binding name="large" maxReceivedMessageSize="1048576" receiveTimeout="00:05:00">
//!           <security mode="None" />
//!         </binding>
//!       </basicHttpBinding>
//!     </bindings>
//!   </system.serviceModel>
//! </configuration>
//! ```

use crate::address::ServiceAddress;
use crate::binding::{Binding, BindingKind, SecurityMode};
use crate::contract::ServiceType;
use crate::endpoint::EndpointDescriptor;
use crate::error::{Error, Result};
use roxmltree::{Document, Node};
use std::path::Path;
use std::time::Duration;

/// Contract name of metadata exchange endpoints; served by the metadata behavior.
pub const METADATA_CONTRACT: &str = "IMetadataExchange";

/// One `<endpoint>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointElement {
    pub address: String,
    pub binding: String,
    pub binding_configuration: Option<String>,
    pub contract: String,
}

/// One `<service>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceElement {
    pub name: String,
    pub base_addresses: Vec<String>,
    pub endpoints: Vec<EndpointElement>,
}

/// One named `<binding>` under `<bindings>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingElement {
    pub kind: BindingKind,
    pub name: String,
    pub binding: Binding,
}

/// Parsed `system.serviceModel` section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceModelConfig {
    pub services: Vec<ServiceElement>,
    pub bindings: Vec<BindingElement>,
}

impl ServiceModelConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        let xml = std::fs::read_to_string(path)?;
        Self::parse(&xml)
    }

    pub fn parse(xml: &str) -> Result<Self> {
        let doc = Document::parse(xml)?;
        let root = doc.root_element();
        if root.tag_name().name() != "configuration" {
            return Err(Error::ServiceModel(format!(
                "root element is <{}>, expected <configuration>",
                root.tag_name().name()
            )));
        }

        let mut config = Self::default();
        let Some(model) = child(root, "system.serviceModel") else {
            return Ok(config);
        };

        if let Some(bindings) = child(model, "bindings") {
            for section in bindings.children().filter(Node::is_element) {
                let kind = BindingKind::from_name(section.tag_name().name())?;
                for node in children(section, "binding") {
                    config.bindings.push(parse_binding(kind, node)?);
                }
            }
        }

        if let Some(services) = child(model, "services") {
            for node in children(services, "service") {
                config.services.push(parse_service(node)?);
            }
        }

        Ok(config)
    }

    pub fn service(&self, name: &str) -> Option<&ServiceElement> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Binding of `kind`, with the named configuration applied if any.
    pub fn binding(&self, kind: BindingKind, configuration: Option<&str>) -> Result<Binding> {
        match configuration.filter(|c| !c.is_empty()) {
            None => Ok(Binding::new(kind)),
            Some(name) => self
                .bindings
                .iter()
                .find(|b| b.kind == kind && b.name == name)
                .map(|b| b.binding.clone())
                .ok_or_else(|| {
                    Error::ServiceModel(format!("no {} configuration named '{}'", kind, name))
                }),
        }
    }

    /// Endpoints configured for `service_type`.
    ///
    /// Relative endpoint addresses are joined to `base_override` when given,
    /// otherwise to the first configured base address matching the binding
    /// scheme. Metadata exchange endpoints are skipped.
    pub fn endpoints_for(
        &self,
        service_type: &ServiceType,
        base_override: Option<&ServiceAddress>,
    ) -> Result<Vec<EndpointDescriptor>> {
        let Some(service) = self.service(service_type.full_name()) else {
            return Ok(Vec::new());
        };

        let bases = match base_override {
            Some(addr) => vec![addr.clone()],
            None => service
                .base_addresses
                .iter()
                .map(|a| ServiceAddress::parse(a))
                .collect::<Result<Vec<_>>>()?,
        };

        let mut endpoints = Vec::with_capacity(service.endpoints.len());
        for element in &service.endpoints {
            if element.contract == METADATA_CONTRACT {
                continue;
            }

            let contract = service_type
                .contracts()
                .iter()
                .find(|c| c.full_name() == element.contract || c.name() == element.contract)
                .ok_or_else(|| {
                    Error::ContractResolution(format!(
                        "'{}' does not implement contract '{}'",
                        service_type.full_name(),
                        element.contract
                    ))
                })?;

            let kind = BindingKind::from_name(&element.binding)?;
            let binding = self.binding(kind, element.binding_configuration.as_deref())?;

            let address = if element.address.contains("://") {
                ServiceAddress::parse(&element.address)?
            } else {
                let base = bases
                    .iter()
                    .find(|b| kind.accepts_scheme(b.scheme()))
                    .ok_or_else(|| {
                        Error::ServiceModel(format!(
                            "no base address matching {} for endpoint '{}' of '{}'",
                            kind,
                            element.address,
                            service.name
                        ))
                    })?;
                base.join(&element.address)?
            };

            endpoints.push(EndpointDescriptor::new(contract.clone(), binding, address)?);
        }
        Ok(endpoints)
    }
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

fn children<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.children()
        .filter(move |n| n.is_element() && n.tag_name().name() == name)
}

fn required<'a>(node: Node<'a, '_>, attr: &str) -> Result<&'a str> {
    node.attribute(attr).ok_or_else(|| {
        Error::ServiceModel(format!(
            "<{}> is missing attribute '{}'",
            node.tag_name().name(),
            attr
        ))
    })
}

fn parse_service(node: Node) -> Result<ServiceElement> {
    let base_addresses = child(node, "host")
        .and_then(|host| child(host, "baseAddresses"))
        .map(|list| {
            children(list, "add")
                .map(|add| required(add, "baseAddress").map(str::to_string))
                .collect::<Result<Vec<_>>>()
        })
        .transpose()?
        .unwrap_or_default();

    let endpoints = children(node, "endpoint")
        .map(|ep| {
            Ok(EndpointElement {
                address: ep.attribute("address").unwrap_or_default().to_string(),
                binding: required(ep, "binding")?.to_string(),
                binding_configuration: ep.attribute("bindingConfiguration").map(str::to_string),
                contract: required(ep, "contract")?.to_string(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ServiceElement {
        name: required(node, "name")?.to_string(),
        base_addresses,
        endpoints,
    })
}

fn parse_binding(kind: BindingKind, node: Node) -> Result<BindingElement> {
    let name = node.attribute("name").unwrap_or_default().to_string();
    let mut binding = Binding::new(kind);
    binding.name = name.clone();

    for attr in node.attributes() {
        let value = attr.value();
        match attr.name() {
            "name" => {}
            "maxReceivedMessageSize" => {
                binding.max_received_message_size = value.parse().map_err(|_| {
                    Error::ServiceModel(format!("invalid maxReceivedMessageSize '{}'", value))
                })?;
            }
            "openTimeout" => binding.open_timeout = parse_timespan(value)?,
            "closeTimeout" => binding.close_timeout = parse_timespan(value)?,
            "sendTimeout" => binding.send_timeout = parse_timespan(value)?,
            "receiveTimeout" => binding.receive_timeout = parse_timespan(value)?,
            other => {
                tracing::debug!("Ignoring binding attribute '{}' on '{}'", other, name);
            }
        }
    }

    if let Some(security) = child(node, "security") {
        if let Some(mode) = security.attribute("mode") {
            binding.security = SecurityMode::from_name(mode)?;
        }
    }

    Ok(BindingElement {
        kind,
        name,
        binding,
    })
}

/// Parse `[d.]hh:mm:ss[.fraction]`.
pub fn parse_timespan(value: &str) -> Result<Duration> {
    let invalid = || Error::ServiceModel(format!("invalid time span '{}'", value));

    let parts: Vec<&str> = value.trim().split(':').collect();
    let [hours, minutes, seconds] = parts.as_slice() else {
        return Err(invalid());
    };

    let (days, hours) = match hours.split_once('.') {
        Some((d, h)) => (d.parse::<u64>().map_err(|_| invalid())?, h),
        None => (0, *hours),
    };
    let hours: u64 = hours.parse().map_err(|_| invalid())?;
    let minutes: u64 = minutes.parse().map_err(|_| invalid())?;
    let seconds: f64 = seconds.parse().map_err(|_| invalid())?;
    if hours > 23 || minutes > 59 || !(0.0..60.0).contains(&seconds) {
        return Err(invalid());
    }

    let whole = days * 86_400 + hours * 3_600 + minutes * 60;
    Ok(Duration::from_secs(whole) + Duration::from_secs_f64(seconds))
}
