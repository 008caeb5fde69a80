// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RPC endpoint host
//!
//! Hosts RPC service implementations behind network endpoints and manages
//! their lifecycle.
//!
//! # Features
//!
//! - **Type Resolution**: Find service implementations and contracts in an
//!   assembly manifest or take them from the caller
//! - **Lifecycle**: Open, close, abort and restart listeners as one unit,
//!   with best-effort teardown
//! - **Message Inspection**: Correlation ids and one-way classification for
//!   every request and reply, on both host and client side
//! - **Declarative Configuration**: Endpoints and bindings from an XML
//!   config file, loaded from a sanitized temporary copy when a base address
//!   overrides the file's host section
//!
//! # Quick Start
//!
//! ```no_run
//! use rpchost::{
//!     service_fn, ContractDescription, HostManager, HostOptions, ServiceClient, ServiceType,
//! };
//! use serde_json::json;
//!
//! let calculator = ServiceType::new("Demo.Calculator")
//!     .implements(ContractDescription::new("Demo.ICalculator").operation("Add"));
//! let instance = service_fn(|_, body| {
//!     let sum = body["a"].as_i64().unwrap_or(0) + body["b"].as_i64().unwrap_or(0);
//!     Ok(json!(sum))
//! });
//!
//! let host = HostManager::start(HostOptions::singleton(calculator, instance).with_port(8080))?;
//!
//! let endpoint = host.listeners()[0].endpoints()[0].as_ref().clone();
//! let client = ServiceClient::new(endpoint);
//! assert_eq!(client.call("Add", json!({"a": 2, "b": 3}))?, json!(5));
//!
//! host.dispose();
//! # Ok::<(), rpchost::Error>(())
//! ```
//!
//! # Transport
//!
//! Every binding is served over TCP with length-prefixed JSON frames. The
//! binding decides which address schemes an endpoint accepts.

pub mod address;
pub mod assembly;
pub mod behavior;
pub mod binding;
pub mod client;
pub mod contract;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod host;
pub mod inspector;
pub mod listener;
pub mod materializer;
pub mod message;
pub mod resolver;
pub mod service_model;
mod transport;

pub use address::ServiceAddress;
pub use assembly::{ServiceAssembly, TypeRegistry};
pub use behavior::{
    BodyStyle, SerializerBehavior, ServiceCredentials, ServiceDebugBehavior,
    ServiceMetadataBehavior, ServiceThrottling, WebHttpBehavior,
};
pub use binding::{Binding, BindingKind, BindingSource, SecurityMode};
pub use client::ServiceClient;
pub use contract::{
    service_fn, ContractDescription, Fault, InstanceMode, OperationDescription, Service,
    ServiceType,
};
pub use endpoint::EndpointDescriptor;
pub use error::{Error, ErrorKind, Result};
pub use events::{
    EventHandlers, HostEvent, HostEvents, HostState, ListenerIdentity, MessageEvent,
    SubscriptionId,
};
pub use host::{AddressSource, HostInfo, HostManager, HostOptions, ManagerPhase, ServiceIdentity};
pub use inspector::{
    ClientInspector, ClientMessageInspector, CorrelationState, CorrelationToken,
    DispatchInspector, HostMessageInspector,
};
pub use listener::{CommunicationState, ListenerHandle};
pub use materializer::{MaterializedConfig, TempConfigMaterializer};
pub use message::{Message, UserNameToken};
pub use resolver::ServiceTypeResolver;
pub use service_model::ServiceModelConfig;
