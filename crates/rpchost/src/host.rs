// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Host lifecycle management.
//!
//! A [`HostManager`] owns the listeners of one hosting configuration and
//! drives them through open, close, abort and restart. The configuration is
//! described by [`HostOptions`]: an identity source (assembly, service type
//! or singleton instance), a binding source, an optional declarative config
//! file and a base address given as a URI or a port.
//!
//! # Example
//!
//! ```no_run
//! use rpchost::{service_fn, ContractDescription, HostManager, HostOptions, ServiceType};
//!
//! let echo = ServiceType::new("Demo.Echo")
//!     .implements(ContractDescription::new("Demo.IEcho").operation("Echo"));
//! let instance = service_fn(|_, body| Ok(body.clone()));
//!
//! let host = HostManager::start(
//!     HostOptions::singleton(echo, instance).with_address("http://localhost:8080/echo"),
//! )?;
//! for info in host.get_host_info_list()? {
//!     println!("{}", info);
//! }
//! host.close()?;
//! # Ok::<(), rpchost::Error>(())
//! ```
//!
//! # Thread Safety
//!
//! All operations take `&self`. Lifecycle operations of one manager are
//! serialized by a re-entrant lock, so event handlers may call back into the
//! manager. Building listeners is serialized across every manager of the
//! process.

use crate::address::ServiceAddress;
use crate::behavior::{
    SerializerBehavior, ServiceCredentials, ServiceDebugBehavior, ServiceMetadataBehavior,
    ServiceThrottling, WebHttpBehavior,
};
use crate::binding::{Binding, BindingSource};
use crate::contract::{ContractDescription, Service, ServiceType};
use crate::endpoint::EndpointDescriptor;
use crate::error::{Error, Result};
use crate::events::{HostEvents, HostState, ListenerIdentity};
use crate::inspector::DispatchInspector;
use crate::listener::{
    CommunicationState, ListenerDescription, ListenerHandle, ServiceEndpoint,
};
use crate::materializer::{MaterializedConfig, TempConfigMaterializer};
use crate::resolver::ServiceTypeResolver;
use crate::service_model::ServiceModelConfig;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Serializes listener construction across all managers of the process.
static LISTENER_CONSTRUCTION: Mutex<()> = parking_lot::const_mutex(());

/// Adjusts the binding of every endpoint, configured or built.
pub type BindingAction = Arc<dyn Fn(&mut Binding) + Send + Sync>;
/// Adjusts the credentials of each listener.
pub type CredentialsAction = Arc<dyn Fn(&mut ServiceCredentials) + Send + Sync>;
/// Adjusts the serializer limits of each listener.
pub type SerializerAction = Arc<dyn Fn(&mut SerializerBehavior) + Send + Sync>;
/// Adjusts the behavior of each web endpoint.
pub type WebHttpAction = Arc<dyn Fn(&mut WebHttpBehavior) + Send + Sync>;

/// Where hosted service types come from.
#[derive(Clone)]
pub enum ServiceIdentity {
    /// Every service type of an assembly manifest, or the named one.
    Assembly {
        path: PathBuf,
        service_type: Option<String>,
    },
    /// One service type, activated per its instance mode.
    Type(ServiceType),
    /// One service type served by a fixed instance.
    Singleton {
        service_type: ServiceType,
        instance: Arc<dyn Service>,
    },
}

impl fmt::Debug for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Assembly { path, service_type } => f
                .debug_struct("Assembly")
                .field("path", path)
                .field("service_type", service_type)
                .finish(),
            Self::Type(ty) => f.debug_tuple("Type").field(&ty.full_name()).finish(),
            Self::Singleton { service_type, .. } => f
                .debug_tuple("Singleton")
                .field(&service_type.full_name())
                .finish(),
        }
    }
}

/// How the base address is given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressSource {
    Uri(String),
    /// Expanded to `http://localhost:{port}/{contract}`, where `contract` is
    /// the selected contract or the first one the type declares.
    Port(u32),
}

/// Hosting configuration builder.
#[derive(Debug, Clone)]
pub struct HostOptions {
    identity: ServiceIdentity,
    binding: BindingSource,
    config_file: Option<PathBuf>,
    address: Option<AddressSource>,
    contract: Option<ContractDescription>,
}

impl HostOptions {
    /// Host the service types of an assembly manifest.
    pub fn assembly<P: Into<PathBuf>>(path: P) -> Self {
        Self::with_identity(ServiceIdentity::Assembly {
            path: path.into(),
            service_type: None,
        })
    }

    /// Host one service type. A new instance is activated per its
    /// [`InstanceMode`](crate::InstanceMode).
    pub fn service_type(service_type: ServiceType) -> Self {
        Self::with_identity(ServiceIdentity::Type(service_type))
    }

    /// Host one service type, answering every call with `instance`.
    pub fn singleton(service_type: ServiceType, instance: Arc<dyn Service>) -> Self {
        Self::with_identity(ServiceIdentity::Singleton {
            service_type,
            instance,
        })
    }

    /// Options for `identity` with the default binding and no address.
    pub fn with_identity(identity: ServiceIdentity) -> Self {
        Self {
            identity,
            binding: BindingSource::Default,
            config_file: None,
            address: None,
            contract: None,
        }
    }

    /// Only host `name` from the assembly. Ignored for other identities.
    pub fn with_service_type_name(mut self, name: impl Into<String>) -> Self {
        if let ServiceIdentity::Assembly { service_type, .. } = &mut self.identity {
            *service_type = Some(name.into());
        }
        self
    }

    /// Binding for programmatically built endpoints. Without one, the
    /// binding follows the base address scheme.
    pub fn with_binding(mut self, binding: impl Into<BindingSource>) -> Self {
        self.binding = binding.into();
        self
    }

    /// Binding type by name, e.g. `"netTcpBinding"`.
    pub fn with_binding_type(mut self, name: impl Into<String>) -> Self {
        self.binding = BindingSource::Type(name.into());
        self
    }

    /// Take endpoints from a declarative config file.
    pub fn with_config_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Base address as a URI. An empty string means no address.
    pub fn with_address(mut self, uri: impl Into<String>) -> Self {
        self.address = Some(AddressSource::Uri(uri.into()));
        self
    }

    /// Base address from a port, see [`AddressSource::Port`]. Checked
    /// against `1..=65535` on initialize.
    pub fn with_port(mut self, port: u32) -> Self {
        self.address = Some(AddressSource::Port(port));
        self
    }

    /// Expose only `contract`. Programmatic endpoints are built for it alone
    /// and a port address is named after it.
    pub fn with_contract(mut self, contract: ContractDescription) -> Self {
        self.contract = Some(contract);
        self
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    pub fn binding(&self) -> &BindingSource {
        &self.binding
    }

    /// Config file as given, not the materialized copy.
    pub fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }

    pub fn address(&self) -> Option<&AddressSource> {
        self.address.as_ref()
    }

    /// Selected contract, if any.
    pub fn contract(&self) -> Option<&ContractDescription> {
        self.contract.as_ref()
    }

    fn validate(self) -> Result<HostConfiguration> {
        match &self.identity {
            ServiceIdentity::Assembly { path, service_type } => {
                if path.as_os_str().is_empty() {
                    return Err(Error::argument("assembly", "path is empty"));
                }
                if !path.is_file() {
                    return Err(Error::FileNotFound(path.clone()));
                }
                if service_type.as_deref().is_some_and(|n| n.trim().is_empty()) {
                    return Err(Error::argument("service_type", "name is empty"));
                }
            }
            ServiceIdentity::Type(ty) | ServiceIdentity::Singleton { service_type: ty, .. } => {
                if !ServiceTypeResolver::is_service_implementation(ty) {
                    return Err(Error::argument(
                        "service_type",
                        format!("'{}' is not a service implementation", ty.full_name()),
                    ));
                }
            }
        }

        if let Some(contract) = &self.contract {
            if !ServiceTypeResolver::is_contract_type(contract) {
                return Err(Error::argument(
                    "contract",
                    format!("'{}' is not a service contract", contract.full_name()),
                ));
            }
            if let ServiceIdentity::Type(ty) | ServiceIdentity::Singleton { service_type: ty, .. } =
                &self.identity
            {
                if find_contract(ty, contract).is_none() {
                    return Err(Error::argument(
                        "contract",
                        format!(
                            "'{}' does not implement '{}'",
                            ty.full_name(),
                            contract.full_name()
                        ),
                    ));
                }
            }
        }

        if let Some(path) = &self.config_file {
            if !path.is_file() {
                return Err(Error::FileNotFound(path.clone()));
            }
        }

        let address = match self.address {
            None => None,
            Some(AddressSource::Uri(uri)) if uri.trim().is_empty() => None,
            Some(AddressSource::Uri(uri)) => Some(BaseAddress::Uri(ServiceAddress::parse(&uri)?)),
            Some(AddressSource::Port(port)) => match u16::try_from(port) {
                Ok(p) if p > 0 => Some(BaseAddress::Port(p)),
                _ => return Err(Error::PortOutOfRange(port)),
            },
        };
        if address.is_none() && self.config_file.is_none() {
            return Err(Error::argument(
                "address",
                "a base address is required without a config file",
            ));
        }

        Ok(HostConfiguration {
            identity: self.identity,
            binding: self.binding,
            config_file: self.config_file,
            address,
            contract: self.contract,
        })
    }
}

/// The declaration of `contract` on `ty`, matched by full name.
fn find_contract<'a>(ty: &'a ServiceType, contract: &ContractDescription) -> Option<&'a ContractDescription> {
    ty.contracts()
        .iter()
        .find(|c| c.full_name() == contract.full_name())
}

/// Contracts to build endpoints for: the selected one or all declared ones.
fn exposed_contracts(
    ty: &ServiceType,
    selected: Option<&ContractDescription>,
) -> Result<Vec<ContractDescription>> {
    match selected {
        None => ServiceTypeResolver::get_declared_contracts(ty),
        Some(contract) => find_contract(ty, contract)
            .cloned()
            .map(|c| vec![c])
            .ok_or_else(|| {
                Error::ContractResolution(format!(
                    "'{}' does not implement '{}'",
                    ty.full_name(),
                    contract.full_name()
                ))
            }),
    }
}

#[derive(Debug, Clone)]
enum BaseAddress {
    Uri(ServiceAddress),
    Port(u16),
}

impl BaseAddress {
    fn resolve(
        &self,
        service_type: &ServiceType,
        contract: Option<&ContractDescription>,
    ) -> Result<ServiceAddress> {
        match self {
            Self::Uri(addr) => Ok(addr.clone()),
            Self::Port(port) => {
                let contracts = exposed_contracts(service_type, contract)?;
                let Some(first) = contracts.first() else {
                    return Err(Error::ContractResolution(format!(
                        "'{}' declares no service contract",
                        service_type.full_name()
                    )));
                };
                ServiceAddress::for_port(*port, first.full_name())
            }
        }
    }
}

/// Validated hosting configuration.
#[derive(Debug, Clone)]
struct HostConfiguration {
    identity: ServiceIdentity,
    binding: BindingSource,
    config_file: Option<PathBuf>,
    address: Option<BaseAddress>,
    contract: Option<ContractDescription>,
}

#[derive(Default)]
struct Actions {
    binding: Option<BindingAction>,
    credentials: Option<CredentialsAction>,
    serializer: Option<SerializerAction>,
    web_http: Option<WebHttpAction>,
    inspectors: Vec<Arc<dyn DispatchInspector>>,
}

/// Snapshot of one listener.
#[derive(Debug, Clone)]
pub struct HostInfo {
    pub service_type: String,
    pub base_address: Option<String>,
    pub state: CommunicationState,
    pub credentials: ServiceCredentials,
    pub endpoints: Vec<Arc<EndpointDescriptor>>,
}

impl fmt::Display for HostInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at {} [{}] credentials={}",
            self.service_type,
            self.base_address.as_deref().unwrap_or("-"),
            self.state,
            self.credentials
        )
    }
}

/// Coarse phase of a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerPhase {
    Uninitialized,
    Initialized,
    Opened,
    Disposed,
}

/// Owns and drives the listeners of one hosting configuration.
pub struct HostManager {
    lifecycle: ReentrantMutex<()>,
    config: RwLock<Option<HostConfiguration>>,
    materialized: Mutex<Option<MaterializedConfig>>,
    actions: RwLock<Actions>,
    listeners: RwLock<Vec<Arc<ListenerHandle>>>,
    events: Arc<HostEvents>,
    is_opened: AtomicBool,
    disposed: AtomicBool,
}

impl Default for HostManager {
    fn default() -> Self {
        Self::new()
    }
}

impl HostManager {
    /// Uninitialized manager.
    pub fn new() -> Self {
        Self {
            lifecycle: ReentrantMutex::new(()),
            config: RwLock::new(None),
            materialized: Mutex::new(None),
            actions: RwLock::new(Actions::default()),
            listeners: RwLock::new(Vec::new()),
            events: Arc::new(HostEvents::new()),
            is_opened: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    /// Initialized manager.
    pub fn with_options(options: HostOptions) -> Result<Self> {
        let host = Self::new();
        host.initialize(options)?;
        Ok(host)
    }

    /// Initialized and opened manager.
    pub fn start(options: HostOptions) -> Result<Self> {
        let host = Self::with_options(options)?;
        host.open()?;
        Ok(host)
    }

    pub fn events(&self) -> &Arc<HostEvents> {
        &self.events
    }

    pub fn is_opened(&self) -> bool {
        self.is_opened.load(Ordering::Acquire)
    }

    pub fn is_initialized(&self) -> bool {
        self.config.read().is_some()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> ManagerPhase {
        if self.is_disposed() {
            ManagerPhase::Disposed
        } else if self.is_opened() {
            ManagerPhase::Opened
        } else if self.is_initialized() {
            ManagerPhase::Initialized
        } else {
            ManagerPhase::Uninitialized
        }
    }

    /// Path of the sanitized config copy in use, if any.
    pub fn materialized_config(&self) -> Option<PathBuf> {
        self.materialized
            .lock()
            .as_ref()
            .map(|m| m.path().to_path_buf())
    }

    /// Current listeners.
    pub fn listeners(&self) -> Vec<Arc<ListenerHandle>> {
        self.listeners.read().clone()
    }

    /// Adjust the binding of each endpoint before its listener is built.
    /// Applies to config file endpoints too. Takes effect on the next open.
    pub fn set_binding_action<F>(&self, action: F)
    where
        F: Fn(&mut Binding) + Send + Sync + 'static,
    {
        self.actions.write().binding = Some(Arc::new(action));
    }

    pub fn set_service_credentials_action<F>(&self, action: F)
    where
        F: Fn(&mut ServiceCredentials) + Send + Sync + 'static,
    {
        self.actions.write().credentials = Some(Arc::new(action));
    }

    pub fn set_data_contract_resolver_action<F>(&self, action: F)
    where
        F: Fn(&mut SerializerBehavior) + Send + Sync + 'static,
    {
        self.actions.write().serializer = Some(Arc::new(action));
    }

    pub fn set_web_http_behavior_action<F>(&self, action: F)
    where
        F: Fn(&mut WebHttpBehavior) + Send + Sync + 'static,
    {
        self.actions.write().web_http = Some(Arc::new(action));
    }

    /// Add an inspector to every endpoint built from now on.
    pub fn add_dispatch_inspector(&self, inspector: Arc<dyn DispatchInspector>) {
        self.actions.write().inspectors.push(inspector);
    }

    /// Validate and store `options`, replacing any previous configuration.
    ///
    /// On failure the previous configuration is kept.
    pub fn initialize(&self, options: HostOptions) -> Result<()> {
        let _guard = self.lifecycle.lock();
        if self.is_disposed() {
            return Err(Error::Disposed);
        }

        let config = options.validate()?;
        let materialized = match (&config.config_file, &config.address) {
            (Some(path), Some(_)) => {
                let _construction = LISTENER_CONSTRUCTION.lock();
                Some(TempConfigMaterializer::materialize(path)?)
            }
            _ => None,
        };

        let previous = std::mem::replace(&mut *self.materialized.lock(), materialized);
        Self::discard(previous);
        tracing::debug!("Initialized with {:?}", config.identity);
        *self.config.write() = Some(config);
        Ok(())
    }

    /// Build and open the listeners. Does nothing if already opened.
    pub fn open(&self) -> Result<()> {
        let _guard = self.lifecycle.lock();
        self.ensure_usable()?;
        if self.is_opened() {
            return Ok(());
        }
        self.open_listeners(HostState::Opening, HostState::Opened, "Open")
    }

    /// Rebuild and reopen every listener.
    pub fn restart(&self) -> Result<()> {
        let _guard = self.lifecycle.lock();
        self.ensure_usable()?;
        self.open_listeners(HostState::Restarting, HostState::Restarted, "Restart")
    }

    /// Close every listener gracefully, aborting the ones that fail.
    pub fn close(&self) -> Result<()> {
        let _guard = self.lifecycle.lock();
        self.ensure_usable()?;
        self.close_listeners();
        Ok(())
    }

    /// Abort every listener.
    pub fn abort(&self) -> Result<()> {
        let _guard = self.lifecycle.lock();
        self.ensure_usable()?;

        for listener in self.listeners() {
            let identity = listener.identity();
            self.events.raise_state(identity, HostState::Aborting);
            listener.abort();
            tracing::info!("Abort succeeded: {}", identity);
            self.events.raise_state(identity, HostState::Aborted);
        }
        self.is_opened.store(false, Ordering::Release);
        Ok(())
    }

    pub fn get_host_info_list(&self) -> Result<Vec<HostInfo>> {
        self.ensure_usable()?;
        Ok(self
            .listeners()
            .iter()
            .map(|l| HostInfo {
                service_type: l.identity().service_type.clone(),
                base_address: l.identity().base_address.clone(),
                state: l.state(),
                credentials: l.credentials().clone(),
                endpoints: l.endpoints(),
            })
            .collect())
    }

    /// Close every listener and delete the config copy. Idempotent.
    pub fn dispose(&self) {
        let _guard = self.lifecycle.lock();
        if self.is_disposed() {
            return;
        }
        self.close_listeners();
        self.listeners.write().clear();
        Self::discard(self.materialized.lock().take());
        self.disposed.store(true, Ordering::Release);
        tracing::debug!("Host disposed");
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }
        if !self.is_initialized() {
            return Err(Error::NotInitialized);
        }
        Ok(())
    }

    fn discard(copy: Option<MaterializedConfig>) {
        if let Some(copy) = copy {
            let path = copy.path().to_path_buf();
            if let Err(e) = copy.delete() {
                tracing::warn!("Failed to delete {}: {}", path.display(), e);
            }
        }
    }

    fn close_listeners(&self) {
        for listener in self.listeners() {
            let identity = listener.identity();
            self.events.raise_state(identity, HostState::Closing);
            match listener.close(None) {
                Ok(()) => tracing::info!("Close succeeded: {}", identity),
                Err(e) => {
                    tracing::error!("Close failed: {}: {}, aborting", identity, e);
                    listener.abort();
                }
            }
            self.events.raise_state(identity, HostState::Closed);
        }
        self.is_opened.store(false, Ordering::Release);
    }

    fn open_listeners(&self, opening: HostState, opened: HostState, operation: &str) -> Result<()> {
        for stale in std::mem::take(&mut *self.listeners.write()) {
            tracing::debug!("Aborting previous listener {}", stale.identity());
            stale.abort();
        }
        self.is_opened.store(false, Ordering::Release);

        let built = {
            let _construction = LISTENER_CONSTRUCTION.lock();
            self.build_listeners()
        };
        let listeners = match built {
            Ok(listeners) => listeners,
            Err(e) => {
                tracing::error!("{} failed: {}", operation, e);
                return Err(e);
            }
        };
        *self.listeners.write() = listeners.clone();

        for listener in &listeners {
            self.events
                .raise_state(listener.identity(), HostState::Created);
        }

        for listener in &listeners {
            if matches!(
                listener.state(),
                CommunicationState::Opening | CommunicationState::Opened
            ) {
                continue;
            }
            let identity = listener.identity();
            self.events.raise_state(identity, opening);
            if let Err(e) = listener.open() {
                tracing::error!("{} failed: {}: {}", operation, identity, e);
                return Err(e);
            }
            tracing::info!("{} succeeded: {}", operation, identity);
            self.events.raise_state(identity, opened);
        }

        self.is_opened.store(true, Ordering::Release);
        Ok(())
    }

    fn build_listeners(&self) -> Result<Vec<Arc<ListenerHandle>>> {
        let config = self.config.read().clone().ok_or(Error::NotInitialized)?;

        let model = match (self.materialized_config(), &config.config_file) {
            (Some(copy), _) => Some(ServiceModelConfig::load(copy)?),
            (None, Some(path)) => Some(ServiceModelConfig::load(path)?),
            (None, None) => None,
        };

        let types: Vec<(ServiceType, Option<Arc<dyn Service>>)> = match &config.identity {
            ServiceIdentity::Assembly { path, service_type } => {
                let candidates =
                    ServiceTypeResolver::default().load_candidate_types(path, model.as_ref())?;
                match service_type {
                    Some(name) => {
                        let ty = candidates
                            .into_iter()
                            .find(|t| t.full_name() == name)
                            .ok_or_else(|| {
                                Error::NoServiceTypeFound(format!(
                                    "'{}' in {}",
                                    name,
                                    path.display()
                                ))
                            })?;
                        vec![(ty, None)]
                    }
                    None => candidates.into_iter().map(|t| (t, None)).collect(),
                }
            }
            ServiceIdentity::Type(ty) => vec![(ty.clone(), None)],
            ServiceIdentity::Singleton {
                service_type,
                instance,
            } => vec![(service_type.clone(), Some(Arc::clone(instance)))],
        };

        types
            .into_iter()
            .map(|(ty, instance)| self.build_listener(&config, model.as_ref(), ty, instance))
            .collect()
    }

    fn build_listener(
        &self,
        config: &HostConfiguration,
        model: Option<&ServiceModelConfig>,
        service_type: ServiceType,
        singleton: Option<Arc<dyn Service>>,
    ) -> Result<Arc<ListenerHandle>> {
        let actions = self.actions.read();
        let base = config
            .address
            .as_ref()
            .map(|a| a.resolve(&service_type, config.contract.as_ref()))
            .transpose()?;

        let configured = model.and_then(|m| m.service(service_type.full_name()));
        let (base_addresses, descriptors) = match (model, configured) {
            (Some(model), Some(service)) => {
                let mut descriptors = model.endpoints_for(&service_type, base.as_ref())?;
                if let Some(action) = &actions.binding {
                    descriptors = descriptors
                        .into_iter()
                        .map(|d| d.with_binding_adjusted(|b| action(b)))
                        .collect::<Result<Vec<_>>>()?;
                }
                let bases = match base {
                    Some(addr) => vec![addr],
                    None => service
                        .base_addresses
                        .iter()
                        .map(|a| ServiceAddress::parse(a))
                        .collect::<Result<Vec<_>>>()?,
                };
                (bases, descriptors)
            }
            _ => {
                let base = base.ok_or_else(|| {
                    Error::ServiceModel(format!(
                        "no base address and no <service name=\"{}\"> configuration",
                        service_type.full_name()
                    ))
                })?;
                let mut descriptors = Vec::new();
                for contract in exposed_contracts(&service_type, config.contract.as_ref())? {
                    let mut binding =
                        ServiceTypeResolver::resolve_binding_for(&config.binding, base.scheme())?;
                    if let Some(action) = &actions.binding {
                        action(&mut binding);
                    }
                    descriptors.push(EndpointDescriptor::new(contract, binding, base.clone())?);
                }
                (vec![base], descriptors)
            }
        };

        let metadata = base_addresses.iter().fold(
            ServiceMetadataBehavior::default(),
            |acc, addr| {
                let m = ServiceMetadataBehavior::for_scheme(addr.scheme());
                ServiceMetadataBehavior {
                    http_get_enabled: acc.http_get_enabled || m.http_get_enabled,
                    https_get_enabled: acc.https_get_enabled || m.https_get_enabled,
                }
            },
        );

        let mut description = ListenerDescription::new(service_type, base_addresses);
        description.singleton = singleton;
        description.debug = ServiceDebugBehavior {
            include_exception_detail_in_faults: true,
        };
        description.throttling = ServiceThrottling::unlimited();
        description.metadata = metadata;
        if let Some(action) = &actions.credentials {
            action(&mut description.credentials);
        }
        if let Some(action) = &actions.serializer {
            action(&mut description.serializer);
        }

        let identity = ListenerIdentity {
            service_type: description.service_type.full_name().to_string(),
            base_address: description
                .base_addresses
                .first()
                .or_else(|| descriptors.first().map(|d| d.address()))
                .map(ToString::to_string),
        };

        for descriptor in descriptors {
            let web = descriptor.binding().is_web_http();
            let mut endpoint = ServiceEndpoint::new(descriptor);
            if web {
                let mut behavior = WebHttpBehavior::default();
                if let Some(action) = &actions.web_http {
                    action(&mut behavior);
                }
                endpoint.set_web_http(behavior);
            }
            let (inspector, attached) = endpoint.attach_host_inspector(&identity);
            if attached {
                let events = Arc::clone(&self.events);
                inspector
                    .receiving_request()
                    .subscribe(move |e| events.receiving_request.raise(e));
                let events = Arc::clone(&self.events);
                inspector
                    .sending_reply()
                    .subscribe(move |e| events.sending_reply.raise(e));
            }
            for extra in &actions.inspectors {
                endpoint.add_inspector(Arc::clone(extra));
            }
            description.endpoints.push(endpoint);
        }

        Ok(Arc::new(ListenerHandle::new(description)?))
    }
}

impl fmt::Debug for HostManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostManager")
            .field("phase", &self.phase())
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

impl Drop for HostManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{service_fn, ContractDescription};
    use crate::error::ErrorKind;

    fn echo_type() -> ServiceType {
        ServiceType::new("Demo.Echo")
            .implements(ContractDescription::new("Demo.IEcho").operation("Echo"))
            .with_activator(|| service_fn(|_, body| Ok(body.clone())))
    }

    #[test]
    fn test_validate_port_range() {
        for port in [0, 65_536, 70_000] {
            let err = HostManager::with_options(HostOptions::service_type(echo_type()).with_port(port))
                .unwrap_err();
            assert!(matches!(err, Error::PortOutOfRange(p) if p == port));
            assert_eq!(err.kind(), ErrorKind::Configuration);
        }
        assert!(HostManager::with_options(HostOptions::service_type(echo_type()).with_port(1)).is_ok());
        assert!(
            HostManager::with_options(HostOptions::service_type(echo_type()).with_port(65_535))
                .is_ok()
        );
    }

    #[test]
    fn test_validate_uri_and_files() {
        let err = HostManager::with_options(
            HostOptions::service_type(echo_type()).with_address("not a uri"),
        )
        .unwrap_err();
        assert!(matches!(err, Error::UriFormat { .. }));

        let err = HostManager::with_options(
            HostOptions::assembly("/nonexistent/services.toml").with_port(8080),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = HostManager::with_options(
            HostOptions::service_type(echo_type()).with_config_file("/nonexistent/app.config"),
        )
        .unwrap_err();
        assert!(matches!(err, Error::FileNotFound(_)));

        let err = HostManager::with_options(HostOptions::service_type(echo_type())).unwrap_err();
        assert!(matches!(err, Error::Argument { name: "address", .. }));
    }

    #[test]
    fn test_validate_rejects_non_service_type() {
        let plain = ServiceType::new("Demo.Plain");
        let err = HostManager::with_options(HostOptions::service_type(plain).with_port(8080))
            .unwrap_err();
        assert!(matches!(err, Error::Argument { name: "service_type", .. }));
    }

    #[test]
    fn test_failed_initialize_keeps_previous_config() {
        let host = HostManager::new();
        assert_eq!(host.phase(), ManagerPhase::Uninitialized);
        host.initialize(HostOptions::service_type(echo_type()).with_port(8080))
            .unwrap();
        assert!(host.initialize(HostOptions::service_type(echo_type()).with_port(0)).is_err());
        assert_eq!(host.phase(), ManagerPhase::Initialized);
    }

    fn two_contract_type() -> ServiceType {
        ServiceType::new("Demo.Both")
            .implements(ContractDescription::new("Demo.IA").operation("A"))
            .implements(ContractDescription::new("Demo.IB").operation("B"))
            .with_activator(|| service_fn(|_, body| Ok(body.clone())))
    }

    #[test]
    fn test_port_address_uses_contract_name() {
        let addr = BaseAddress::Port(9000).resolve(&echo_type(), None).unwrap();
        assert_eq!(addr.to_string(), "http://localhost:9000/Demo.IEcho");

        let ib = ContractDescription::new("Demo.IB").operation("B");
        let addr = BaseAddress::Port(9000)
            .resolve(&two_contract_type(), Some(&ib))
            .unwrap();
        assert_eq!(addr.to_string(), "http://localhost:9000/Demo.IB");
    }

    #[test]
    fn test_validate_selected_contract() {
        let err = HostManager::with_options(
            HostOptions::service_type(echo_type())
                .with_port(8080)
                .with_contract(ContractDescription::new("Demo.IOther").operation("X")),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Argument { name: "contract", .. }));

        let unmarked = ContractDescription::new("Demo.IEcho")
            .operation("Echo")
            .service_contract(false);
        let err = HostManager::with_options(
            HostOptions::service_type(echo_type())
                .with_port(8080)
                .with_contract(unmarked),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Argument { name: "contract", .. }));

        let options = HostOptions::service_type(two_contract_type())
            .with_port(8080)
            .with_contract(ContractDescription::new("Demo.IB").operation("B"));
        assert_eq!(options.contract().map(|c| c.full_name()), Some("Demo.IB"));
        assert!(HostManager::with_options(options).is_ok());
    }

    #[test]
    fn test_exposed_contracts() {
        let all = exposed_contracts(&two_contract_type(), None).unwrap();
        assert_eq!(all.len(), 2);

        let ib = ContractDescription::new("Demo.IB").operation("B");
        let one = exposed_contracts(&two_contract_type(), Some(&ib)).unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].full_name(), "Demo.IB");

        let err = exposed_contracts(&echo_type(), Some(&ib)).unwrap_err();
        assert!(matches!(err, Error::ContractResolution(_)));
    }

    #[test]
    fn test_lifecycle_guards() {
        let host = HostManager::new();
        assert!(matches!(host.open(), Err(Error::NotInitialized)));
        assert!(matches!(host.close(), Err(Error::NotInitialized)));
        assert!(matches!(host.get_host_info_list(), Err(Error::NotInitialized)));

        host.dispose();
        host.dispose();
        assert_eq!(host.phase(), ManagerPhase::Disposed);
        assert!(matches!(host.open(), Err(Error::Disposed)));
        assert!(matches!(host.restart(), Err(Error::Disposed)));
        assert!(matches!(host.abort(), Err(Error::Disposed)));
        assert!(matches!(
            host.initialize(HostOptions::service_type(echo_type()).with_port(1)),
            Err(Error::Disposed)
        ));
    }

    #[test]
    fn test_close_without_listeners_is_noop() {
        let host = HostManager::with_options(HostOptions::service_type(echo_type()).with_port(1))
            .unwrap();
        host.close().unwrap();
        host.abort().unwrap();
        assert!(host.get_host_info_list().unwrap().is_empty());
        assert!(!host.is_opened());
    }
}
