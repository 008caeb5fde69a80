// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Listeners.
//!
//! A [`ListenerHandle`] serves every endpoint of one service implementation.
//! Its endpoints are grouped by `host:port`; each group is attached to a
//! socket that may be shared with other listeners of the process serving
//! other paths. Requests are routed to the endpoint whose address path
//! matches the request's `to` and whose contract declares the action.
//!
//! # Lifecycle
//!
//! ```text
//! Created --open--> Opening --> Opened --close--> Closing --> Closed
//!    |                 |                             |
//!    +-----------------+--------- abort -------------+--> Closed
//!                      +-- bind failure --> Faulted
//! ```

use crate::address::ServiceAddress;
use crate::behavior::{
    SerializerBehavior, ServiceCredentials, ServiceDebugBehavior, ServiceMetadataBehavior,
    ServiceThrottling, WebHttpBehavior, HELP_ACTION, METADATA_ACTION,
};
use crate::contract::{
    Activator, ContractDescription, Fault, InstanceMode, OperationDescription, Service,
    ServiceType,
};
use crate::endpoint::EndpointDescriptor;
use crate::error::{Error, Result};
use crate::events::ListenerIdentity;
use crate::inspector::{CorrelationToken, DispatchInspector, HostMessageInspector};
use crate::message::{Message, UserNameToken};
use crate::transport::{Connections, Route, RouteSettings, SharedSocket};
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Action of fault replies.
pub const FAULT_ACTION: &str = "urn:rpchost:fault";

/// Communication state of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommunicationState {
    Created,
    Opening,
    Opened,
    Closing,
    Closed,
    Faulted,
}

impl fmt::Display for CommunicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// An endpoint plus the behaviors attached to it.
pub struct ServiceEndpoint {
    descriptor: Arc<EndpointDescriptor>,
    host_inspector: Option<Arc<HostMessageInspector>>,
    inspectors: Vec<Arc<dyn DispatchInspector>>,
    web_http: Option<WebHttpBehavior>,
}

impl ServiceEndpoint {
    pub fn new(descriptor: EndpointDescriptor) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            host_inspector: None,
            inspectors: Vec::new(),
            web_http: None,
        }
    }

    pub fn descriptor(&self) -> &Arc<EndpointDescriptor> {
        &self.descriptor
    }

    /// Attach the host inspector unless one is already attached.
    ///
    /// Returns the endpoint's inspector and whether it was attached now.
    pub fn attach_host_inspector(
        &mut self,
        listener: &ListenerIdentity,
    ) -> (Arc<HostMessageInspector>, bool) {
        if let Some(existing) = &self.host_inspector {
            return (Arc::clone(existing), false);
        }
        let inspector = Arc::new(HostMessageInspector::new(
            Arc::clone(&self.descriptor),
            listener.clone(),
        ));
        self.host_inspector = Some(Arc::clone(&inspector));
        (inspector, true)
    }

    pub fn host_inspector(&self) -> Option<&Arc<HostMessageInspector>> {
        self.host_inspector.as_ref()
    }

    /// Add an inspector running after the host inspector.
    pub fn add_inspector(&mut self, inspector: Arc<dyn DispatchInspector>) {
        self.inspectors.push(inspector);
    }

    pub fn set_web_http(&mut self, behavior: WebHttpBehavior) {
        self.web_http = Some(behavior);
    }

    pub fn web_http(&self) -> Option<&WebHttpBehavior> {
        self.web_http.as_ref()
    }

    /// Host inspector first, then the others in insertion order.
    fn chain(&self) -> Vec<&dyn DispatchInspector> {
        self.host_inspector
            .iter()
            .map(|i| i.as_ref() as &dyn DispatchInspector)
            .chain(self.inspectors.iter().map(|i| i.as_ref()))
            .collect()
    }
}

impl fmt::Debug for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceEndpoint")
            .field("descriptor", &self.descriptor.to_string())
            .field("host_inspector", &self.host_inspector.is_some())
            .field("inspectors", &self.inspectors.len())
            .field("web_http", &self.web_http)
            .finish()
    }
}

/// Everything needed to build a listener.
pub struct ListenerDescription {
    pub service_type: ServiceType,
    pub singleton: Option<Arc<dyn Service>>,
    pub base_addresses: Vec<ServiceAddress>,
    pub endpoints: Vec<ServiceEndpoint>,
    pub credentials: ServiceCredentials,
    pub debug: ServiceDebugBehavior,
    pub throttling: ServiceThrottling,
    pub metadata: ServiceMetadataBehavior,
    pub serializer: SerializerBehavior,
}

impl ListenerDescription {
    pub fn new(service_type: ServiceType, base_addresses: Vec<ServiceAddress>) -> Self {
        Self {
            service_type,
            singleton: None,
            base_addresses,
            endpoints: Vec::new(),
            credentials: ServiceCredentials::new(),
            debug: ServiceDebugBehavior::default(),
            throttling: ServiceThrottling::default(),
            metadata: ServiceMetadataBehavior::default(),
            serializer: SerializerBehavior::default(),
        }
    }

    pub fn identity(&self) -> ListenerIdentity {
        ListenerIdentity {
            service_type: self.service_type.full_name().to_string(),
            base_address: self
                .base_addresses
                .first()
                .or_else(|| self.endpoints.first().map(|e| e.descriptor.address()))
                .map(ToString::to_string),
        }
    }
}

enum InstanceProvider {
    Single(Arc<dyn Service>),
    PerCall(Activator),
}

impl InstanceProvider {
    fn instance(&self) -> Arc<dyn Service> {
        match self {
            Self::Single(instance) => Arc::clone(instance),
            Self::PerCall(activate) => activate(),
        }
    }
}

/// Blocks callers while `max` calls are in flight.
struct CallGate {
    max: usize,
    active: Mutex<usize>,
    freed: Condvar,
}

struct CallPermit<'a>(&'a CallGate);

impl CallGate {
    fn new(max: usize) -> Self {
        Self {
            max: max.max(1),
            active: Mutex::new(0),
            freed: Condvar::new(),
        }
    }

    fn enter(&self) -> CallPermit<'_> {
        let mut active = self.active.lock();
        while *active >= self.max {
            self.freed.wait(&mut active);
        }
        *active += 1;
        CallPermit(self)
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        *self.0.active.lock() -= 1;
        self.0.freed.notify_one();
    }
}

/// Request routing and invocation, shared by all worker threads.
pub(crate) struct Dispatcher {
    identity: ListenerIdentity,
    instances: InstanceProvider,
    endpoints: Vec<ServiceEndpoint>,
    contracts: Vec<ContractDescription>,
    credentials: ServiceCredentials,
    debug: ServiceDebugBehavior,
    metadata: ServiceMetadataBehavior,
    serializer: SerializerBehavior,
    calls: CallGate,
}

impl Dispatcher {
    /// Handle one request. Returns the reply to send, `None` for one-way.
    pub(crate) fn dispatch(
        &self,
        socket: SocketAddr,
        slots: &[usize],
        mut request: Message,
        credentials: Option<&UserNameToken>,
    ) -> Option<Message> {
        let target = request
            .to
            .as_deref()
            .and_then(|to| ServiceAddress::parse(to).ok());
        let on_path: Vec<&ServiceEndpoint> = slots
            .iter()
            .map(|&i| &self.endpoints[i])
            .filter(|ep| {
                target
                    .as_ref()
                    .map_or(true, |t| t.path() == ep.descriptor.address().path())
            })
            .collect();

        let matched = on_path.iter().find_map(|ep| {
            ep.descriptor
                .contract()
                .find_by_action(&request.action)
                .map(|op| (*ep, op))
        });

        let Some((endpoint, operation)) = matched else {
            return Some(self.builtin(socket, &on_path, &request));
        };

        if let Err(fault) = self
            .credentials
            .authenticate(credentials)
            .and_then(|()| self.serializer.check(&request.body))
        {
            tracing::warn!("{}: rejected {}: {}", self.identity, request.action, fault);
            return (!operation.is_one_way).then(|| Message::fault(FAULT_ACTION, fault));
        }

        let inspectors = endpoint.chain();
        let tokens: Vec<Option<CorrelationToken>> = inspectors
            .iter()
            .map(|inspector| inspector.after_receive_request(&mut request))
            .collect();

        let outcome = self.invoke(operation, &request.body);

        if operation.is_one_way {
            if let Err(fault) = &outcome {
                tracing::warn!(
                    "{}: one-way {} failed: {}",
                    self.identity,
                    operation.name,
                    fault
                );
            }
            for (inspector, token) in inspectors.iter().zip(&tokens).rev() {
                inspector.before_send_reply(None, token.as_ref());
            }
            return None;
        }

        let mut reply = match outcome.and_then(|body| {
            self.serializer.check(&body)?;
            Ok(body)
        }) {
            Ok(body) => {
                let body = match endpoint.web_http() {
                    Some(web) => web.shape_reply(&operation.name, body),
                    None => body,
                };
                Message::new(operation.reply_action.clone(), body)
            }
            Err(fault) => Message::fault(FAULT_ACTION, self.debug.shape(fault)),
        };

        for (inspector, token) in inspectors.iter().zip(&tokens).rev() {
            inspector.before_send_reply(Some(&mut reply), token.as_ref());
        }
        Some(reply)
    }

    fn invoke(
        &self,
        operation: &OperationDescription,
        body: &serde_json::Value,
    ) -> std::result::Result<serde_json::Value, Fault> {
        let _permit = self.calls.enter();
        let instance = self.instances.instance();
        match catch_unwind(AssertUnwindSafe(|| instance.invoke(operation, body))) {
            Ok(result) => result,
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_default();
                tracing::error!(
                    "{}: operation {} panicked: {}",
                    self.identity,
                    operation.name,
                    detail
                );
                Err(Fault::receiver(format!("Operation '{}' panicked", operation.name))
                    .with_detail(detail))
            }
        }
    }

    /// Metadata, help, or an action-not-supported fault.
    fn builtin(&self, socket: SocketAddr, on_path: &[&ServiceEndpoint], request: &Message) -> Message {
        let scheme = on_path
            .first()
            .map(|ep| ep.descriptor.address().scheme().to_string())
            .unwrap_or_default();

        if request.action == METADATA_ACTION && self.metadata.allows(&scheme) {
            return Message::new(
                format!("{}Response", METADATA_ACTION),
                ServiceMetadataBehavior::document(&self.contracts),
            );
        }

        if request.action == HELP_ACTION {
            let help = on_path
                .iter()
                .find(|ep| ep.web_http().is_some_and(|w| w.help_enabled));
            if let Some(ep) = help {
                return Message::new(
                    format!("{}Response", HELP_ACTION),
                    WebHttpBehavior::help_document(ep.descriptor.contract()),
                );
            }
        }

        tracing::debug!(
            "{}: no endpoint on {} accepts {}",
            self.identity,
            socket,
            request.action
        );
        Message::fault(
            FAULT_ACTION,
            Fault::new(
                Fault::ACTION_NOT_SUPPORTED,
                format!(
                    "The message with Action '{}' cannot be processed at the receiver",
                    request.action
                ),
            ),
        )
    }
}

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

struct Runtime {
    shutdown: Arc<AtomicBool>,
    connections: Arc<Connections>,
    sockets: Vec<Arc<SharedSocket>>,
    local_addrs: Vec<SocketAddr>,
}

impl Runtime {
    fn stop_accepting(&mut self, listener: u64) {
        self.shutdown.store(true, Ordering::Release);
        for socket in self.sockets.drain(..) {
            socket.detach(listener);
        }
        self.connections.notify_all();
    }
}

/// A running (or runnable) network listener for one service implementation.
pub struct ListenerHandle {
    id: u64,
    identity: ListenerIdentity,
    service_type: ServiceType,
    base_addresses: Vec<ServiceAddress>,
    credentials: ServiceCredentials,
    throttling: ServiceThrottling,
    close_timeout: Duration,
    dispatcher: Arc<Dispatcher>,
    state: Mutex<CommunicationState>,
    runtime: Mutex<Option<Runtime>>,
}

impl ListenerHandle {
    /// Build a listener in the `Created` state.
    pub fn new(description: ListenerDescription) -> Result<Self> {
        let identity = description.identity();
        let ListenerDescription {
            service_type,
            singleton,
            base_addresses,
            endpoints,
            credentials,
            debug,
            throttling,
            metadata,
            serializer,
        } = description;

        if endpoints.is_empty() {
            return Err(Error::ServiceModel(format!(
                "Service '{}' has zero application endpoints",
                service_type.full_name()
            )));
        }

        let instances = match singleton {
            Some(instance) => InstanceProvider::Single(instance),
            None => {
                let activator = service_type.activator().ok_or_else(|| {
                    Error::ContractResolution(format!(
                        "Service type '{}' cannot be activated",
                        service_type.full_name()
                    ))
                })?;
                match service_type.instance_mode() {
                    InstanceMode::Single => InstanceProvider::Single(activator()),
                    InstanceMode::PerCall => InstanceProvider::PerCall(activator),
                }
            }
        };

        let max_calls = match instances {
            InstanceProvider::PerCall(_) => throttling
                .max_concurrent_calls
                .min(throttling.max_concurrent_instances),
            InstanceProvider::Single(_) => throttling.max_concurrent_calls,
        };

        let close_timeout = endpoints
            .iter()
            .map(|ep| ep.descriptor.binding().close_timeout)
            .max()
            .unwrap_or(crate::binding::DEFAULT_TIMEOUT);

        let mut contracts: Vec<ContractDescription> = Vec::new();
        for ep in &endpoints {
            let contract = ep.descriptor.contract();
            if !contracts.iter().any(|c| c.full_name() == contract.full_name()) {
                contracts.push(contract.clone());
            }
        }

        Ok(Self {
            id: NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed),
            dispatcher: Arc::new(Dispatcher {
                identity: identity.clone(),
                instances,
                endpoints,
                contracts,
                credentials: credentials.clone(),
                debug,
                metadata,
                serializer,
                calls: CallGate::new(max_calls),
            }),
            identity,
            service_type,
            base_addresses,
            credentials,
            throttling,
            close_timeout,
            state: Mutex::new(CommunicationState::Created),
            runtime: Mutex::new(None),
        })
    }

    pub fn identity(&self) -> &ListenerIdentity {
        &self.identity
    }

    pub fn service_type(&self) -> &ServiceType {
        &self.service_type
    }

    pub fn base_addresses(&self) -> &[ServiceAddress] {
        &self.base_addresses
    }

    pub fn credentials(&self) -> &ServiceCredentials {
        &self.credentials
    }

    pub fn endpoints(&self) -> Vec<Arc<EndpointDescriptor>> {
        self.dispatcher
            .endpoints
            .iter()
            .map(|ep| Arc::clone(&ep.descriptor))
            .collect()
    }

    pub fn host_inspectors(&self) -> Vec<Arc<HostMessageInspector>> {
        self.dispatcher
            .endpoints
            .iter()
            .filter_map(|ep| ep.host_inspector.clone())
            .collect()
    }

    pub fn state(&self) -> CommunicationState {
        *self.state.lock()
    }

    /// Bound socket addresses while open.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.runtime
            .lock()
            .as_ref()
            .map(|rt| rt.local_addrs.clone())
            .unwrap_or_default()
    }

    /// Number of connected sessions.
    pub fn session_count(&self) -> usize {
        self.runtime
            .lock()
            .as_ref()
            .map_or(0, |rt| rt.connections.count())
    }

    /// Bind every endpoint socket and start accepting.
    pub fn open(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != CommunicationState::Created {
                return Err(Error::Protocol(format!(
                    "Cannot open listener for {} in state {}",
                    self.identity, *state
                )));
            }
            *state = CommunicationState::Opening;
        }

        match self.start() {
            Ok(runtime) => {
                tracing::info!(
                    "Listening for {} on {:?}",
                    self.identity.service_type,
                    runtime.local_addrs
                );
                *self.runtime.lock() = Some(runtime);
                *self.state.lock() = CommunicationState::Opened;
                Ok(())
            }
            Err(e) => {
                *self.state.lock() = CommunicationState::Faulted;
                Err(e)
            }
        }
    }

    fn start(&self) -> Result<Runtime> {
        let mut groups: BTreeMap<SocketAddr, (Vec<usize>, Vec<String>, RouteSettings)> =
            BTreeMap::new();
        for (i, ep) in self.dispatcher.endpoints.iter().enumerate() {
            let address = ep.descriptor.address();
            let binding = ep.descriptor.binding();
            let (slots, paths, settings) =
                groups.entry(address.socket_addr()?).or_insert_with(|| {
                    (
                        Vec::new(),
                        Vec::new(),
                        RouteSettings {
                            max_message_size: binding.max_received_message_size,
                            receive_timeout: binding.receive_timeout,
                        },
                    )
                });
            slots.push(i);
            if !paths.iter().any(|p| p == address.path()) {
                paths.push(address.path().to_string());
            }
            settings.max_message_size = settings
                .max_message_size
                .max(binding.max_received_message_size);
            settings.receive_timeout = settings.receive_timeout.max(binding.receive_timeout);
        }

        let mut runtime = Runtime {
            shutdown: Arc::new(AtomicBool::new(false)),
            connections: Arc::new(Connections::default()),
            sockets: Vec::with_capacity(groups.len()),
            local_addrs: Vec::with_capacity(groups.len()),
        };

        for (addr, (slots, paths, settings)) in groups {
            let route = Route {
                listener: self.id,
                paths,
                slots,
                settings,
                dispatcher: Arc::clone(&self.dispatcher),
                connections: Arc::clone(&runtime.connections),
                shutdown: Arc::clone(&runtime.shutdown),
                max_sessions: self.throttling.max_concurrent_sessions,
            };
            match SharedSocket::attach(addr, route) {
                Ok(socket) => {
                    runtime.local_addrs.push(socket.local_addr());
                    runtime.sockets.push(socket);
                }
                Err(e) => {
                    runtime.stop_accepting(self.id);
                    return Err(e);
                }
            }
        }
        Ok(runtime)
    }

    /// Stop accepting, let in-flight requests finish, wait for sessions.
    ///
    /// Fails with [`Error::Timeout`] if sessions are still active after
    /// `timeout` (the binding close timeout when `None`); the listener is
    /// then left `Closing` and should be aborted.
    pub fn close(&self, timeout: Option<Duration>) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                CommunicationState::Closed => return Ok(()),
                CommunicationState::Created | CommunicationState::Faulted => {
                    *state = CommunicationState::Closed;
                    return Ok(());
                }
                _ => *state = CommunicationState::Closing,
            }
        }

        let timeout = timeout.unwrap_or(self.close_timeout);
        let mut runtime = self.runtime.lock().take();
        if let Some(rt) = runtime.as_mut() {
            rt.stop_accepting(self.id);
            if !rt.connections.wait_drained(timeout) {
                // Keep the runtime so abort can sever the remaining sessions.
                *self.runtime.lock() = runtime;
                return Err(Error::Timeout(timeout));
            }
        }

        *self.state.lock() = CommunicationState::Closed;
        Ok(())
    }

    /// Stop immediately, severing live sessions.
    pub fn abort(&self) {
        if let Some(mut rt) = self.runtime.lock().take() {
            rt.stop_accepting(self.id);
            rt.connections.sever();
        }
        *self.state.lock() = CommunicationState::Closed;
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("identity", &self.identity)
            .field("state", &self.state())
            .field("endpoints", &self.dispatcher.endpoints)
            .finish()
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(mut rt) = self.runtime.get_mut().take() {
            rt.stop_accepting(self.id);
            rt.connections.sever();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::Binding;
    use crate::contract::service_fn;
    use crate::message::{read_frame, write_frame, Frame};
    use serde_json::json;
    use std::io::Read;
    use std::net::{TcpListener, TcpStream};
    use std::time::Instant;

    fn echo_type() -> ServiceType {
        ServiceType::new("Demo.Echo")
            .implements(
                ContractDescription::new("Demo.IEcho")
                    .operation("Echo")
                    .one_way_operation("Fire"),
            )
            .with_activator(|| service_fn(|_, body| Ok(body.clone())))
    }

    fn description(ty: ServiceType) -> ListenerDescription {
        let base = ServiceAddress::parse("http://127.0.0.1:0/echo").unwrap();
        let ep = EndpointDescriptor::new(
            ty.contracts()[0].clone(),
            Binding::basic_http(),
            base.clone(),
        )
        .unwrap();
        let mut desc = ListenerDescription::new(ty, vec![base]);
        desc.endpoints.push(ServiceEndpoint::new(ep));
        desc
    }

    fn exchange(stream: &mut TcpStream, message: Message) -> Message {
        write_frame(
            stream,
            &Frame::Request {
                message,
                credentials: None,
            },
            1 << 20,
        )
        .unwrap();
        match read_frame(stream, 1 << 20).unwrap() {
            Some(Frame::Reply { message }) => message,
            other => panic!("unexpected {:?}", other),
        }
    }

    fn call(addr: SocketAddr, message: Message) -> Message {
        let mut stream = TcpStream::connect(addr).unwrap();
        exchange(&mut stream, message)
    }

    /// `true` once the peer has dropped the connection.
    fn dropped_by_peer(stream: &mut TcpStream) -> bool {
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut buf = [0u8; 1];
        match stream.read(&mut buf) {
            Ok(0) => true,
            Ok(_) => false,
            Err(e) => !matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            ),
        }
    }

    #[test]
    fn test_open_serve_close() {
        let listener = ListenerHandle::new(description(echo_type())).unwrap();
        assert_eq!(listener.state(), CommunicationState::Created);
        assert_eq!(
            listener.identity().base_address.as_deref(),
            Some("http://127.0.0.1:0/echo")
        );

        listener.open().unwrap();
        assert_eq!(listener.state(), CommunicationState::Opened);
        let addr = listener.local_addrs()[0];
        assert_ne!(addr.port(), 0);

        let reply = call(
            addr,
            Message::new("http://tempuri.org/IEcho/Echo", json!({"a": 1})),
        );
        assert_eq!(reply.action, "http://tempuri.org/IEcho/EchoResponse");
        assert_eq!(reply.body, json!({"a": 1}));

        listener.close(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(listener.state(), CommunicationState::Closed);
        assert!(listener.local_addrs().is_empty());
        assert!(listener.open().is_err());
    }

    #[test]
    fn test_unknown_action_faults() {
        let listener = ListenerHandle::new(description(echo_type())).unwrap();
        listener.open().unwrap();
        let reply = call(listener.local_addrs()[0], Message::new("urn:nope", json!(null)));
        assert_eq!(
            reply.fault.map(|f| f.code),
            Some(Fault::ACTION_NOT_SUPPORTED.to_string())
        );
        listener.abort();
        assert_eq!(listener.state(), CommunicationState::Closed);
    }

    #[test]
    fn test_zero_endpoints_rejected() {
        let desc = ListenerDescription::new(echo_type(), Vec::new());
        assert!(matches!(
            ListenerHandle::new(desc),
            Err(Error::ServiceModel(_))
        ));
    }

    #[test]
    fn test_unactivatable_type_rejected() {
        let ty = ServiceType::new("Demo.NoCtor")
            .implements(ContractDescription::new("Demo.IEcho").operation("Echo"));
        assert!(matches!(
            ListenerHandle::new(description(ty)),
            Err(Error::ContractResolution(_))
        ));
    }

    #[test]
    fn test_bind_conflict_faults() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let ty = echo_type();
        let base = ServiceAddress::parse(&format!("http://127.0.0.1:{}/echo", port)).unwrap();
        let ep = EndpointDescriptor::new(ty.contracts()[0].clone(), Binding::basic_http(), base.clone())
            .unwrap();
        let mut desc = ListenerDescription::new(ty, vec![base]);
        desc.endpoints.push(ServiceEndpoint::new(ep));

        let listener = ListenerHandle::new(desc).unwrap();
        assert!(listener.open().is_err());
        assert_eq!(listener.state(), CommunicationState::Faulted);
        listener.close(None).unwrap();
        assert_eq!(listener.state(), CommunicationState::Closed);
    }

    fn listener_at(name: &str, uri: &str) -> ListenerHandle {
        let reply = name.to_string();
        let ty = ServiceType::new(format!("Demo.{}", name))
            .implements(ContractDescription::new("Demo.IEcho").operation("Echo"))
            .with_activator(move || {
                let reply = reply.clone();
                service_fn(move |_, _| Ok(json!(reply)))
            });
        let base = ServiceAddress::parse(uri).unwrap();
        let ep = EndpointDescriptor::new(ty.contracts()[0].clone(), Binding::basic_http(), base.clone())
            .unwrap();
        let mut desc = ListenerDescription::new(ty, vec![base]);
        desc.endpoints.push(ServiceEndpoint::new(ep));
        ListenerHandle::new(desc).unwrap()
    }

    #[test]
    fn test_listeners_share_port_by_path() {
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let a = listener_at("A", &format!("http://127.0.0.1:{}/a", port));
        let b = listener_at("B", &format!("http://127.0.0.1:{}/b", port));
        let clash = listener_at("C", &format!("http://127.0.0.1:{}/a", port));
        a.open().unwrap();
        b.open().unwrap();
        assert_eq!(a.local_addrs(), b.local_addrs());
        assert!(clash.open().is_err());
        assert_eq!(clash.state(), CommunicationState::Faulted);

        let addr = a.local_addrs()[0];
        let echo = |path: &str| {
            call(
                addr,
                Message::new("http://tempuri.org/IEcho/Echo", json!(null))
                    .with_to(format!("http://127.0.0.1:{}/{}", port, path)),
            )
        };
        assert_eq!(echo("a").body, json!("A"));
        assert_eq!(echo("b").body, json!("B"));
        assert!(echo("nowhere").is_fault());

        // The socket stays bound while one listener still uses it.
        a.close(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(echo("b").body, json!("B"));
        b.close(Some(Duration::from_secs(5))).unwrap();
        assert!(TcpStream::connect(addr).is_err());
    }

    #[test]
    fn test_abort_reaches_silent_connection() {
        let listener = ListenerHandle::new(description(echo_type())).unwrap();
        listener.open().unwrap();
        let mut silent = TcpStream::connect(listener.local_addrs()[0]).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        listener.abort();
        assert!(dropped_by_peer(&mut silent));
        // Well under the ten minute receive timeout of the binding.
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_close_does_not_wait_for_silent_connection() {
        let listener = ListenerHandle::new(description(echo_type())).unwrap();
        listener.open().unwrap();
        let mut silent = TcpStream::connect(listener.local_addrs()[0]).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        listener.close(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(listener.state(), CommunicationState::Closed);
        assert!(dropped_by_peer(&mut silent));
    }

    #[test]
    fn test_session_limit() {
        let mut desc = description(echo_type());
        desc.throttling.max_concurrent_sessions = 1;
        let listener = ListenerHandle::new(desc).unwrap();
        listener.open().unwrap();
        let addr = listener.local_addrs()[0];
        let echo = Message::new("http://tempuri.org/IEcho/Echo", json!(1));

        let mut first = TcpStream::connect(addr).unwrap();
        assert_eq!(exchange(&mut first, echo.clone()).body, json!(1));
        assert_eq!(listener.session_count(), 1);

        let mut second = TcpStream::connect(addr).unwrap();
        write_frame(
            &mut second,
            &Frame::Request {
                message: echo.clone(),
                credentials: None,
            },
            1 << 20,
        )
        .unwrap();
        assert!(dropped_by_peer(&mut second));
        assert_eq!(listener.session_count(), 1);

        drop(first);
        let deadline = Instant::now() + Duration::from_secs(5);
        while listener.session_count() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(listener.session_count(), 0);

        let mut third = TcpStream::connect(addr).unwrap();
        assert_eq!(exchange(&mut third, echo).body, json!(1));
        listener.abort();
    }

    #[test]
    fn test_attach_host_inspector_is_idempotent() {
        let mut desc = description(echo_type());
        let identity = desc.identity();
        let ep = &mut desc.endpoints[0];
        let (first, attached) = ep.attach_host_inspector(&identity);
        assert!(attached);
        let (second, attached) = ep.attach_host_inspector(&identity);
        assert!(!attached);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_call_gate_limits() {
        let gate = Arc::new(CallGate::new(1));
        let permit = gate.enter();
        let g = Arc::clone(&gate);
        let waiter = std::thread::spawn(move || {
            let _p = g.enter();
        });
        std::thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());
        drop(permit);
        waiter.join().unwrap();
    }
}
