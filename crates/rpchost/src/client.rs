// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Late-bound client.
//!
//! A [`ServiceClient`] calls operations of one endpoint by name. Every call
//! goes through a [`ClientMessageInspector`], so subscribers see a
//! `SendingRequest`/`ReceivingReply` pair per call, including one-way calls.

use crate::contract::OperationDescription;
use crate::endpoint::EndpointDescriptor;
use crate::error::{Error, Result};
use crate::events::{EventHandlers, MessageEvent};
use crate::inspector::{ClientInspector, ClientMessageInspector, CorrelationToken};
use crate::message::{read_frame, write_frame, Frame, Message, UserNameToken};
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::io;
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;

/// Client for one endpoint. Calls on one client are serialized.
pub struct ServiceClient {
    endpoint: Arc<EndpointDescriptor>,
    inspector: ClientMessageInspector,
    inspectors: Vec<Arc<dyn ClientInspector>>,
    credentials: Option<UserNameToken>,
    stream: Mutex<Option<TcpStream>>,
}

impl ServiceClient {
    /// Client for `endpoint`. The connection is opened on first use.
    pub fn new(endpoint: EndpointDescriptor) -> Self {
        let endpoint = Arc::new(endpoint);
        Self {
            inspector: ClientMessageInspector::new(Arc::clone(&endpoint)),
            endpoint,
            inspectors: Vec::new(),
            credentials: None,
            stream: Mutex::new(None),
        }
    }

    pub fn with_credentials(mut self, user_name: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(UserNameToken {
            user_name: user_name.into(),
            password: password.into(),
        });
        self
    }

    /// Add an inspector running after the built-in one.
    pub fn with_inspector(mut self, inspector: Arc<dyn ClientInspector>) -> Self {
        self.inspectors.push(inspector);
        self
    }

    pub fn endpoint(&self) -> &Arc<EndpointDescriptor> {
        &self.endpoint
    }

    pub fn sending_request(&self) -> &EventHandlers<MessageEvent> {
        self.inspector.sending_request()
    }

    pub fn receiving_reply(&self) -> &EventHandlers<MessageEvent> {
        self.inspector.receiving_reply()
    }

    /// Connect now instead of on first call.
    pub fn connect(&self) -> Result<()> {
        let mut stream = self.stream.lock();
        if stream.is_none() {
            *stream = Some(self.open_stream()?);
        }
        Ok(())
    }

    /// Invoke a two-way operation and return its reply body.
    ///
    /// A fault reply is returned as [`Error::Fault`].
    pub fn call(&self, operation: &str, body: Value) -> Result<Value> {
        let op = self.operation(operation)?;
        if op.is_one_way {
            return Err(Error::argument(
                "operation",
                format!("'{}' is one-way, use send_one_way", operation),
            ));
        }
        let request = Message::new(op.action.clone(), body);
        match self.exchange(request, false)? {
            Some(reply) => match reply.fault {
                Some(fault) => Err(Error::Fault {
                    code: fault.code,
                    reason: fault.reason,
                }),
                None => Ok(reply.body),
            },
            None => Err(Error::Protocol("no reply".into())),
        }
    }

    /// Send a one-way operation. Returns once the request is written.
    pub fn send_one_way(&self, operation: &str, body: Value) -> Result<()> {
        let op = self.operation(operation)?;
        if !op.is_one_way {
            return Err(Error::argument(
                "operation",
                format!("'{}' expects a reply, use call", operation),
            ));
        }
        let request = Message::new(op.action.clone(), body);
        self.exchange(request, true).map(|_| ())
    }

    /// Send a prepared message.
    ///
    /// Waits for a reply unless the contract declares the action one-way.
    /// Actions outside the contract are sent as two-way, since the service
    /// answers them with a fault.
    pub fn send(&self, request: Message) -> Result<Option<Message>> {
        let one_way = self
            .endpoint
            .contract()
            .find_by_action(&request.action)
            .is_some_and(|op| op.is_one_way);
        self.exchange(request, one_way)
    }

    /// Drop the connection.
    pub fn close(&self) {
        if let Some(stream) = self.stream.lock().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn operation(&self, name: &str) -> Result<OperationDescription> {
        self.endpoint
            .contract()
            .find_by_name(name)
            .cloned()
            .ok_or_else(|| {
                Error::argument(
                    "operation",
                    format!(
                        "'{}' is not an operation of {}",
                        name,
                        self.endpoint.contract().full_name()
                    ),
                )
            })
    }

    fn open_stream(&self) -> Result<TcpStream> {
        let binding = self.endpoint.binding();
        let addr = self.endpoint.address().socket_addr()?;
        let stream = TcpStream::connect_timeout(&addr, binding.open_timeout)?;
        stream.set_read_timeout(Some(binding.send_timeout))?;
        stream.set_write_timeout(Some(binding.send_timeout))?;
        let _ = stream.set_nodelay(true);
        tracing::debug!("Connected to {} ({})", self.endpoint.address(), addr);
        Ok(stream)
    }

    fn exchange(&self, mut request: Message, one_way: bool) -> Result<Option<Message>> {
        if request.to.is_none() {
            request.to = Some(self.endpoint.address().to_string());
        }

        let mut tokens: Vec<Option<CorrelationToken>> = Vec::with_capacity(1 + self.inspectors.len());
        tokens.push(self.inspector.before_send_request(&mut request));
        for inspector in &self.inspectors {
            tokens.push(inspector.before_send_request(&mut request));
        }

        let binding = self.endpoint.binding();
        let max = binding.max_received_message_size;
        let mut guard = self.stream.lock();
        if guard.is_none() {
            *guard = Some(self.open_stream()?);
        }
        let Some(stream) = guard.as_mut() else {
            return Err(Error::Protocol("not connected".into()));
        };

        let frame = Frame::Request {
            message: request,
            credentials: self.credentials.clone(),
        };
        if let Err(e) = write_frame(stream, &frame, max) {
            *guard = None;
            return Err(self.timeout_or(e));
        }
        if one_way {
            return Ok(None);
        }

        let mut reply = match read_frame(stream, max) {
            Ok(Some(Frame::Reply { message })) => message,
            Ok(Some(Frame::Request { .. })) => {
                *guard = None;
                return Err(Error::Protocol("unexpected request frame".into()));
            }
            Ok(None) => {
                *guard = None;
                return Err(Error::Protocol("connection closed by peer".into()));
            }
            Err(e) => {
                *guard = None;
                return Err(self.timeout_or(e));
            }
        };
        drop(guard);

        for (inspector, token) in self.inspectors.iter().zip(&tokens[1..]).rev() {
            inspector.after_receive_reply(&mut reply, token.as_ref());
        }
        self.inspector
            .after_receive_reply(&mut reply, tokens[0].as_ref());
        Ok(Some(reply))
    }

    fn timeout_or(&self, e: Error) -> Error {
        match e {
            Error::Io(io)
                if matches!(io.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
            {
                Error::Timeout(self.endpoint.binding().send_timeout)
            }
            other => other,
        }
    }
}

impl fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceClient")
            .field("endpoint", &self.endpoint.to_string())
            .field("connected", &self.stream.lock().is_some())
            .finish()
    }
}

impl Drop for ServiceClient {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::ServiceAddress;
    use crate::binding::Binding;
    use crate::contract::ContractDescription;
    use serde_json::json;
    use std::net::TcpListener;

    fn client_for(port: u16) -> ServiceClient {
        let endpoint = EndpointDescriptor::new(
            ContractDescription::new("Demo.IEcho")
                .operation("Echo")
                .one_way_operation("Fire"),
            Binding::basic_http(),
            ServiceAddress::parse(&format!("http://127.0.0.1:{}/echo", port)).unwrap(),
        )
        .unwrap();
        ServiceClient::new(endpoint)
    }

    #[test]
    fn test_operation_kind_checked() {
        let client = client_for(1);
        assert!(matches!(
            client.call("Missing", json!(null)),
            Err(Error::Argument { name: "operation", .. })
        ));
        assert!(matches!(
            client.call("Fire", json!(null)),
            Err(Error::Argument { .. })
        ));
        assert!(matches!(
            client.send_one_way("Echo", json!(null)),
            Err(Error::Argument { .. })
        ));
    }

    #[test]
    fn test_connection_refused() {
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let client = client_for(port);
        assert!(matches!(client.call("Echo", json!(1)), Err(Error::Io(_))));
    }

    /// Replies to every request with its own body, except one-way `Fire`.
    fn echo_server() -> (u16, std::thread::JoinHandle<usize>) {
        let server = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = server.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = server.accept().unwrap();
            let mut requests = 0;
            while let Ok(Some(Frame::Request { message, .. })) = read_frame(&mut stream, 1 << 16) {
                requests += 1;
                if message.action.ends_with("/Fire") {
                    continue;
                }
                let reply = Message::new(format!("{}Response", message.action), message.body);
                write_frame(&mut stream, &Frame::Reply { message: reply }, 1 << 16).unwrap();
            }
            requests
        });
        (port, handle)
    }

    #[test]
    fn test_send_follows_contract_one_way_flag() {
        let (port, server) = echo_server();
        let client = client_for(port);

        // Two-way action: the reply is read, so the next call gets its own.
        let first = client
            .send(Message::new("http://tempuri.org/IEcho/Echo", json!("first")))
            .unwrap();
        assert_eq!(first.map(|m| m.body), Some(json!("first")));
        assert_eq!(client.call("Echo", json!("second")).unwrap(), json!("second"));

        // One-way action: nothing is waited for.
        let fired = client
            .send(Message::new("http://tempuri.org/IEcho/Fire", json!(null)))
            .unwrap();
        assert!(fired.is_none());
        assert_eq!(client.call("Echo", json!("third")).unwrap(), json!("third"));

        client.close();
        assert_eq!(server.join().unwrap(), 4);
    }

    #[test]
    fn test_raw_reply_and_events() {
        let server = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = server.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = server.accept().unwrap();
            let Some(Frame::Request { message, .. }) = read_frame(&mut stream, 1 << 16).unwrap()
            else {
                panic!("expected request");
            };
            assert_eq!(message.to.as_deref(), Some(format!("http://127.0.0.1:{}/echo", port).as_str()));
            let reply = Message::new("http://tempuri.org/IEcho/EchoResponse", message.body);
            write_frame(&mut stream, &Frame::Reply { message: reply }, 1 << 16).unwrap();
        });

        let client = client_for(port);
        let ids = Arc::new(Mutex::new(Vec::new()));
        let sent = Arc::clone(&ids);
        client
            .sending_request()
            .subscribe(move |e| sent.lock().push(("send", e.message_id)));
        let received = Arc::clone(&ids);
        client
            .receiving_reply()
            .subscribe(move |e| received.lock().push(("recv", e.message_id)));

        assert_eq!(client.call("Echo", json!({"x": 2})).unwrap(), json!({"x": 2}));
        handle.join().unwrap();

        let ids = ids.lock();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0].0, "send");
        assert_eq!(ids[1].0, "recv");
        assert_eq!(ids[0].1, ids[1].1);
    }
}
