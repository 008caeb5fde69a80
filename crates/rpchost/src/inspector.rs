// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message inspectors.
//!
//! Inspectors see every request and reply crossing an endpoint. The host
//! attaches a [`HostMessageInspector`] to each endpoint it builds; clients
//! drive a [`ClientMessageInspector`]. Both stamp a correlation id on the
//! exchange, classify it as one-way or request/reply, and raise events.
//!
//! Extra inspectors can be plugged in through the [`DispatchInspector`] and
//! [`ClientInspector`] traits. Correlation tokens are opaque to the pipeline:
//! whatever an inspector returns before the call is handed back to the same
//! inspector after it.

use crate::endpoint::EndpointDescriptor;
use crate::events::{EventHandlers, ListenerIdentity, MessageEvent};
use crate::message::Message;
use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Opaque per-call state returned by an inspector.
pub type CorrelationToken = Box<dyn Any + Send>;

/// State linking a dispatched request to its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationState {
    pub message_id: Uuid,
    pub is_one_way: bool,
}

/// Listener-side interception point.
pub trait DispatchInspector: Send + Sync {
    fn after_receive_request(&self, request: &mut Message) -> Option<CorrelationToken>;

    /// `reply` is `None` for one-way operations.
    fn before_send_reply(&self, reply: Option<&mut Message>, correlation: Option<&CorrelationToken>);
}

/// Client-side interception point.
pub trait ClientInspector: Send + Sync {
    fn before_send_request(&self, request: &mut Message) -> Option<CorrelationToken>;

    fn after_receive_reply(&self, reply: &mut Message, correlation: Option<&CorrelationToken>);
}

fn one_way_actions(endpoint: &EndpointDescriptor) -> HashSet<String> {
    endpoint.contract().one_way_actions()
}

/// Inspector the host attaches to each endpoint.
#[derive(Debug)]
pub struct HostMessageInspector {
    endpoint: Arc<EndpointDescriptor>,
    listener: ListenerIdentity,
    one_way_actions: HashSet<String>,
    receiving_request: EventHandlers<MessageEvent>,
    sending_reply: EventHandlers<MessageEvent>,
}

impl HostMessageInspector {
    pub fn new(endpoint: Arc<EndpointDescriptor>, listener: ListenerIdentity) -> Self {
        Self {
            one_way_actions: one_way_actions(&endpoint),
            endpoint,
            listener,
            receiving_request: EventHandlers::new(),
            sending_reply: EventHandlers::new(),
        }
    }

    pub fn endpoint(&self) -> &Arc<EndpointDescriptor> {
        &self.endpoint
    }

    pub fn receiving_request(&self) -> &EventHandlers<MessageEvent> {
        &self.receiving_request
    }

    pub fn sending_reply(&self) -> &EventHandlers<MessageEvent> {
        &self.sending_reply
    }

    /// Stamp an inbound request and raise `ReceivingRequest`.
    pub fn on_receive(&self, request: Option<&Message>) -> CorrelationState {
        let state = CorrelationState {
            message_id: Uuid::new_v4(),
            is_one_way: request.is_some_and(|r| self.one_way_actions.contains(&r.action)),
        };
        if let Some(r) = request {
            tracing::trace!("{} <- {}", self.endpoint.address(), r);
        }
        self.receiving_request.raise_guarded(
            &MessageEvent {
                message: request.cloned(),
                message_id: state.message_id,
                is_one_way: state.is_one_way,
                endpoint: Arc::clone(&self.endpoint),
                listener: Some(self.listener.clone()),
            },
            "ReceivingRequest",
        );
        state
    }

    /// Raise `SendingReply` for the exchange started by [`on_receive`](Self::on_receive).
    ///
    /// A missing or foreign `state` yields a nil id; a missing reply marks
    /// the exchange one-way.
    pub fn on_before_reply(&self, reply: Option<&Message>, state: Option<&(dyn Any + Send)>) {
        let state = state.and_then(|s| s.downcast_ref::<CorrelationState>());
        let message_id = state.map_or(Uuid::nil(), |s| s.message_id);
        let is_one_way = reply.is_none() || state.is_some_and(|s| s.is_one_way);
        if let Some(r) = reply {
            tracing::trace!("{} -> {}", self.endpoint.address(), r);
        }
        self.sending_reply.raise_guarded(
            &MessageEvent {
                message: reply.cloned(),
                message_id,
                is_one_way,
                endpoint: Arc::clone(&self.endpoint),
                listener: Some(self.listener.clone()),
            },
            "SendingReply",
        );
    }
}

impl DispatchInspector for HostMessageInspector {
    fn after_receive_request(&self, request: &mut Message) -> Option<CorrelationToken> {
        Some(Box::new(self.on_receive(Some(&*request))))
    }

    fn before_send_reply(&self, reply: Option<&mut Message>, correlation: Option<&CorrelationToken>) {
        self.on_before_reply(reply.as_deref(), correlation.map(|c| &**c));
    }
}

/// Inspector driven by a client for each call.
#[derive(Debug)]
pub struct ClientMessageInspector {
    endpoint: Arc<EndpointDescriptor>,
    one_way_actions: HashSet<String>,
    sending_request: EventHandlers<MessageEvent>,
    receiving_reply: EventHandlers<MessageEvent>,
}

impl ClientMessageInspector {
    pub fn new(endpoint: Arc<EndpointDescriptor>) -> Self {
        Self {
            one_way_actions: one_way_actions(&endpoint),
            endpoint,
            sending_request: EventHandlers::new(),
            receiving_reply: EventHandlers::new(),
        }
    }

    pub fn sending_request(&self) -> &EventHandlers<MessageEvent> {
        &self.sending_request
    }

    pub fn receiving_reply(&self) -> &EventHandlers<MessageEvent> {
        &self.receiving_reply
    }

    fn event(&self, message: &Message, message_id: Uuid, is_one_way: bool) -> MessageEvent {
        MessageEvent {
            message: Some(message.clone()),
            message_id,
            is_one_way,
            endpoint: Arc::clone(&self.endpoint),
            listener: None,
        }
    }

    /// Stamp an outbound request and raise `SendingRequest`.
    ///
    /// One-way requests never get a reply, so `ReceivingReply` is raised
    /// right away with the request itself.
    pub fn on_before_send(&self, request: &Message) -> Uuid {
        let message_id = Uuid::new_v4();
        let is_one_way = self.one_way_actions.contains(&request.action);

        self.sending_request
            .raise_guarded(&self.event(request, message_id, is_one_way), "SendingRequest");
        if is_one_way {
            self.receiving_reply
                .raise_guarded(&self.event(request, message_id, true), "ReceivingReply");
        }
        message_id
    }

    /// Raise `ReceivingReply` for a real reply.
    pub fn on_after_receive_reply(&self, reply: &Message, state: Option<&(dyn Any + Send)>) {
        let message_id = state
            .and_then(|s| s.downcast_ref::<Uuid>())
            .copied()
            .unwrap_or_else(Uuid::nil);
        self.receiving_reply
            .raise_guarded(&self.event(reply, message_id, false), "ReceivingReply");
    }
}

impl ClientInspector for ClientMessageInspector {
    fn before_send_request(&self, request: &mut Message) -> Option<CorrelationToken> {
        Some(Box::new(self.on_before_send(request)))
    }

    fn after_receive_reply(&self, reply: &mut Message, correlation: Option<&CorrelationToken>) {
        self.on_after_receive_reply(reply, correlation.map(|c| &**c));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::ServiceAddress;
    use crate::binding::Binding;
    use crate::contract::ContractDescription;
    use parking_lot::Mutex;
    use serde_json::json;

    fn endpoint() -> Arc<EndpointDescriptor> {
        let contract = ContractDescription::new("Demo.ILog")
            .operation("Read")
            .one_way_operation("Write");
        Arc::new(
            EndpointDescriptor::new(
                contract,
                Binding::basic_http(),
                ServiceAddress::parse("http://localhost:9000/log").unwrap(),
            )
            .unwrap(),
        )
    }

    fn listener() -> ListenerIdentity {
        ListenerIdentity {
            service_type: "Demo.Log".into(),
            base_address: Some("http://localhost:9000/log".into()),
        }
    }

    fn recorder(handlers: &EventHandlers<MessageEvent>) -> Arc<Mutex<Vec<MessageEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        handlers.subscribe(move |e: &MessageEvent| s.lock().push(e.clone()));
        seen
    }

    #[test]
    fn test_dispatch_two_way_pairs_ids() {
        let inspector = HostMessageInspector::new(endpoint(), listener());
        let received = recorder(inspector.receiving_request());
        let replied = recorder(inspector.sending_reply());

        let mut request = Message::new("http://tempuri.org/ILog/Read", json!(null));
        let token = inspector.after_receive_request(&mut request);
        let mut reply = Message::new("http://tempuri.org/ILog/ReadResponse", json!([]));
        inspector.before_send_reply(Some(&mut reply), token.as_ref());

        let received = received.lock();
        let replied = replied.lock();
        assert_eq!(received.len(), 1);
        assert!(!received[0].is_one_way);
        assert!(!received[0].message_id.is_nil());
        assert_eq!(received[0].listener, Some(listener()));
        assert_eq!(replied[0].message_id, received[0].message_id);
        assert!(!replied[0].is_one_way);
    }

    #[test]
    fn test_dispatch_one_way_classification() {
        let inspector = HostMessageInspector::new(endpoint(), listener());
        let request = Message::new("http://tempuri.org/ILog/Write", json!("line"));
        let state = inspector.on_receive(Some(&request));
        assert!(state.is_one_way);

        let replied = recorder(inspector.sending_reply());
        inspector.on_before_reply(None, Some(&state));
        let replied = replied.lock();
        assert!(replied[0].is_one_way);
        assert!(replied[0].message.is_none());
        assert_eq!(replied[0].message_id, state.message_id);
    }

    #[test]
    fn test_missing_or_foreign_state_yields_nil() {
        let inspector = HostMessageInspector::new(endpoint(), listener());
        let replied = recorder(inspector.sending_reply());
        let reply = Message::new("urn:r", json!(1));

        inspector.on_before_reply(Some(&reply), None);
        inspector.on_before_reply(Some(&reply), Some(&"not a state"));

        let replied = replied.lock();
        assert_eq!(replied.len(), 2);
        assert!(replied.iter().all(|e| e.message_id.is_nil()));
        assert!(replied.iter().all(|e| !e.is_one_way));
    }

    #[test]
    fn test_absent_request_is_two_way() {
        let inspector = HostMessageInspector::new(endpoint(), listener());
        assert!(!inspector.on_receive(None).is_one_way);
    }

    #[test]
    fn test_client_one_way_synthesizes_reply() {
        let inspector = ClientMessageInspector::new(endpoint());
        let sent = recorder(inspector.sending_request());
        let replies = recorder(inspector.receiving_reply());

        let mut request = Message::new("http://tempuri.org/ILog/Write", json!("x"));
        let token = inspector.before_send_request(&mut request);
        assert!(token.is_some());

        let sent = sent.lock();
        let replies = replies.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(replies.len(), 1);
        assert!(replies[0].is_one_way);
        assert_eq!(replies[0].message_id, sent[0].message_id);
        assert_eq!(replies[0].message.as_ref(), Some(&request));
    }

    #[test]
    fn test_client_two_way_matches_ids() {
        let inspector = ClientMessageInspector::new(endpoint());
        let sent = recorder(inspector.sending_request());
        let replies = recorder(inspector.receiving_reply());

        let mut request = Message::new("http://tempuri.org/ILog/Read", json!(null));
        let token = inspector.before_send_request(&mut request);
        assert_eq!(replies.lock().len(), 0);

        let mut reply = Message::new("http://tempuri.org/ILog/ReadResponse", json!([1]));
        inspector.after_receive_reply(&mut reply, token.as_ref());

        let sent = sent.lock();
        let replies = replies.lock();
        assert_eq!(replies.len(), 1);
        assert!(!replies[0].is_one_way);
        assert_eq!(replies[0].message_id, sent[0].message_id);
    }

    #[test]
    fn test_client_foreign_state_yields_nil() {
        let inspector = ClientMessageInspector::new(endpoint());
        let replies = recorder(inspector.receiving_reply());
        inspector.on_after_receive_reply(&Message::new("urn:r", json!(1)), Some(&42u8));
        assert!(replies.lock()[0].message_id.is_nil());
    }
}
