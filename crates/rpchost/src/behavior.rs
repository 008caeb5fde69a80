// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service and endpoint behaviors applied by the host.

use crate::contract::{ContractDescription, Fault};
use crate::message::UserNameToken;
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;

/// Built-in action answering with the listener's contract descriptions.
pub const METADATA_ACTION: &str = "urn:rpchost:metadata/Get";

/// Built-in action answering with the operation list of a web endpoint.
pub const HELP_ACTION: &str = "urn:rpchost:web/Help";

/// Generic fault reason used when exception details are hidden.
pub const INTERNAL_ERROR_REASON: &str =
    "The server was unable to process the request due to an internal error.";

/// Fault detail exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceDebugBehavior {
    pub include_exception_detail_in_faults: bool,
}

impl ServiceDebugBehavior {
    /// Apply the exposure policy to a fault produced by a service.
    pub fn shape(&self, fault: Fault) -> Fault {
        if self.include_exception_detail_in_faults {
            fault
        } else {
            Fault::new(&fault.code, INTERNAL_ERROR_REASON)
        }
    }
}

impl Default for ServiceDebugBehavior {
    fn default() -> Self {
        Self {
            include_exception_detail_in_faults: false,
        }
    }
}

/// Concurrency limits of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceThrottling {
    pub max_concurrent_calls: usize,
    pub max_concurrent_instances: usize,
    pub max_concurrent_sessions: usize,
}

impl ServiceThrottling {
    pub fn unlimited() -> Self {
        Self {
            max_concurrent_calls: usize::MAX,
            max_concurrent_instances: usize::MAX,
            max_concurrent_sessions: usize::MAX,
        }
    }
}

impl Default for ServiceThrottling {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// Metadata exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServiceMetadataBehavior {
    pub http_get_enabled: bool,
    pub https_get_enabled: bool,
}

impl ServiceMetadataBehavior {
    /// Metadata enabled for `http`, or `http` and `https` for an `https` base.
    pub fn for_scheme(scheme: &str) -> Self {
        match scheme {
            "http" => Self {
                http_get_enabled: true,
                https_get_enabled: false,
            },
            "https" => Self {
                http_get_enabled: true,
                https_get_enabled: true,
            },
            _ => Self::default(),
        }
    }

    pub fn allows(&self, scheme: &str) -> bool {
        match scheme {
            "http" => self.http_get_enabled,
            "https" => self.https_get_enabled,
            _ => false,
        }
    }

    pub fn document(contracts: &[ContractDescription]) -> Value {
        json!({ "contracts": contracts })
    }
}

/// Limits on request and reply bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerializerBehavior {
    /// Maximum number of JSON nodes in one body.
    pub max_items_in_object_graph: usize,
    /// Maximum nesting depth of one body.
    pub max_depth: usize,
}

impl SerializerBehavior {
    pub fn check(&self, body: &Value) -> Result<(), Fault> {
        let (items, depth) = measure(body);
        if items > self.max_items_in_object_graph {
            return Err(Fault::new(
                Fault::QUOTA_EXCEEDED,
                format!(
                    "Object graph has {} items, maximum is {}",
                    items, self.max_items_in_object_graph
                ),
            ));
        }
        if depth > self.max_depth {
            return Err(Fault::new(
                Fault::QUOTA_EXCEEDED,
                format!("Object graph depth {} exceeds {}", depth, self.max_depth),
            ));
        }
        Ok(())
    }
}

impl Default for SerializerBehavior {
    fn default() -> Self {
        Self {
            max_items_in_object_graph: usize::MAX,
            max_depth: 128,
        }
    }
}

fn measure(value: &Value) -> (usize, usize) {
    match value {
        Value::Array(items) => items.iter().fold((1, 1), |(n, d), v| {
            let (vn, vd) = measure(v);
            (n.saturating_add(vn), d.max(vd + 1))
        }),
        Value::Object(map) => map.values().fold((1, 1), |(n, d), v| {
            let (vn, vd) = measure(v);
            (n.saturating_add(vn), d.max(vd + 1))
        }),
        _ => (1, 1),
    }
}

/// Reply body layout of web endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyStyle {
    #[default]
    Bare,
    /// `{"<Operation>Result": body}`.
    Wrapped,
}

/// Behavior added to endpoints using a web binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WebHttpBehavior {
    pub default_body_style: BodyStyle,
    pub help_enabled: bool,
}

impl WebHttpBehavior {
    pub fn shape_reply(&self, operation: &str, body: Value) -> Value {
        match self.default_body_style {
            BodyStyle::Bare => body,
            BodyStyle::Wrapped => {
                let mut wrapped = Map::new();
                wrapped.insert(format!("{}Result", operation), body);
                Value::Object(wrapped)
            }
        }
    }

    pub fn help_document(contract: &ContractDescription) -> Value {
        let operations: Vec<Value> = contract
            .operations()
            .iter()
            .map(|op| json!({ "name": op.name, "action": op.action, "one_way": op.is_one_way }))
            .collect();
        json!({ "contract": contract.full_name(), "operations": operations })
    }
}

/// Validates user-name credentials.
pub type UserNameValidator = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// Credentials required from callers.
#[derive(Clone, Default)]
pub struct ServiceCredentials {
    user_name_validator: Option<UserNameValidator>,
}

impl ServiceCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_user_name_validator<F>(&mut self, validator: F)
    where
        F: Fn(&str, &str) -> bool + Send + Sync + 'static,
    {
        self.user_name_validator = Some(Arc::new(validator));
    }

    pub fn requires_user_name(&self) -> bool {
        self.user_name_validator.is_some()
    }

    /// Accept or reject the token carried by a request.
    pub fn authenticate(&self, token: Option<&UserNameToken>) -> Result<(), Fault> {
        let Some(validator) = &self.user_name_validator else {
            return Ok(());
        };
        match token {
            Some(t) if validator(&t.user_name, &t.password) => Ok(()),
            Some(t) => Err(Fault::new(
                Fault::ACCESS_DENIED,
                format!("User '{}' rejected", t.user_name),
            )),
            None => Err(Fault::new(Fault::ACCESS_DENIED, "Credentials required")),
        }
    }
}

impl fmt::Debug for ServiceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceCredentials")
            .field("user_name", &self.requires_user_name())
            .finish()
    }
}

impl fmt::Display for ServiceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.requires_user_name() {
            f.write_str("UserName")
        } else {
            f.write_str("None")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_shapes_faults() {
        let fault = Fault::receiver("db down").with_detail("stack");
        let exposed = ServiceDebugBehavior {
            include_exception_detail_in_faults: true,
        };
        assert_eq!(exposed.shape(fault.clone()), fault);

        let hidden = ServiceDebugBehavior::default().shape(fault);
        assert_eq!(hidden.code, Fault::RECEIVER);
        assert_eq!(hidden.reason, INTERNAL_ERROR_REASON);
        assert!(hidden.detail.is_none());
    }

    #[test]
    fn test_metadata_for_scheme() {
        let http = ServiceMetadataBehavior::for_scheme("http");
        assert!(http.allows("http"));
        assert!(!http.allows("https"));

        let https = ServiceMetadataBehavior::for_scheme("https");
        assert!(https.http_get_enabled && https.https_get_enabled);

        assert!(!ServiceMetadataBehavior::for_scheme("net.tcp").allows("net.tcp"));
    }

    #[test]
    fn test_serializer_limits() {
        let body = json!({"a": [1, 2, 3], "b": {"c": {"d": 1}}});
        assert!(SerializerBehavior::default().check(&body).is_ok());

        let tight = SerializerBehavior {
            max_items_in_object_graph: 4,
            ..Default::default()
        };
        assert_eq!(tight.check(&body).unwrap_err().code, Fault::QUOTA_EXCEEDED);

        let shallow = SerializerBehavior {
            max_depth: 3,
            ..Default::default()
        };
        assert!(shallow.check(&body).is_err());
        assert!(shallow.check(&json!({"a": [1]})).is_ok());
    }

    #[test]
    fn test_web_body_style() {
        let bare = WebHttpBehavior::default();
        assert_eq!(bare.shape_reply("Add", json!(3)), json!(3));

        let wrapped = WebHttpBehavior {
            default_body_style: BodyStyle::Wrapped,
            help_enabled: false,
        };
        assert_eq!(wrapped.shape_reply("Add", json!(3)), json!({"AddResult": 3}));
    }

    #[test]
    fn test_credentials() {
        let open = ServiceCredentials::new();
        assert!(open.authenticate(None).is_ok());
        assert_eq!(open.to_string(), "None");

        let mut creds = ServiceCredentials::new();
        creds.set_user_name_validator(|u, p| u == "admin" && p == "secret");
        let good = UserNameToken {
            user_name: "admin".into(),
            password: "secret".into(),
        };
        let bad = UserNameToken {
            user_name: "admin".into(),
            password: "nope".into(),
        };
        assert!(creds.authenticate(Some(&good)).is_ok());
        assert_eq!(
            creds.authenticate(Some(&bad)).unwrap_err().code,
            Fault::ACCESS_DENIED
        );
        assert!(creds.authenticate(None).is_err());
        assert_eq!(creds.to_string(), "UserName");
    }
}
