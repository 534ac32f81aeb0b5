// Configuration for the execution context and for endpoints.
//
// Both structs have a `Default` and deserialize from JSON, with every field
// optional in the JSON (missing fields take the default). Applications
// typically keep one `HubConfig` file listing the context settings and the
// endpoints to create at startup; tests construct the structs directly.

use ipcbus_protocol::types::Role;
use serde::{Deserialize, Serialize};

/// Settings for `ExecutionContext::start`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Name given to the context's OS thread (shows up in debuggers and
    /// `tracing` output).
    pub thread_name: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            thread_name: "ipcbus-context".into(),
        }
    }
}

/// Settings for a single `Endpoint`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Endpoint name; also the default service name.
    pub name: String,
    /// Name registered with the name server, when it differs from `name`.
    pub ns_name: Option<String>,
    pub role: Role,
    /// Destroy the endpoint once its last session detaches.
    pub auto_remove: bool,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            name: "ipcbus-endpoint".into(),
            ns_name: None,
            role: Role::Client,
            auto_remove: false,
        }
    }
}

impl EndpointConfig {
    pub fn new(name: impl Into<String>, role: Role) -> Self {
        Self {
            name: name.into(),
            role,
            ..Self::default()
        }
    }
}

/// Top-level config file: one context plus the endpoints to create.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub context: ContextConfig,
    pub endpoints: Vec<EndpointConfig>,
}

impl HubConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
