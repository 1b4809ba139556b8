//! # Config Module
//!
//! The declarative configuration scopes an export draws from. Scope
//! precedence, lowest first: application, module, provider, service,
//! method; a scope object is immutable for the duration of one export.

pub mod resolver;

pub use resolver::{resolve_parameters, ParameterMap, ScopeSet};

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Application-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Application version
    pub version: Option<String>,
    /// Owner contact
    pub owner: Option<String>,
    /// Owning organization
    pub organization: Option<String>,
    /// Deployment environment (develop/test/product)
    pub environment: Option<String>,
    /// Registries every service of this application may use
    pub registries: Vec<RegistryConfig>,
    /// Monitor endpoint configuration
    pub monitor: Option<MonitorConfig>,
    /// Free-form parameters
    pub parameters: HashMap<String, String>,
}

impl ApplicationConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub(crate) fn append_parameters(&self, map: &mut ParameterMap) {
        if !self.name.is_empty() {
            map.insert("application".into(), self.name.clone());
        }
        put(map, "", "application.version", self.version.as_deref());
        put(map, "", "owner", self.owner.as_deref());
        put(map, "", "organization", self.organization.as_deref());
        put(map, "", "environment", self.environment.as_deref());
        put_all(map, "", &self.parameters);
    }
}

/// Module-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    /// Module name
    pub name: String,
    /// Module version
    pub version: Option<String>,
    /// Owner contact
    pub owner: Option<String>,
    /// Registries the module's services may use
    pub registries: Vec<RegistryConfig>,
    /// Monitor endpoint configuration
    pub monitor: Option<MonitorConfig>,
    /// Free-form parameters
    pub parameters: HashMap<String, String>,
}

impl ModuleConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub(crate) fn append_parameters(&self, map: &mut ParameterMap) {
        if !self.name.is_empty() {
            map.insert("module".into(), self.name.clone());
        }
        put(map, "", "module.version", self.version.as_deref());
        put(map, "", "owner", self.owner.as_deref());
        put_all(map, "", &self.parameters);
    }
}

/// Provider-level defaults, inherited by every service that does not set
/// the attribute itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Host to bind, overriding interface discovery
    pub host: Option<String>,
    /// Port to bind when the protocol config leaves it unset
    pub port: Option<u16>,
    /// Context path prefixed to the service path
    pub contextpath: Option<String>,
    /// Whether services export at all
    pub export: Option<bool>,
    /// Export delay in milliseconds
    pub delay: Option<u64>,
    /// Invocation timeout in milliseconds
    pub timeout: Option<u64>,
    /// Retry count
    pub retries: Option<u32>,
    /// Load balancing strategy name
    pub loadbalance: Option<String>,
    /// Provider weight
    pub weight: Option<u32>,
    /// Whether registrations are dynamic
    pub dynamic: Option<bool>,
    /// Registries provider services may use
    pub registries: Vec<RegistryConfig>,
    /// Monitor endpoint configuration
    pub monitor: Option<MonitorConfig>,
    /// Protocols provider services export over
    pub protocols: Vec<ProtocolConfig>,
    /// Free-form parameters
    pub parameters: HashMap<String, String>,
}

impl ProviderConfig {
    pub(crate) fn append_parameters(&self, map: &mut ParameterMap, prefix: &str) {
        put(map, prefix, "timeout", self.timeout.map(|v| v.to_string()).as_deref());
        put(map, prefix, "retries", self.retries.map(|v| v.to_string()).as_deref());
        put(map, prefix, "loadbalance", self.loadbalance.as_deref());
        put(map, prefix, "weight", self.weight.map(|v| v.to_string()).as_deref());
        put(map, prefix, "dynamic", self.dynamic.map(|v| v.to_string()).as_deref());
        put_all(map, prefix, &self.parameters);
    }
}

fn default_register() -> bool {
    true
}

/// Per-protocol export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Protocol short name; empty means the framework default
    pub name: String,
    /// Host to bind for this protocol
    pub host: Option<String>,
    /// Port to bind; unset or 0 falls back to the transport default
    pub port: Option<u16>,
    /// Context path prefixed to the service path
    pub contextpath: Option<String>,
    /// Server implementation hint
    pub server: Option<String>,
    /// Serialization hint
    pub serialization: Option<String>,
    /// Worker threads
    pub threads: Option<u32>,
    /// Max payload bytes
    pub payload: Option<u32>,
    /// Whether exports over this protocol register at discovery registries
    #[serde(default = "default_register")]
    pub register: bool,
    /// Free-form parameters
    pub parameters: HashMap<String, String>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            host: None,
            port: None,
            contextpath: None,
            server: None,
            serialization: None,
            threads: None,
            payload: None,
            register: default_register(),
            parameters: HashMap::new(),
        }
    }
}

impl ProtocolConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub(crate) fn append_parameters(&self, map: &mut ParameterMap) {
        put(map, "", "server", self.server.as_deref());
        put(map, "", "serialization", self.serialization.as_deref());
        put(map, "", "threads", self.threads.map(|v| v.to_string()).as_deref());
        put(map, "", "payload", self.payload.map(|v| v.to_string()).as_deref());
        put_all(map, "", &self.parameters);
    }
}

/// A discovery registry to announce exports at
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Registry address, e.g. `zookeeper://127.0.0.1:2181`; `N/A` disables
    pub address: String,
    /// Login username
    pub username: Option<String>,
    /// Login password
    pub password: Option<String>,
    /// Whether registrations made here are dynamic (auto-removed on exit)
    pub dynamic: Option<bool>,
    /// Whether providers register at this registry at all
    pub register: Option<bool>,
    /// Session timeout in milliseconds
    pub timeout: Option<u64>,
    /// Free-form parameters
    pub parameters: HashMap<String, String>,
}

impl RegistryConfig {
    pub fn address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    pub(crate) fn append_parameters(&self, map: &mut ParameterMap) {
        put(map, "", "username", self.username.as_deref());
        put(map, "", "password", self.password.as_deref());
        put(map, "", "dynamic", self.dynamic.map(|v| v.to_string()).as_deref());
        put(map, "", "timeout", self.timeout.map(|v| v.to_string()).as_deref());
        put_all(map, "", &self.parameters);
    }
}

/// Monitor endpoint configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Monitor address, e.g. `dubbo://127.0.0.1:7070`
    pub address: Option<String>,
    /// Free-form parameters
    pub parameters: HashMap<String, String>,
}

impl MonitorConfig {
    pub fn address(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Self::default()
        }
    }
}

/// Per-method overrides for a service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodConfig {
    /// Method name; must exist on the service interface
    pub name: String,
    /// Invocation timeout in milliseconds
    pub timeout: Option<u64>,
    /// Retry count
    pub retries: Option<u32>,
    /// Legacy switch: `retry = false` rewrites to `retries = 0`
    pub retry: Option<bool>,
    /// Load balancing strategy name
    pub loadbalance: Option<String>,
    /// Per-argument overrides
    pub arguments: Vec<ArgumentConfig>,
    /// Free-form parameters
    pub parameters: HashMap<String, String>,
}

impl MethodConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub(crate) fn append_parameters(&self, map: &mut ParameterMap, prefix: &str) {
        put(map, prefix, "timeout", self.timeout.map(|v| v.to_string()).as_deref());
        put(map, prefix, "retries", self.retries.map(|v| v.to_string()).as_deref());
        put(map, prefix, "retry", self.retry.map(|v| v.to_string()).as_deref());
        put(map, prefix, "loadbalance", self.loadbalance.as_deref());
        put_all(map, prefix, &self.parameters);
    }
}

/// Per-argument overrides inside a method config. The argument is located
/// either by `index`, by `type`, or both (which must agree).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArgumentConfig {
    /// Zero-based argument index
    pub index: Option<usize>,
    /// Argument type name, matched against the interface signature
    #[serde(rename = "type")]
    pub r#type: Option<String>,
    /// Whether the argument is a callback reference
    pub callback: Option<bool>,
    /// Free-form parameters
    pub parameters: HashMap<String, String>,
}

impl ArgumentConfig {
    pub(crate) fn append_parameters(&self, map: &mut ParameterMap, prefix: &str) {
        put(map, prefix, "callback", self.callback.map(|v| v.to_string()).as_deref());
        put_all(map, prefix, &self.parameters);
    }
}

/// Insert `prefix.key = value` when the value is present and non-empty.
fn put(map: &mut ParameterMap, prefix: &str, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        if !value.is_empty() {
            map.insert(prefixed(prefix, key), value.to_string());
        }
    }
}

fn put_all(map: &mut ParameterMap, prefix: &str, parameters: &HashMap<String, String>) {
    for (key, value) in parameters {
        if !value.is_empty() {
            map.insert(prefixed(prefix, key), value.clone());
        }
    }
}

pub(crate) fn prefixed(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}{}{}", prefix, if prefix.ends_with('.') { "" } else { "." }, key)
    }
}
