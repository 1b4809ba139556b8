//! # Dubbo RPC Framework for Rust
//!
//! Dubbo is a high-performance RPC framework with service discovery and
//! load balancing. This is the Rust implementation of its provider-side
//! export pipeline and caller-side selection.
//!
//! ## Architecture
//!
//! The crate is organized into the following layers:
//!
//! - **Export Layer**: service configuration, validation, local/remote export
//! - **Registry Layer**: registry descriptors, registration fan-out
//! - **Transport Layer**: protocol name to transport dispatch
//! - **Selector Layer**: weighted round-robin and random endpoint selection
//! - **Url Layer**: the descriptor value type shared by all of the above
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dubbo::{ServiceConfig, ProtocolConfig, RegistryConfig};
//!
//! let service = Arc::new(
//!     ServiceConfig::new("demo.Greeter")
//!         .with_ref(Arc::new(GreeterImpl))
//!         .with_protocol(ProtocolConfig::named("dubbo").with_port(20880))
//!         .with_registry(RegistryConfig::address("zookeeper://127.0.0.1:2181")),
//! );
//! service.clone().export()?;
//! ```

pub mod url;
pub mod config;
pub mod address;
pub mod service;
pub mod proxy;
pub mod transport;
pub mod registry;
pub mod extension;
pub mod export;
pub mod selector;

// Re-export commonly used types
pub use self::url::Url;
pub use config::{
    ApplicationConfig, ArgumentConfig, MethodConfig, ModuleConfig, MonitorConfig,
    ProtocolConfig, ProviderConfig, RegistryConfig,
};
pub use service::{GenericService, MethodDescriptor, RpcService, ServiceInterface};
pub use proxy::{DefaultProxyFactory, ProxyFactory};
pub use transport::{Exporter, Invoker, MetadataInvoker, Transport};
pub use registry::{InMemoryRegistry, RegistryClient, RegistryFactory};
pub use extension::ExtensionRegistry;
pub use export::ServiceConfig;
pub use selector::{Random, RoundRobin, Weighted};

/// Error types for the Dubbo framework
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum DubboError {
        #[error("Configuration error: {0}")]
        Config(String),

        #[error("Descriptor parse error: {0}")]
        Parse(String),

        #[error("The service {0} has already been unexported")]
        AlreadyUnexported(String),

        #[error("No transport bound for protocol: {0}")]
        UnknownProtocol(String),

        #[error("Export of {protocol} service to {registry} failed: {reason}")]
        ExportFailed {
            protocol: String,
            registry: String,
            reason: String,
        },

        #[error("Registry error: {0}")]
        Registry(String),

        #[error("No available endpoint")]
        NoEndpoint,
    }

    pub type Result<T> = std::result::Result<T, DubboError>;
}

pub use error::{DubboError, Result};

/// Constants used throughout the framework
pub mod consts {
    /// Framework protocol version carried in every descriptor
    pub const DUBBO_VERSION: &str = "2.7.0";

    /// Protocol names
    pub const DEFAULT_PROTOCOL: &str = "dubbo";
    pub const LOCAL_PROTOCOL: &str = "injvm";
    pub const REGISTRY_PROTOCOL: &str = "registry";

    /// Hosts
    pub const LOCALHOST_VALUE: &str = "127.0.0.1";
    pub const ANYHOST_VALUE: &str = "0.0.0.0";

    /// Default ports
    pub const DEFAULT_PORT: u16 = 20880;
    pub const DEFAULT_REGISTRY_PORT: u16 = 9090;

    /// Registry descriptor path
    pub const REGISTRY_SERVICE_PATH: &str = "RegistryService";

    /// Parameter keys
    pub const SIDE_KEY: &str = "side";
    pub const PROVIDER_SIDE: &str = "provider";
    pub const ANYHOST_KEY: &str = "anyhost";
    pub const BIND_IP_KEY: &str = "bind.ip";
    pub const BIND_PORT_KEY: &str = "bind.port";
    pub const METHODS_KEY: &str = "methods";
    pub const REVISION_KEY: &str = "revision";
    pub const TOKEN_KEY: &str = "token";
    pub const DYNAMIC_KEY: &str = "dynamic";
    pub const MONITOR_KEY: &str = "monitor";
    pub const SCOPE_KEY: &str = "scope";
    pub const EXPORT_KEY: &str = "export";
    pub const GENERIC_KEY: &str = "generic";
    pub const PROXY_KEY: &str = "proxy";
    pub const REGISTER_KEY: &str = "register";
    pub const NOTIFY_KEY: &str = "notify";
    pub const REGISTRY_KEY: &str = "registry";
    pub const WEIGHT_KEY: &str = "weight";
    pub const VERSION_KEY: &str = "version";
    pub const GROUP_KEY: &str = "group";
    pub const PATH_KEY: &str = "path";
    pub const INTERFACE_KEY: &str = "interface";
    pub const TIMESTAMP_KEY: &str = "timestamp";
    pub const PID_KEY: &str = "pid";
    pub const APPLICATION_KEY: &str = "application";

    /// Scope values
    pub const SCOPE_LOCAL: &str = "local";
    pub const SCOPE_REMOTE: &str = "remote";
    pub const SCOPE_NONE: &str = "none";

    /// Wildcard value for `methods` on generic services
    pub const ANY_VALUE: &str = "*";

    /// Prefix for provider-scope defaults in the flat parameter map
    pub const DEFAULT_KEY_PREFIX: &str = "default.";

    /// Registry kind that cannot be probed over TCP
    pub const MULTICAST: &str = "multicast";

    /// Environment variable names; the effective name is optionally
    /// prefixed with `<PROTOCOL>_` (uppercased protocol name)
    pub const DUBBO_IP_TO_BIND: &str = "DUBBO_IP_TO_BIND";
    pub const DUBBO_PORT_TO_BIND: &str = "DUBBO_PORT_TO_BIND";
    pub const DUBBO_IP_TO_REGISTRY: &str = "DUBBO_IP_TO_REGISTRY";
    pub const DUBBO_PORT_TO_REGISTRY: &str = "DUBBO_PORT_TO_REGISTRY";

    /// Default weight an endpoint carries when none is configured
    pub const DEFAULT_WEIGHT: u32 = 100;
}
