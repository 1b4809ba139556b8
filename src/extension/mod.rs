//! # Extension Module
//!
//! The name registry behind every plug-in seam: lowercase protocol name
//! to transport, registry kind to registry factory, protocol name to
//! configurator factory, and the stub manifest used by local/stub
//! validation. Decorators registered here compose around every transport
//! at registration time; lookups never see the raw implementation.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::RwLock;

use crate::consts;
use crate::registry::{RegistryFactory, RegistryTransport};
use crate::service::ServiceInterface;
use crate::transport::{InjvmTransport, ListenerTransport, Transport};
use crate::url::Url;
use crate::{DubboError, Result};

/// A descriptor rewrite hook applied before the scope split.
pub trait Configurator: Send + Sync {
    fn configure(&self, url: Url) -> Url;
}

/// Resolves a descriptor to the configurator that may rewrite it.
pub trait ConfiguratorFactory: Send + Sync {
    fn configurator(&self, url: &Url) -> Arc<dyn Configurator>;
}

type TransportWrapper = Box<dyn Fn(Arc<dyn Transport>) -> Arc<dyn Transport> + Send + Sync>;

/// Global extension registry instance
static GLOBAL_EXTENSIONS: OnceCell<Arc<ExtensionRegistry>> = OnceCell::new();

/// Plug-in lookup for the whole framework.
pub struct ExtensionRegistry {
    transports: RwLock<HashMap<String, Arc<dyn Transport>>>,
    registry_factories: RwLock<HashMap<String, Arc<dyn RegistryFactory>>>,
    configurator_factories: RwLock<HashMap<String, Arc<dyn ConfiguratorFactory>>>,
    stubs: RwLock<HashMap<String, ServiceInterface>>,
    wrappers: RwLock<Vec<TransportWrapper>>,
}

impl ExtensionRegistry {
    /// An empty registry; nothing is bound, not even `injvm`.
    pub fn empty() -> Arc<Self> {
        Arc::new(Self {
            transports: RwLock::new(HashMap::new()),
            registry_factories: RwLock::new(HashMap::new()),
            configurator_factories: RwLock::new(HashMap::new()),
            stubs: RwLock::new(HashMap::new()),
            wrappers: RwLock::new(Vec::new()),
        })
    }

    /// A registry with the built-in manifest: the listener decorator, the
    /// in-process transport and the registry transport (which dispatches
    /// back through this registry).
    pub fn with_defaults() -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            let this = Self {
                transports: RwLock::new(HashMap::new()),
                registry_factories: RwLock::new(HashMap::new()),
                configurator_factories: RwLock::new(HashMap::new()),
                stubs: RwLock::new(HashMap::new()),
                wrappers: RwLock::new(vec![
                    Box::new(ListenerTransport::wrap) as TransportWrapper
                ]),
            };
            this.register_transport(consts::LOCAL_PROTOCOL, Arc::new(InjvmTransport::new()));
            this.register_transport(
                consts::REGISTRY_PROTOCOL,
                Arc::new(RegistryTransport::new(weak.clone())),
            );
            this
        })
    }

    /// The process-wide registry, created with the default manifest on
    /// first use.
    pub fn global() -> Arc<Self> {
        GLOBAL_EXTENSIONS.get_or_init(Self::with_defaults).clone()
    }

    /// Register a transport under a protocol name; the current decorator
    /// chain composes around it immediately.
    pub fn register_transport(&self, name: &str, transport: Arc<dyn Transport>) {
        let wrapped = self
            .wrappers
            .read()
            .iter()
            .fold(transport, |inner, wrap| wrap(inner));
        self.transports.write().insert(name.to_lowercase(), wrapped);
    }

    /// Register a decorator; applies to transports registered afterwards.
    pub fn register_wrapper(&self, wrapper: TransportWrapper) {
        self.wrappers.write().push(wrapper);
    }

    /// Look up the transport bound to a protocol name.
    pub fn transport(&self, name: &str) -> Result<Arc<dyn Transport>> {
        self.transports
            .read()
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| DubboError::UnknownProtocol(name.to_string()))
    }

    pub fn has_transport(&self, name: &str) -> bool {
        self.transports.read().contains_key(&name.to_lowercase())
    }

    pub fn register_registry_factory(&self, kind: &str, factory: Arc<dyn RegistryFactory>) {
        self.registry_factories
            .write()
            .insert(kind.to_lowercase(), factory);
    }

    pub fn registry_factory(&self, kind: &str) -> Result<Arc<dyn RegistryFactory>> {
        self.registry_factories
            .read()
            .get(&kind.to_lowercase())
            .cloned()
            .ok_or_else(|| DubboError::Registry(format!("No registry factory bound for {}", kind)))
    }

    pub fn register_configurator_factory(
        &self,
        protocol: &str,
        factory: Arc<dyn ConfiguratorFactory>,
    ) {
        self.configurator_factories
            .write()
            .insert(protocol.to_lowercase(), factory);
    }

    pub fn configurator_factory(&self, protocol: &str) -> Option<Arc<dyn ConfiguratorFactory>> {
        self.configurator_factories
            .read()
            .get(&protocol.to_lowercase())
            .cloned()
    }

    /// Register a named stub/local implementation shape.
    pub fn register_stub(&self, name: &str, interface: ServiceInterface) {
        self.stubs.write().insert(name.to_string(), interface);
    }

    pub fn stub(&self, name: &str) -> Option<ServiceInterface> {
        self.stubs.read().get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_bind_injvm_and_registry() {
        let extensions = ExtensionRegistry::with_defaults();
        assert!(extensions.has_transport("injvm"));
        assert!(extensions.has_transport("registry"));
        assert!(!extensions.has_transport("dubbo"));
    }

    #[test]
    fn test_unknown_protocol() {
        let extensions = ExtensionRegistry::empty();
        assert!(matches!(
            extensions.transport("dubbo"),
            Err(DubboError::UnknownProtocol(_))
        ));
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let extensions = ExtensionRegistry::with_defaults();
        assert!(extensions.transport("INJVM").is_ok());
    }

    #[test]
    fn test_wrapper_composes_on_registration() {
        use crate::transport::{Exporter, MetadataInvoker};
        use std::sync::atomic::{AtomicUsize, Ordering};

        static SEEN: AtomicUsize = AtomicUsize::new(0);

        struct Counting {
            inner: Arc<dyn Transport>,
        }

        impl Transport for Counting {
            fn default_port(&self) -> u16 {
                self.inner.default_port()
            }
            fn export(&self, invoker: MetadataInvoker) -> Result<Arc<dyn Exporter>> {
                SEEN.fetch_add(1, Ordering::SeqCst);
                self.inner.export(invoker)
            }
        }

        let extensions = ExtensionRegistry::empty();
        extensions.register_wrapper(Box::new(|inner| Arc::new(Counting { inner })));
        extensions.register_transport("injvm", Arc::new(InjvmTransport::new()));

        let transport = extensions.transport("injvm").unwrap();
        assert_eq!(transport.default_port(), 0);

        use crate::service::{MethodDescriptor, RpcService, ServiceInterface};
        use crate::transport::{Invoker, ServiceMetadata};

        struct Echo;
        impl RpcService for Echo {
            fn interface(&self) -> ServiceInterface {
                ServiceInterface::new(
                    "demo.Echo",
                    vec![MethodDescriptor::new("echo", &["String"])],
                )
            }
        }

        let service: Arc<dyn RpcService> = Arc::new(Echo);
        let interface = service.interface();
        transport
            .export(MetadataInvoker {
                invoker: Invoker {
                    service,
                    interface,
                    url: Url::new("injvm", "127.0.0.1", 0, "demo.Echo"),
                },
                metadata: ServiceMetadata {
                    service_key: "demo.Echo".into(),
                    interface: "demo.Echo".into(),
                    generic: false,
                },
            })
            .unwrap();
        assert_eq!(SEEN.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stub_manifest() {
        use crate::service::MethodDescriptor;
        let extensions = ExtensionRegistry::empty();
        let stub = ServiceInterface::new(
            "demo.GreeterStub",
            vec![MethodDescriptor::new("sayHello", &["String"])],
        );
        extensions.register_stub("demo.GreeterStub", stub.clone());
        assert_eq!(extensions.stub("demo.GreeterStub"), Some(stub));
        assert_eq!(extensions.stub("missing"), None);
    }
}
