//! # Registry Module
//!
//! The registration side of service discovery. A registry appears to the
//! export pipeline as a descriptor of protocol `registry` carrying the
//! real service descriptor percent-encoded under `export=`; the registry
//! transport unwraps it, re-dispatches the export to the transport it
//! names, and announces the advertised descriptor at the registry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::consts;
use crate::extension::ExtensionRegistry;
use crate::transport::{Exporter, MetadataInvoker, Transport};
use crate::url::Url;
use crate::{DubboError, Result};

/// The narrow capability a discovery registry provides to the pipeline.
pub trait RegistryClient: Send + Sync {
    fn register(&self, url: &Url) -> Result<()>;
    fn unregister(&self, url: &Url) -> Result<()>;
}

/// Resolves a registry descriptor to a connected client.
pub trait RegistryFactory: Send + Sync {
    fn connect(&self, registry_url: &Url) -> Result<Arc<dyn RegistryClient>>;
}

/// Registry keeping registrations in process memory. Development and test
/// use; a real discovery service plugs in through [`RegistryFactory`].
#[derive(Default)]
pub struct InMemoryRegistry {
    registered: RwLock<Vec<Url>>,
}

impl InMemoryRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn registered(&self) -> Vec<Url> {
        self.registered.read().clone()
    }

    pub fn registered_count(&self) -> usize {
        self.registered.read().len()
    }
}

impl RegistryClient for InMemoryRegistry {
    fn register(&self, url: &Url) -> Result<()> {
        self.registered.write().push(url.clone());
        info!("Register {} at in-memory registry", url);
        Ok(())
    }

    fn unregister(&self, url: &Url) -> Result<()> {
        self.registered.write().retain(|u| u != url);
        Ok(())
    }
}

/// Factory handing out one shared client regardless of the registry
/// address; pairs with [`InMemoryRegistry`] in tests.
pub struct SharedRegistryFactory {
    client: Arc<dyn RegistryClient>,
}

impl SharedRegistryFactory {
    pub fn new(client: Arc<dyn RegistryClient>) -> Self {
        Self { client }
    }
}

impl RegistryFactory for SharedRegistryFactory {
    fn connect(&self, _registry_url: &Url) -> Result<Arc<dyn RegistryClient>> {
        Ok(Arc::clone(&self.client))
    }
}

/// The transport behind the `registry` protocol name. Its `export`
/// re-dispatches to the transport named by the descriptor embedded under
/// the `export=` parameter, then registers the advertised descriptor.
pub struct RegistryTransport {
    extensions: Weak<ExtensionRegistry>,
}

impl RegistryTransport {
    pub fn new(extensions: Weak<ExtensionRegistry>) -> Self {
        Self { extensions }
    }

    fn extensions(&self) -> Result<Arc<ExtensionRegistry>> {
        self.extensions
            .upgrade()
            .ok_or_else(|| DubboError::Registry("extension registry dropped".into()))
    }
}

impl Transport for RegistryTransport {
    fn default_port(&self) -> u16 {
        consts::DEFAULT_REGISTRY_PORT
    }

    fn export(&self, invoker: MetadataInvoker) -> Result<Arc<dyn Exporter>> {
        let registry_url = invoker.invoker.url.clone();
        let exported = registry_url
            .parameter_decoded(consts::EXPORT_KEY)?
            .ok_or_else(|| {
                DubboError::Config(format!(
                    "registry descriptor {} carries no export parameter",
                    registry_url
                ))
            })?;
        let provider_url = Url::parse(&exported)?;

        let extensions = self.extensions()?;
        let transport = extensions.transport(provider_url.protocol())?;
        let exporter = transport.export(invoker.with_url(provider_url.clone()))?;

        // registration is opt-out via register=false on the provider url
        let registration = if provider_url.parameter_as_bool(consts::REGISTER_KEY, true) {
            let kind = registry_url.parameter_or(consts::REGISTRY_KEY, consts::DEFAULT_PROTOCOL);
            let client = extensions.registry_factory(kind)?.connect(&registry_url)?;
            client.register(&provider_url)?;
            info!(
                "Register service {} to registry {}",
                provider_url.service_key(),
                registry_url.address()
            );
            Some((client, provider_url))
        } else {
            None
        };

        Ok(Arc::new(RegistryExporter {
            exporter,
            registration,
            unexported: AtomicBool::new(false),
        }))
    }
}

struct RegistryExporter {
    exporter: Arc<dyn Exporter>,
    registration: Option<(Arc<dyn RegistryClient>, Url)>,
    unexported: AtomicBool,
}

impl Exporter for RegistryExporter {
    fn url(&self) -> &Url {
        self.exporter.url()
    }

    fn unexport(&self) -> Result<()> {
        if self.unexported.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some((client, url)) = &self.registration {
            if let Err(e) = client.unregister(url) {
                warn!("Failed to unregister {}: {}", url, e);
            }
        }
        self.exporter.unexport()
    }
}
