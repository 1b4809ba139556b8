//! # Transport Module
//!
//! The capability a transport must provide to the export pipeline: bind
//! and serve an invoker, and optionally carry a default port. Concrete
//! network transports plug in through the extension registry; this module
//! ships the in-process (`injvm`) transport and the logging decorator
//! applied around every registered transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::service::{RpcService, ServiceInterface};
use crate::url::Url;
use crate::Result;

/// The bridge between a service reference and a transport: something
/// that, given a call, produces a result. The export pipeline only moves
/// it around.
#[derive(Clone)]
pub struct Invoker {
    /// The user reference being exported
    pub service: Arc<dyn RpcService>,
    /// The interface the reference satisfies
    pub interface: ServiceInterface,
    /// The descriptor this invoker was created against
    pub url: Url,
}

impl Invoker {
    /// The same invoker re-targeted at another descriptor; used by the
    /// registry transport when unwrapping an embedded `export=` value.
    pub fn with_url(&self, url: Url) -> Self {
        Self {
            service: Arc::clone(&self.service),
            interface: self.interface.clone(),
            url,
        }
    }
}

/// Snapshot of the service configuration taken at export time.
#[derive(Debug, Clone)]
pub struct ServiceMetadata {
    pub service_key: String,
    pub interface: String,
    pub generic: bool,
}

/// An invoker paired with its service-config snapshot; what transports
/// actually receive.
#[derive(Clone)]
pub struct MetadataInvoker {
    pub invoker: Invoker,
    pub metadata: ServiceMetadata,
}

impl MetadataInvoker {
    pub fn with_url(&self, url: Url) -> Self {
        Self {
            invoker: self.invoker.with_url(url),
            metadata: self.metadata.clone(),
        }
    }
}

/// A live endpoint returned by a transport. `unexport` is idempotent.
pub trait Exporter: Send + Sync {
    fn url(&self) -> &Url;
    fn unexport(&self) -> Result<()>;
}

/// The capability set every transport provides.
pub trait Transport: Send + Sync {
    /// Port used when neither config nor environment names one; 0 means
    /// the transport has no default and a random port is allocated.
    fn default_port(&self) -> u16;

    /// Bind and serve the invoker at its descriptor.
    fn export(&self, invoker: MetadataInvoker) -> Result<Arc<dyn Exporter>>;
}

/// In-process transport: exported services are reachable by service key
/// inside the same process, nothing touches the network.
#[derive(Default)]
pub struct InjvmTransport {
    exporters: Arc<DashMap<String, Url>>,
}

impl InjvmTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a service key is currently exported in-process.
    pub fn is_exported(&self, service_key: &str) -> bool {
        self.exporters.contains_key(service_key)
    }

    pub fn exported_count(&self) -> usize {
        self.exporters.len()
    }
}

impl Transport for InjvmTransport {
    fn default_port(&self) -> u16 {
        0
    }

    fn export(&self, invoker: MetadataInvoker) -> Result<Arc<dyn Exporter>> {
        let key = invoker.metadata.service_key.clone();
        let url = invoker.invoker.url.clone();
        self.exporters.insert(key.clone(), url.clone());
        info!("Export service {} to local registry", key);
        Ok(Arc::new(InjvmExporter {
            key,
            url,
            exporters: Arc::clone(&self.exporters),
            unexported: AtomicBool::new(false),
        }))
    }
}

struct InjvmExporter {
    key: String,
    url: Url,
    exporters: Arc<DashMap<String, Url>>,
    unexported: AtomicBool,
}

impl Exporter for InjvmExporter {
    fn url(&self) -> &Url {
        &self.url
    }

    fn unexport(&self) -> Result<()> {
        if !self.unexported.swap(true, Ordering::SeqCst) {
            self.exporters.remove(&self.key);
        }
        Ok(())
    }
}

/// Logging decorator composed around every transport registered in the
/// extension registry.
pub struct ListenerTransport {
    inner: Arc<dyn Transport>,
}

impl ListenerTransport {
    pub fn wrap(inner: Arc<dyn Transport>) -> Arc<dyn Transport> {
        Arc::new(Self { inner })
    }
}

impl Transport for ListenerTransport {
    fn default_port(&self) -> u16 {
        self.inner.default_port()
    }

    fn export(&self, invoker: MetadataInvoker) -> Result<Arc<dyn Exporter>> {
        let key = invoker.metadata.service_key.clone();
        let exporter = self.inner.export(invoker)?;
        debug!("Exported {} at {}", key, exporter.url());
        Ok(Arc::new(ListenerExporter { exporter }))
    }
}

struct ListenerExporter {
    exporter: Arc<dyn Exporter>,
}

impl Exporter for ListenerExporter {
    fn url(&self) -> &Url {
        self.exporter.url()
    }

    fn unexport(&self) -> Result<()> {
        debug!("Unexporting {}", self.exporter.url());
        self.exporter.unexport()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{MethodDescriptor, ServiceInterface};

    struct Echo;

    impl RpcService for Echo {
        fn interface(&self) -> ServiceInterface {
            ServiceInterface::new("demo.Echo", vec![MethodDescriptor::new("echo", &["String"])])
        }
    }

    fn echo_invoker(key: &str) -> MetadataInvoker {
        let service: Arc<dyn RpcService> = Arc::new(Echo);
        let interface = service.interface();
        MetadataInvoker {
            invoker: Invoker {
                service,
                interface,
                url: Url::new("injvm", "127.0.0.1", 0, "demo.Echo"),
            },
            metadata: ServiceMetadata {
                service_key: key.to_string(),
                interface: "demo.Echo".to_string(),
                generic: false,
            },
        }
    }

    #[test]
    fn test_injvm_export_and_unexport() {
        let transport = InjvmTransport::new();
        let exporter = transport.export(echo_invoker("demo.Echo")).unwrap();
        assert!(transport.is_exported("demo.Echo"));
        assert_eq!(exporter.url().protocol(), "injvm");

        exporter.unexport().unwrap();
        assert!(!transport.is_exported("demo.Echo"));
    }

    #[test]
    fn test_injvm_unexport_idempotent() {
        let transport = InjvmTransport::new();
        let exporter = transport.export(echo_invoker("demo.Echo")).unwrap();

        // a stale second unexport must not tear down a newer export
        exporter.unexport().unwrap();
        let _second = transport.export(echo_invoker("demo.Echo")).unwrap();
        exporter.unexport().unwrap();
        assert!(transport.is_exported("demo.Echo"));
    }

    #[test]
    fn test_listener_wrapper_delegates() {
        let transport = ListenerTransport::wrap(Arc::new(InjvmTransport::new()));
        assert_eq!(transport.default_port(), 0);
        let exporter = transport.export(echo_invoker("demo.Echo")).unwrap();
        assert_eq!(exporter.url().path(), "demo.Echo");
        exporter.unexport().unwrap();
    }
}
