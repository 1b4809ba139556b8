//! # Proxy Module
//!
//! The factory that wraps a user reference into an invoker. The default
//! implementation pairs the reference with the descriptor as-is; richer
//! factories (bytecode generation, interception) plug in through the same
//! trait.

use std::sync::Arc;

use crate::service::{RpcService, ServiceInterface};
use crate::transport::Invoker;
use crate::url::Url;
use crate::Result;

/// Wraps a service reference into an invoker bound to a descriptor.
pub trait ProxyFactory: Send + Sync {
    fn get_invoker(
        &self,
        service: Arc<dyn RpcService>,
        interface: &ServiceInterface,
        url: &Url,
    ) -> Result<Invoker>;
}

/// The stock proxy factory.
#[derive(Default)]
pub struct DefaultProxyFactory;

impl ProxyFactory for DefaultProxyFactory {
    fn get_invoker(
        &self,
        service: Arc<dyn RpcService>,
        interface: &ServiceInterface,
        url: &Url,
    ) -> Result<Invoker> {
        Ok(Invoker {
            service,
            interface: interface.clone(),
            url: url.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::MethodDescriptor;

    struct Echo;

    impl RpcService for Echo {
        fn interface(&self) -> ServiceInterface {
            ServiceInterface::new("demo.Echo", vec![MethodDescriptor::new("echo", &["String"])])
        }
    }

    #[test]
    fn test_default_factory_binds_url() {
        let factory = DefaultProxyFactory;
        let service: Arc<dyn RpcService> = Arc::new(Echo);
        let interface = service.interface();
        let url = Url::new("dubbo", "127.0.0.1", 20880, "demo.Echo");
        let invoker = factory.get_invoker(service, &interface, &url).unwrap();
        assert_eq!(invoker.url, url);
        assert_eq!(invoker.interface.name, "demo.Echo");
    }
}
