//! # Export Module
//!
//! The service-export pipeline: takes a user reference plus its
//! declarative configuration and materialises it as live endpoints, local
//! and remote, with registration fanned out to every configured registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::runtime::Runtime;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::address::AddressResolver;
use crate::config::resolver::{resolve_parameters, ParameterMap, ScopeSet};
use crate::config::{
    ApplicationConfig, MethodConfig, ModuleConfig, MonitorConfig, ProtocolConfig, ProviderConfig,
    RegistryConfig,
};
use crate::consts;
use crate::extension::ExtensionRegistry;
use crate::proxy::{DefaultProxyFactory, ProxyFactory};
use crate::service::{self, check_generic_flavour, RpcService, ServiceInterface};
use crate::transport::{Exporter, MetadataInvoker, ServiceMetadata};
use crate::url::Url;
use crate::{DubboError, Result};

/// The delayed-exposure timer: one worker thread for the whole process.
fn delay_executor() -> &'static Runtime {
    static DELAY_EXPORT_EXECUTOR: Lazy<Runtime> = Lazy::new(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("dubbo-service-delay-exporter")
            .enable_time()
            .build()
            .expect("failed to start delay export executor")
    });
    &DELAY_EXPORT_EXECUTOR
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    New,
    Exported,
    Unexported,
}

struct ExportState {
    phase: Phase,
    exporters: Vec<Arc<dyn Exporter>>,
    urls: Vec<Url>,
}

/// Interface and path resolved from the service definition, computed once
/// per export.
struct ResolvedService {
    interface: ServiceInterface,
    generic: Option<String>,
    path: String,
}

/// One exportable service: the reference, its interface identity and the
/// configuration scopes it draws from.
///
/// Lifecycle: created neither exported nor unexported; `export` moves it
/// to exported (re-entry is a no-op), `unexport` to unexported (terminal).
pub struct ServiceConfig {
    interface_name: String,
    reference: Option<Arc<dyn RpcService>>,
    path: Option<String>,
    version: Option<String>,
    group: Option<String>,
    generic: Option<String>,
    token: Option<String>,
    local: Option<String>,
    stub: Option<String>,
    scope: Option<String>,
    export: Option<bool>,
    delay: Option<u64>,
    timeout: Option<u64>,
    retries: Option<u32>,
    loadbalance: Option<String>,
    weight: Option<u32>,
    application: Option<ApplicationConfig>,
    module: Option<ModuleConfig>,
    provider: Option<ProviderConfig>,
    protocols: Vec<ProtocolConfig>,
    registries: Vec<RegistryConfig>,
    monitor: Option<MonitorConfig>,
    methods: Vec<MethodConfig>,
    parameters: HashMap<String, String>,
    extensions: Arc<ExtensionRegistry>,
    proxy_factory: Arc<dyn ProxyFactory>,
    state: Mutex<ExportState>,
}

impl ServiceConfig {
    pub fn new(interface_name: impl Into<String>) -> Self {
        Self {
            interface_name: interface_name.into(),
            reference: None,
            path: None,
            version: None,
            group: None,
            generic: None,
            token: None,
            local: None,
            stub: None,
            scope: None,
            export: None,
            delay: None,
            timeout: None,
            retries: None,
            loadbalance: None,
            weight: None,
            application: None,
            module: None,
            provider: None,
            protocols: Vec::new(),
            registries: Vec::new(),
            monitor: None,
            methods: Vec::new(),
            parameters: HashMap::new(),
            extensions: ExtensionRegistry::global(),
            proxy_factory: Arc::new(DefaultProxyFactory),
            state: Mutex::new(ExportState {
                phase: Phase::New,
                exporters: Vec::new(),
                urls: Vec::new(),
            }),
        }
    }

    pub fn with_ref(mut self, reference: Arc<dyn RpcService>) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_generic(mut self, generic: impl Into<String>) -> Self {
        self.generic = Some(generic.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_local(mut self, local: impl Into<String>) -> Self {
        self.local = Some(local.into());
        self
    }

    pub fn with_stub(mut self, stub: impl Into<String>) -> Self {
        self.stub = Some(stub.into());
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_export(mut self, export: bool) -> Self {
        self.export = Some(export);
        self
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay = Some(delay_ms);
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = Some(timeout_ms);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_loadbalance(mut self, loadbalance: impl Into<String>) -> Self {
        self.loadbalance = Some(loadbalance.into());
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_application(mut self, application: ApplicationConfig) -> Self {
        self.application = Some(application);
        self
    }

    pub fn with_module(mut self, module: ModuleConfig) -> Self {
        self.module = Some(module);
        self
    }

    pub fn with_provider(mut self, provider: ProviderConfig) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_protocol(mut self, protocol: ProtocolConfig) -> Self {
        self.protocols.push(protocol);
        self
    }

    pub fn with_registry(mut self, registry: RegistryConfig) -> Self {
        self.registries.push(registry);
        self
    }

    pub fn with_monitor(mut self, monitor: MonitorConfig) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn with_method(mut self, method: MethodConfig) -> Self {
        self.methods.push(method);
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_extensions(mut self, extensions: Arc<ExtensionRegistry>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn with_proxy_factory(mut self, proxy_factory: Arc<dyn ProxyFactory>) -> Self {
        self.proxy_factory = proxy_factory;
        self
    }

    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }

    pub fn is_exported(&self) -> bool {
        self.state.lock().phase == Phase::Exported
    }

    pub fn is_unexported(&self) -> bool {
        self.state.lock().phase == Phase::Unexported
    }

    /// Descriptors produced so far, one per protocol config.
    pub fn exported_urls(&self) -> Vec<Url> {
        self.state.lock().urls.clone()
    }

    /// Number of live exporter handles held for this service.
    pub fn exporter_count(&self) -> usize {
        self.state.lock().exporters.len()
    }

    /// Export the service. A no-op when already exported, an error after
    /// `unexport`, scheduled on the delay executor when a delay is
    /// configured. Takes an `Arc` handle so the delayed path can outlive
    /// the caller; `service.clone().export()` leaves the caller's handle
    /// untouched.
    pub fn export(self: Arc<Self>) -> Result<()> {
        let mut st = self.state.lock();
        match st.phase {
            Phase::Unexported => {
                return Err(DubboError::AlreadyUnexported(self.interface_name.clone()))
            }
            Phase::Exported => return Ok(()),
            Phase::New => {}
        }

        // validation runs before scheduling so misconfiguration surfaces
        // to the caller, not to the executor
        self.resolve_service()?;

        if !self.export.or_else(|| self.provider.as_ref().and_then(|p| p.export)).unwrap_or(true) {
            info!("Export of service {} is disabled", self.interface_name);
            return Ok(());
        }

        let delay = self
            .delay
            .or_else(|| self.provider.as_ref().and_then(|p| p.delay))
            .unwrap_or(0);
        if delay > 0 {
            info!("Delay export service {} by {}ms", self.interface_name, delay);
            let service = Arc::clone(&self);
            delay_executor().spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                let mut st = service.state.lock();
                if let Err(e) = service.do_export(&mut st) {
                    error!("Delayed export of {} failed: {}", service.interface_name, e);
                }
            });
            return Ok(());
        }

        self.do_export(&mut st)
    }

    /// Release every exporter handle, in order. Individual failures are
    /// logged and skipped; the operation is idempotent.
    pub fn unexport(&self) {
        let mut st = self.state.lock();
        if st.phase != Phase::Exported {
            return;
        }
        for exporter in st.exporters.drain(..) {
            if let Err(e) = exporter.unexport() {
                warn!("Unexpected error occurred when unexport {}: {}", exporter.url(), e);
            }
        }
        st.phase = Phase::Unexported;
    }

    fn do_export(&self, st: &mut ExportState) -> Result<()> {
        match st.phase {
            Phase::Unexported => {
                return Err(DubboError::AlreadyUnexported(self.interface_name.clone()))
            }
            Phase::Exported => return Ok(()),
            Phase::New => {}
        }
        st.phase = Phase::Exported;

        let resolved = self.resolve_service()?;
        let registry_urls = self.load_registries()?;

        let protocols = self.effective_protocols();
        for protocol in &protocols {
            self.export_protocol(st, &resolved, protocol, &registry_urls)?;
        }
        Ok(())
    }

    /// Validation and defaulting: interface identity, reference
    /// capability, generic flavour, local/stub coverage, path default.
    fn resolve_service(&self) -> Result<ResolvedService> {
        if self.interface_name.is_empty() {
            return Err(DubboError::Config("interface not allow null!".into()));
        }
        let reference = self
            .reference
            .as_ref()
            .ok_or_else(|| DubboError::Config("ref not allow null!".into()))?;

        if let Some(flavour) = &self.generic {
            check_generic_flavour(flavour)?;
        }

        let (interface, generic) = if reference.is_generic() {
            let flavour = self.generic.clone().unwrap_or_else(|| "true".to_string());
            (reference.interface(), Some(flavour))
        } else {
            let interface = reference.interface();
            if interface.name != self.interface_name {
                return Err(DubboError::Config(format!(
                    "The reference implementing {} does not implement interface {}",
                    interface.name, self.interface_name
                )));
            }
            (interface, None)
        };

        self.check_stub(self.local.as_deref(), "local", &interface)?;
        self.check_stub(self.stub.as_deref(), "stub", &interface)?;

        let path = self
            .path
            .clone()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| self.interface_name.clone());

        Ok(ResolvedService {
            interface,
            generic,
            path,
        })
    }

    /// `local`/`stub` set to `true` expand to `<interface><Suffix>`; the
    /// named implementation must be registered and cover the interface.
    fn check_stub(&self, value: Option<&str>, kind: &str, interface: &ServiceInterface) -> Result<()> {
        let Some(value) = value.filter(|v| !v.is_empty()) else {
            return Ok(());
        };
        let name = if value == "true" {
            let suffix = if kind == "local" { "Local" } else { "Stub" };
            format!("{}{}", self.interface_name, suffix)
        } else {
            value.to_string()
        };
        let stub = self.extensions.stub(&name).ok_or_else(|| {
            DubboError::Config(format!("The {} implementation class {} not found", kind, name))
        })?;
        if !stub.covers(interface) {
            return Err(DubboError::Config(format!(
                "The {} implementation class {} not implement interface {}",
                kind, name, self.interface_name
            )));
        }
        Ok(())
    }

    /// Export one protocol config: build the descriptor, apply the
    /// configurator, split by scope, fan out to registries.
    fn export_protocol(
        &self,
        st: &mut ExportState,
        resolved: &ResolvedService,
        protocol: &ProtocolConfig,
        registry_urls: &[Url],
    ) -> Result<()> {
        let name = if protocol.name.is_empty() {
            consts::DEFAULT_PROTOCOL.to_string()
        } else {
            protocol.name.to_lowercase()
        };

        let service_params = self.service_parameters();
        let mut map = resolve_parameters(&ScopeSet {
            application: self.application.as_ref(),
            module: self.module.as_ref(),
            provider: self.provider.as_ref(),
            protocol: Some(protocol),
            service: &service_params,
            methods: &self.methods,
            interface: &resolved.interface,
        })?;

        if let Some(flavour) = &resolved.generic {
            map.insert(consts::GENERIC_KEY.into(), flavour.clone());
            map.insert(consts::METHODS_KEY.into(), consts::ANY_VALUE.into());
        } else {
            if let Some(version) = &self.version {
                map.insert(consts::REVISION_KEY.into(), version.clone());
            }
            let methods = resolved.interface.method_names();
            if methods.is_empty() {
                warn!(
                    "No method found in service interface {}",
                    resolved.interface.name
                );
                map.insert(consts::METHODS_KEY.into(), consts::ANY_VALUE.into());
            } else {
                map.insert(consts::METHODS_KEY.into(), methods.join(","));
            }
        }

        if let Some(token) = self.token.as_deref().filter(|t| !t.is_empty()) {
            let value = if token == "true" || token == "default" {
                Uuid::new_v4().to_string()
            } else {
                token.to_string()
            };
            map.insert(consts::TOKEN_KEY.into(), value);
        }

        // in-process exports never register or notify
        if name == consts::LOCAL_PROTOCOL {
            map.insert(consts::REGISTER_KEY.into(), "false".into());
            map.insert(consts::NOTIFY_KEY.into(), "false".into());
        }

        let resolver = AddressResolver::new(&name, protocol, self.provider.as_ref(), registry_urls);
        let host = resolver.find_host(&mut map)?;
        let default_port = self.extensions.transport(&name)?.default_port();
        let port = resolver.find_port(default_port, &mut map)?;

        let contextpath = protocol
            .contextpath
            .clone()
            .filter(|c| !c.is_empty())
            .or_else(|| self.provider.as_ref().and_then(|p| p.contextpath.clone()));
        let path = match contextpath {
            Some(context) => format!("{}/{}", context.trim_matches('/'), resolved.path),
            None => resolved.path.clone(),
        };

        let mut url = Url::new(&name, host, port, path).with_parameters(map);

        if let Some(factory) = self.extensions.configurator_factory(url.protocol()) {
            url = factory.configurator(&url).configure(url);
        }

        let scope = url.parameter(consts::SCOPE_KEY).unwrap_or_default().to_string();
        if !scope.eq_ignore_ascii_case(consts::SCOPE_NONE) {
            if !scope.eq_ignore_ascii_case(consts::SCOPE_REMOTE) {
                self.export_local(st, resolved, &url)?;
            }
            if !scope.eq_ignore_ascii_case(consts::SCOPE_LOCAL) {
                self.export_remote(st, resolved, &url, registry_urls)?;
            }
        }

        st.urls.push(url);
        Ok(())
    }

    /// Service-scope attributes in flat-map form.
    fn service_parameters(&self) -> ParameterMap {
        let mut map = ParameterMap::new();
        for (key, value) in &self.parameters {
            if !value.is_empty() {
                map.insert(key.clone(), value.clone());
            }
        }
        map.insert(consts::INTERFACE_KEY.into(), self.interface_name.clone());
        if let Some(version) = self.version.as_deref().filter(|v| !v.is_empty()) {
            map.insert(consts::VERSION_KEY.into(), version.into());
        }
        if let Some(group) = self.group.as_deref().filter(|g| !g.is_empty()) {
            map.insert(consts::GROUP_KEY.into(), group.into());
        }
        if let Some(timeout) = self.timeout {
            map.insert("timeout".into(), timeout.to_string());
        }
        if let Some(retries) = self.retries {
            map.insert("retries".into(), retries.to_string());
        }
        if let Some(loadbalance) = self.loadbalance.as_deref() {
            map.insert("loadbalance".into(), loadbalance.into());
        }
        if let Some(weight) = self.weight {
            map.insert(consts::WEIGHT_KEY.into(), weight.to_string());
        }
        if let Some(scope) = self.scope.as_deref().filter(|s| !s.is_empty()) {
            map.insert(consts::SCOPE_KEY.into(), scope.into());
        }
        map
    }

    /// Local export: the descriptor rewritten to the in-process transport.
    fn export_local(
        &self,
        st: &mut ExportState,
        resolved: &ResolvedService,
        url: &Url,
    ) -> Result<()> {
        if url.protocol() == consts::LOCAL_PROTOCOL {
            return Ok(());
        }
        let local = url
            .with_protocol(consts::LOCAL_PROTOCOL)
            .with_host(consts::LOCALHOST_VALUE)
            .with_port(0);
        let invoker = self.invoker_for(resolved, &local)?;
        let exporter = self.extensions.transport(consts::LOCAL_PROTOCOL)?.export(invoker)?;
        st.exporters.push(exporter);
        info!("Export dubbo service {} to local registry", self.interface_name);
        Ok(())
    }

    /// Remote export: one registration per registry, or direct-connect
    /// when no registry is configured.
    fn export_remote(
        &self,
        st: &mut ExportState,
        resolved: &ResolvedService,
        url: &Url,
        registry_urls: &[Url],
    ) -> Result<()> {
        if registry_urls.is_empty() {
            // direct-connect mode, development only
            let invoker = self.invoker_for(resolved, url)?;
            let exporter = self
                .extensions
                .transport(url.protocol())?
                .export(invoker)
                .map_err(|e| DubboError::ExportFailed {
                    protocol: url.protocol().to_string(),
                    registry: url.address(),
                    reason: e.to_string(),
                })?;
            st.exporters.push(exporter);
            return Ok(());
        }

        let monitor_url = self.load_monitor()?;
        for registry_url in registry_urls {
            let mut url = url.with_parameter_if_absent(
                consts::DYNAMIC_KEY,
                registry_url.parameter(consts::DYNAMIC_KEY).unwrap_or(""),
            );
            if let Some(monitor) = &monitor_url {
                url = url.with_parameter_encoded(consts::MONITOR_KEY, &monitor.to_full_string());
            }

            let mut registry_url = registry_url.clone();
            if let Some(proxy) = url.parameter(consts::PROXY_KEY).filter(|p| !p.is_empty()) {
                registry_url = registry_url.with_parameter(consts::PROXY_KEY, proxy);
            }
            let registry_url =
                registry_url.with_parameter_encoded(consts::EXPORT_KEY, &url.to_full_string());

            info!(
                "Register dubbo service {} url {} to registry {}",
                self.interface_name,
                url,
                registry_url.address()
            );

            let invoker = self.invoker_for(resolved, &registry_url)?;
            let exporter = self
                .extensions
                .transport(consts::REGISTRY_PROTOCOL)?
                .export(invoker)
                .map_err(|e| DubboError::ExportFailed {
                    protocol: url.protocol().to_string(),
                    registry: registry_url.address(),
                    reason: e.to_string(),
                })?;
            st.exporters.push(exporter);
        }
        Ok(())
    }

    fn invoker_for(&self, resolved: &ResolvedService, url: &Url) -> Result<MetadataInvoker> {
        let reference = self
            .reference
            .as_ref()
            .ok_or_else(|| DubboError::Config("ref not allow null!".into()))?;
        let invoker =
            self.proxy_factory
                .get_invoker(Arc::clone(reference), &resolved.interface, url)?;
        Ok(MetadataInvoker {
            invoker,
            metadata: ServiceMetadata {
                service_key: service::service_key(
                    &resolved.path,
                    self.group.as_deref(),
                    self.version.as_deref(),
                ),
                interface: self.interface_name.clone(),
                generic: resolved.generic.is_some(),
            },
        })
    }

    /// Registries this service announces at, inherited service → provider
    /// → module → application, rewritten to `registry://` descriptors.
    fn load_registries(&self) -> Result<Vec<Url>> {
        let mut urls = Vec::new();
        for config in self.effective_registries() {
            if config.address.is_empty() || config.address.eq_ignore_ascii_case("N/A") {
                continue;
            }
            if config.register == Some(false) {
                continue;
            }
            let parsed = Url::parse(&config.address)?;
            let mut map = ParameterMap::new();
            config.append_parameters(&mut map);
            map.insert("dubbo".into(), consts::DUBBO_VERSION.into());

            let url = parsed
                .with_path(consts::REGISTRY_SERVICE_PATH)
                .with_parameters(map)
                .with_parameter(consts::REGISTRY_KEY, parsed.protocol())
                .with_protocol(consts::REGISTRY_PROTOCOL);
            urls.push(url);
        }
        Ok(urls)
    }

    fn load_monitor(&self) -> Result<Option<Url>> {
        let Some(config) = self.effective_monitor() else {
            return Ok(None);
        };
        let Some(address) = config.address.as_deref().filter(|a| !a.is_empty()) else {
            return Ok(None);
        };
        let url = Url::parse(address)?.with_parameters(
            config
                .parameters
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        Ok(Some(url))
    }

    fn effective_protocols(&self) -> Vec<ProtocolConfig> {
        if !self.protocols.is_empty() {
            return self.protocols.clone();
        }
        if let Some(provider) = &self.provider {
            if !provider.protocols.is_empty() {
                return provider.protocols.clone();
            }
        }
        vec![ProtocolConfig::default()]
    }

    fn effective_registries(&self) -> Vec<RegistryConfig> {
        if !self.registries.is_empty() {
            return self.registries.clone();
        }
        if let Some(provider) = &self.provider {
            if !provider.registries.is_empty() {
                return provider.registries.clone();
            }
        }
        if let Some(module) = &self.module {
            if !module.registries.is_empty() {
                return module.registries.clone();
            }
        }
        if let Some(application) = &self.application {
            if !application.registries.is_empty() {
                return application.registries.clone();
            }
        }
        Vec::new()
    }

    fn effective_monitor(&self) -> Option<&MonitorConfig> {
        self.monitor
            .as_ref()
            .or_else(|| self.provider.as_ref().and_then(|p| p.monitor.as_ref()))
            .or_else(|| self.module.as_ref().and_then(|m| m.monitor.as_ref()))
            .or_else(|| self.application.as_ref().and_then(|a| a.monitor.as_ref()))
    }
}
