//! # Service Module
//!
//! The service-side model: interface descriptions, the capability a user
//! reference must provide, and generic (interface-less) services.

use crate::{DubboError, Result};

/// Interface token substituted for generic services
pub const GENERIC_INTERFACE: &str = "GenericService";

/// Generic flavours accepted by the `generic` attribute
const GENERIC_FLAVOURS: [&str; 3] = ["true", "nativejava", "bean"];

/// A single method signature on a service interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub name: String,
    /// Parameter type names, in declaration order
    pub parameter_types: Vec<String>,
}

impl MethodDescriptor {
    pub fn new(name: impl Into<String>, parameter_types: &[&str]) -> Self {
        Self {
            name: name.into(),
            parameter_types: parameter_types.iter().map(|t| t.to_string()).collect(),
        }
    }
}

/// The declared shape of a service interface: its identity and methods.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceInterface {
    pub name: String,
    pub methods: Vec<MethodDescriptor>,
}

impl ServiceInterface {
    pub fn new(name: impl Into<String>, methods: Vec<MethodDescriptor>) -> Self {
        Self {
            name: name.into(),
            methods,
        }
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.iter().any(|m| m.name == name)
    }

    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Method names sorted for a stable `methods=` parameter.
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.iter().map(|m| m.name.clone()).collect();
        names.sort();
        names.dedup();
        names
    }

    /// True when every method of `required` appears here.
    pub fn covers(&self, required: &ServiceInterface) -> bool {
        required.methods.iter().all(|m| self.has_method(&m.name))
    }
}

/// The capability a user reference must provide to be exported: it knows
/// which interface it implements.
pub trait RpcService: Send + Sync {
    fn interface(&self) -> ServiceInterface;

    /// Generic services ship calls as `(method, arg-types, args)` triples
    /// and have no statically known interface.
    fn is_generic(&self) -> bool {
        false
    }
}

/// Sentinel reference for services whose interface is not statically known.
#[derive(Debug, Default)]
pub struct GenericService;

impl RpcService for GenericService {
    fn interface(&self) -> ServiceInterface {
        ServiceInterface::new(GENERIC_INTERFACE, Vec::new())
    }

    fn is_generic(&self) -> bool {
        true
    }
}

/// Whether `value` names a supported generic flavour.
pub fn is_generic_flavour(value: &str) -> bool {
    GENERIC_FLAVOURS.contains(&value)
}

/// Validate a `generic` attribute value.
pub fn check_generic_flavour(value: &str) -> Result<()> {
    if is_generic_flavour(value) {
        Ok(())
    } else {
        Err(DubboError::Config(format!(
            "Unsupported generic type {}",
            value
        )))
    }
}

/// Service identity `group/path:version`.
pub fn service_key(path: &str, group: Option<&str>, version: Option<&str>) -> String {
    let mut key = String::new();
    if let Some(group) = group {
        if !group.is_empty() {
            key.push_str(group);
            key.push('/');
        }
    }
    key.push_str(path);
    if let Some(version) = version {
        if !version.is_empty() {
            key.push(':');
            key.push_str(version);
        }
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn greeter() -> ServiceInterface {
        ServiceInterface::new(
            "demo.Greeter",
            vec![
                MethodDescriptor::new("sayHello", &["String"]),
                MethodDescriptor::new("sayHi", &["String", "i32"]),
            ],
        )
    }

    #[test]
    fn test_has_method() {
        let iface = greeter();
        assert!(iface.has_method("sayHello"));
        assert!(!iface.has_method("wave"));
    }

    #[test]
    fn test_method_names_sorted() {
        let iface = greeter();
        assert_eq!(iface.method_names(), vec!["sayHello", "sayHi"]);
    }

    #[test]
    fn test_covers() {
        let iface = greeter();
        let stub = ServiceInterface::new(
            "demo.GreeterStub",
            vec![
                MethodDescriptor::new("sayHello", &["String"]),
                MethodDescriptor::new("sayHi", &["String", "i32"]),
                MethodDescriptor::new("extra", &[]),
            ],
        );
        assert!(stub.covers(&iface));
        assert!(!iface.covers(&stub));
    }

    #[test]
    fn test_generic_service() {
        let generic = GenericService;
        assert!(generic.is_generic());
        assert_eq!(generic.interface().name, GENERIC_INTERFACE);
    }

    #[test]
    fn test_generic_flavours() {
        assert!(check_generic_flavour("true").is_ok());
        assert!(check_generic_flavour("nativejava").is_ok());
        assert!(check_generic_flavour("bean").is_ok());
        assert!(check_generic_flavour("protobuf").is_err());
    }

    #[test]
    fn test_service_key() {
        assert_eq!(service_key("demo.Greeter", None, None), "demo.Greeter");
        assert_eq!(
            service_key("demo.Greeter", Some("g"), Some("2.0")),
            "g/demo.Greeter:2.0"
        );
    }
}
