//! Scope resolution: flattens the configuration scopes into the single
//! parameter map a descriptor is built from.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::{ApplicationConfig, MethodConfig, ModuleConfig, ProtocolConfig, ProviderConfig};
use crate::consts;
use crate::service::ServiceInterface;
use crate::{DubboError, Result};

/// The flat parameter map descriptors are built from. Sorted keys keep the
/// formatted descriptor stable.
pub type ParameterMap = BTreeMap<String, String>;

/// The scopes contributing to one export, lowest precedence first.
/// `service` holds the service-level attributes already keyed; method
/// overrides are validated against `interface`.
pub struct ScopeSet<'a> {
    pub application: Option<&'a ApplicationConfig>,
    pub module: Option<&'a ModuleConfig>,
    pub provider: Option<&'a ProviderConfig>,
    pub protocol: Option<&'a ProtocolConfig>,
    pub service: &'a ParameterMap,
    pub methods: &'a [MethodConfig],
    pub interface: &'a ServiceInterface,
}

/// Walk the scopes in increasing precedence into one flat map, with
/// `side=provider` and the runtime parameters always present. A parameter
/// set at a higher scope shadows the same key from a lower one; provider
/// attributes land under the `default.` prefix in their role as defaults.
pub fn resolve_parameters(scopes: &ScopeSet<'_>) -> Result<ParameterMap> {
    let mut map = ParameterMap::new();
    map.insert(consts::SIDE_KEY.into(), consts::PROVIDER_SIDE.into());
    append_runtime_parameters(&mut map);

    if let Some(application) = scopes.application {
        application.append_parameters(&mut map);
    }
    if let Some(module) = scopes.module {
        module.append_parameters(&mut map);
    }
    if let Some(provider) = scopes.provider {
        provider.append_parameters(&mut map, consts::DEFAULT_KEY_PREFIX);
    }
    if let Some(protocol) = scopes.protocol {
        protocol.append_parameters(&mut map);
    }
    for (key, value) in scopes.service {
        map.insert(key.clone(), value.clone());
    }

    append_method_parameters(&mut map, scopes.methods, scopes.interface)?;
    Ok(map)
}

/// Framework version, export timestamp and process id.
pub(crate) fn append_runtime_parameters(map: &mut ParameterMap) {
    map.insert("dubbo".into(), consts::DUBBO_VERSION.into());
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    map.insert(consts::TIMESTAMP_KEY.into(), millis.to_string());
    map.insert(consts::PID_KEY.into(), std::process::id().to_string());
}

/// Method overrides keyed `<method>.<attr>`, argument overrides keyed
/// `<method>.<index>.<attr>`. `<m>.retry=false` rewrites to
/// `<m>.retries=0`; the original key is removed either way.
fn append_method_parameters(
    map: &mut ParameterMap,
    methods: &[MethodConfig],
    interface: &ServiceInterface,
) -> Result<()> {
    for method in methods {
        if method.name.is_empty() {
            return Err(DubboError::Config(
                "method config requires a name".into(),
            ));
        }
        let signature = interface.method(&method.name).ok_or_else(|| {
            DubboError::Config(format!(
                "The interface {} has no method {}",
                interface.name, method.name
            ))
        })?;

        method.append_parameters(map, &method.name);

        let retry_key = format!("{}.retry", method.name);
        if let Some(retry) = map.remove(&retry_key) {
            if retry == "false" {
                map.insert(format!("{}.retries", method.name), "0".into());
            }
        }

        for argument in &method.arguments {
            match (argument.r#type.as_deref().filter(|t| !t.is_empty()), argument.index) {
                (Some(ty), Some(index)) => {
                    if signature.parameter_types.get(index).map(String::as_str) != Some(ty) {
                        return Err(DubboError::Config(format!(
                            "Argument config error: the index attribute and type attribute \
                             not match: index: {}, type: {}",
                            index, ty
                        )));
                    }
                    argument.append_parameters(map, &format!("{}.{}", method.name, index));
                }
                (Some(ty), None) => {
                    for (position, parameter_type) in signature.parameter_types.iter().enumerate() {
                        if parameter_type == ty {
                            argument
                                .append_parameters(map, &format!("{}.{}", method.name, position));
                        }
                    }
                }
                (None, Some(index)) => {
                    argument.append_parameters(map, &format!("{}.{}", method.name, index));
                }
                (None, None) => {
                    return Err(DubboError::Config(
                        "Argument config must set index or type attribute".into(),
                    ));
                }
            }
        }
    }
    Ok(())
}
