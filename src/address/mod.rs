//! # Address Module
//!
//! Resolution of the bind address and the advertised (registry-facing)
//! address for one export, plus the per-protocol random port cache.
//!
//! Host priority: environment, protocol config, provider config, local
//! interface probe, registry socket probe, loopback fallback. Port
//! priority: environment, protocol config, provider config, transport
//! default, cached random port, freshly scanned port.

use std::net::{IpAddr, TcpListener, TcpStream, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use tracing::{debug, warn};

use crate::config::resolver::ParameterMap;
use crate::config::{ProtocolConfig, ProviderConfig};
use crate::consts;
use crate::url::Url;
use crate::{DubboError, Result};

/// Connect timeout for the registry socket probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// First port tried when scanning without a protocol default
const RND_PORT_START: u16 = 30000;

/// Random ports handed out so far, one per protocol. Write-once: the
/// first recorded port for a protocol sticks for the process lifetime.
static RANDOM_PORT_MAP: Lazy<DashMap<String, u16>> = Lazy::new(DashMap::new);

/// The cached random port for a protocol, if one was recorded.
pub fn random_port(protocol: &str) -> Option<u16> {
    RANDOM_PORT_MAP.get(&protocol.to_lowercase()).map(|p| *p)
}

/// Record the random port chosen for a protocol. Only the first record
/// per protocol wins; concurrent losers keep their own port unrecorded.
pub fn record_random_port(protocol: &str, port: u16) {
    let protocol = protocol.to_lowercase();
    let recorded = *RANDOM_PORT_MAP.entry(protocol.clone()).or_insert(port);
    if recorded == port {
        warn!("Use random available port({}) for protocol {}", port, protocol);
    }
}

/// Computes bind and advertised addresses for one `(protocol, service)`
/// export. The local-interface lookup is injectable so the probe chain
/// can be exercised deterministically.
pub struct AddressResolver<'a> {
    name: &'a str,
    protocol: &'a ProtocolConfig,
    provider: Option<&'a ProviderConfig>,
    registries: &'a [Url],
    local_probe: fn() -> Option<IpAddr>,
}

impl<'a> AddressResolver<'a> {
    pub fn new(
        name: &'a str,
        protocol: &'a ProtocolConfig,
        provider: Option<&'a ProviderConfig>,
        registries: &'a [Url],
    ) -> Self {
        Self {
            name,
            protocol,
            provider,
            registries,
            local_probe: default_local_probe,
        }
    }

    pub fn with_local_probe(mut self, probe: fn() -> Option<IpAddr>) -> Self {
        self.local_probe = probe;
        self
    }

    /// Resolve the advertised host, recording `bind.ip` and `anyhost` in
    /// `map`. Fails on an explicitly configured invalid address.
    pub fn find_host(&self, map: &mut ParameterMap) -> Result<String> {
        let mut anyhost = false;

        let mut host_to_bind = env_value(self.name, consts::DUBBO_IP_TO_BIND);
        if let Some(host) = &host_to_bind {
            if is_invalid_local_host(host) {
                return Err(DubboError::Config(format!(
                    "Specified invalid bind ip from property {}, value: {}",
                    consts::DUBBO_IP_TO_BIND,
                    host
                )));
            }
        }

        if host_to_bind.is_none() {
            host_to_bind = self
                .protocol
                .host
                .clone()
                .filter(|h| !h.is_empty())
                .or_else(|| self.provider.and_then(|p| p.host.clone()).filter(|h| !h.is_empty()));

            if host_to_bind.as_deref().map_or(true, is_invalid_local_host) {
                anyhost = true;
                host_to_bind = (self.local_probe)().map(|ip| ip.to_string());

                if host_to_bind.as_deref().map_or(true, is_invalid_local_host) {
                    if let Some(probed) = self.probe_registries() {
                        host_to_bind = Some(probed);
                    }
                }
                if host_to_bind.as_deref().map_or(true, is_invalid_local_host) {
                    host_to_bind = Some(consts::LOCALHOST_VALUE.to_string());
                }
            }
        }

        let host_to_bind = host_to_bind.unwrap_or_else(|| consts::LOCALHOST_VALUE.to_string());
        map.insert(consts::BIND_IP_KEY.into(), host_to_bind.clone());

        let host_to_registry = match env_value(self.name, consts::DUBBO_IP_TO_REGISTRY) {
            Some(host) if is_invalid_local_host(&host) => {
                return Err(DubboError::Config(format!(
                    "Specified invalid registry ip from property {}, value: {}",
                    consts::DUBBO_IP_TO_REGISTRY,
                    host
                )));
            }
            Some(host) => host,
            None => host_to_bind,
        };

        map.insert(consts::ANYHOST_KEY.into(), anyhost.to_string());
        Ok(host_to_registry)
    }

    /// Resolve the advertised port, recording `bind.port` in `map`.
    /// `default_port` comes from the transport; 0 means the transport has
    /// no default and a random port is cached per protocol.
    pub fn find_port(&self, default_port: u16, map: &mut ParameterMap) -> Result<u16> {
        let mut port_to_bind = match env_value(self.name, consts::DUBBO_PORT_TO_BIND) {
            Some(value) => Some(parse_port(&value)?),
            None => None,
        };

        if port_to_bind.is_none() {
            port_to_bind = self
                .protocol
                .port
                .filter(|p| *p > 0)
                .or_else(|| self.provider.and_then(|p| p.port).filter(|p| *p > 0));
            if port_to_bind.is_none() && default_port > 0 {
                port_to_bind = Some(default_port);
            }
            if port_to_bind.is_none() {
                port_to_bind = random_port(self.name);
                if port_to_bind.is_none() {
                    let port = available_port(default_port)?;
                    record_random_port(self.name, port);
                    port_to_bind = Some(port);
                }
            }
        }

        let port_to_bind = port_to_bind.unwrap_or(default_port);
        map.insert(consts::BIND_PORT_KEY.into(), port_to_bind.to_string());

        match env_value(self.name, consts::DUBBO_PORT_TO_REGISTRY) {
            Some(value) => parse_port(&value),
            None => Ok(port_to_bind),
        }
    }

    /// Connect to each non-multicast registry with a bounded timeout and
    /// take the local address of the first connection that succeeds.
    /// Best-effort: failures only warn.
    fn probe_registries(&self) -> Option<String> {
        for registry in self.registries {
            if registry.protocol() == consts::MULTICAST
                || registry.parameter(consts::REGISTRY_KEY) == Some(consts::MULTICAST)
            {
                continue;
            }
            match probe_local_address(registry.host(), registry.port()) {
                Ok(local) => {
                    debug!("Resolved bind host {} via registry {}", local, registry.address());
                    return Some(local);
                }
                Err(e) => {
                    warn!("Failed to probe registry {}: {}", registry.address(), e);
                }
            }
        }
        None
    }
}

/// Local address of a short-lived TCP connection to `host:port`. The
/// socket closes on every exit path.
fn probe_local_address(host: &str, port: u16) -> std::io::Result<String> {
    let mut last_error = None;
    match (host, port).to_socket_addrs() {
        Ok(addrs) => {
            for addr in addrs {
                match TcpStream::connect_timeout(&addr, PROBE_TIMEOUT) {
                    Ok(stream) => return Ok(stream.local_addr()?.ip().to_string()),
                    Err(e) => last_error = Some(e),
                }
            }
        }
        Err(e) => last_error = Some(e),
    }
    Err(last_error
        .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no address")))
}

/// Environment lookup with the uppercased protocol name as a key prefix,
/// falling back to the bare key. Empty values count as unset.
fn env_value(protocol: &str, key: &str) -> Option<String> {
    let prefixed = format!("{}_{}", protocol.to_uppercase(), key);
    std::env::var(prefixed)
        .ok()
        .filter(|v| !v.is_empty())
        .or_else(|| std::env::var(key).ok().filter(|v| !v.is_empty()))
}

/// Hosts that cannot serve as a bind or advertised address.
pub fn is_invalid_local_host(host: &str) -> bool {
    host.is_empty()
        || host.eq_ignore_ascii_case("localhost")
        || host == consts::ANYHOST_VALUE
        || host.starts_with("127.")
}

/// Parse an explicitly configured port; anything non-numeric or outside
/// `[1, 65535]` is an error.
pub fn parse_port(value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .ok()
        .filter(|p| *p > 0)
        .ok_or_else(|| {
            DubboError::Config(format!("Specified invalid port from env value: {}", value))
        })
}

/// Scan for a bindable port starting at `start` (or the random-port base
/// when `start` is 0).
pub fn available_port(start: u16) -> Result<u16> {
    let start = if start == 0 { RND_PORT_START } else { start };
    for port in start..=u16::MAX {
        if TcpListener::bind((consts::ANYHOST_VALUE, port)).is_ok() {
            return Ok(port);
        }
    }
    Err(DubboError::Config(format!(
        "No available port found from {}",
        start
    )))
}

/// Default local-interface lookup: the source address the OS would route
/// outbound traffic through. No packets are sent.
fn default_local_probe() -> Option<IpAddr> {
    let socket = UdpSocket::bind((consts::ANYHOST_VALUE, 0)).ok()?;
    socket.connect(("8.8.8.8", 53)).ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn no_local_host() -> Option<IpAddr> {
        None
    }

    fn loopback_local_host() -> Option<IpAddr> {
        Some(IpAddr::from([127, 0, 0, 1]))
    }

    #[test]
    fn test_invalid_local_host() {
        assert!(is_invalid_local_host(""));
        assert!(is_invalid_local_host("localhost"));
        assert!(is_invalid_local_host("LOCALHOST"));
        assert!(is_invalid_local_host("0.0.0.0"));
        assert!(is_invalid_local_host("127.0.0.1"));
        assert!(!is_invalid_local_host("192.168.1.10"));
    }

    #[test]
    fn test_parse_port() {
        assert_eq!(parse_port("20880").unwrap(), 20880);
        assert!(parse_port("0").is_err());
        assert!(parse_port("70000").is_err());
        assert!(parse_port("abc").is_err());
    }

    #[test]
    fn test_host_from_env() {
        std::env::set_var("ENVHOSTP_DUBBO_IP_TO_BIND", "10.0.0.9");
        let protocol = ProtocolConfig::named("envhostp");
        let resolver = AddressResolver::new("envhostp", &protocol, None, &[]);
        let mut map = ParameterMap::new();
        let host = resolver.find_host(&mut map).unwrap();
        assert_eq!(host, "10.0.0.9");
        assert_eq!(map.get("bind.ip").map(String::as_str), Some("10.0.0.9"));
        assert_eq!(map.get("anyhost").map(String::as_str), Some("false"));
    }

    #[test]
    fn test_invalid_env_host_rejected() {
        std::env::set_var("ENVBADP_DUBBO_IP_TO_BIND", "0.0.0.0");
        let protocol = ProtocolConfig::named("envbadp");
        let resolver = AddressResolver::new("envbadp", &protocol, None, &[]);
        let mut map = ParameterMap::new();
        assert!(resolver.find_host(&mut map).is_err());
    }

    #[test]
    fn test_host_from_protocol_config() {
        let protocol = ProtocolConfig::named("cfghostp").with_host("192.168.1.10");
        let resolver = AddressResolver::new("cfghostp", &protocol, None, &[]);
        let mut map = ParameterMap::new();
        assert_eq!(resolver.find_host(&mut map).unwrap(), "192.168.1.10");
        assert_eq!(map.get("anyhost").map(String::as_str), Some("false"));
    }

    #[test]
    fn test_host_from_provider_config() {
        let protocol = ProtocolConfig::named("provhostp");
        let provider = ProviderConfig {
            host: Some("192.168.1.11".into()),
            ..Default::default()
        };
        let resolver = AddressResolver::new("provhostp", &protocol, Some(&provider), &[]);
        let mut map = ParameterMap::new();
        assert_eq!(resolver.find_host(&mut map).unwrap(), "192.168.1.11");
    }

    #[test]
    fn test_probe_chain_marks_anyhost() {
        // no env, no config host, local lookup yields loopback: the
        // registry probe and the final fallback both land on loopback,
        // and the host counts as auto-discovered either way.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let registries = vec![Url::new("tcp", "127.0.0.1", port, "")];

        let protocol = ProtocolConfig::named("probep");
        let resolver = AddressResolver::new("probep", &protocol, None, &registries)
            .with_local_probe(loopback_local_host);
        let mut map = ParameterMap::new();
        let host = resolver.find_host(&mut map).unwrap();
        assert_eq!(host, "127.0.0.1");
        assert_eq!(map.get("anyhost").map(String::as_str), Some("true"));
        assert_eq!(map.get("bind.ip").map(String::as_str), Some("127.0.0.1"));
    }

    #[test]
    fn test_multicast_registry_skipped() {
        let registries = vec![Url::new("multicast", "224.5.6.7", 1234, "")];
        let protocol = ProtocolConfig::named("mcastp");
        let resolver = AddressResolver::new("mcastp", &protocol, None, &registries)
            .with_local_probe(no_local_host);
        let mut map = ParameterMap::new();
        assert_eq!(resolver.find_host(&mut map).unwrap(), "127.0.0.1");
        assert_eq!(map.get("anyhost").map(String::as_str), Some("true"));
    }

    #[test]
    fn test_registry_host_overrides_bind() {
        std::env::set_var("REGHOSTP_DUBBO_IP_TO_REGISTRY", "203.0.113.7");
        let protocol = ProtocolConfig::named("reghostp").with_host("192.168.1.10");
        let resolver = AddressResolver::new("reghostp", &protocol, None, &[]);
        let mut map = ParameterMap::new();
        let host = resolver.find_host(&mut map).unwrap();
        assert_eq!(host, "203.0.113.7");
        assert_eq!(map.get("bind.ip").map(String::as_str), Some("192.168.1.10"));
    }

    #[test]
    fn test_port_priority() {
        // protocol config beats the transport default
        let protocol = ProtocolConfig::named("portp").with_port(20990);
        let resolver = AddressResolver::new("portp", &protocol, None, &[]);
        let mut map = ParameterMap::new();
        assert_eq!(resolver.find_port(20880, &mut map).unwrap(), 20990);
        assert_eq!(map.get("bind.port").map(String::as_str), Some("20990"));

        // transport default when nothing else is set
        let protocol = ProtocolConfig::named("portq");
        let resolver = AddressResolver::new("portq", &protocol, None, &[]);
        let mut map = ParameterMap::new();
        assert_eq!(resolver.find_port(20880, &mut map).unwrap(), 20880);
    }

    #[test]
    fn test_port_from_env() {
        std::env::set_var("ENVPORTP_DUBBO_PORT_TO_BIND", "21000");
        let protocol = ProtocolConfig::named("envportp").with_port(20990);
        let resolver = AddressResolver::new("envportp", &protocol, None, &[]);
        let mut map = ParameterMap::new();
        assert_eq!(resolver.find_port(20880, &mut map).unwrap(), 21000);
    }

    #[test]
    fn test_invalid_env_port_rejected() {
        std::env::set_var("BADPORTP_DUBBO_PORT_TO_BIND", "99999");
        let protocol = ProtocolConfig::named("badportp");
        let resolver = AddressResolver::new("badportp", &protocol, None, &[]);
        let mut map = ParameterMap::new();
        assert!(resolver.find_port(20880, &mut map).is_err());
    }

    #[test]
    fn test_registry_port_env_override() {
        std::env::set_var("REGPORTP_DUBBO_PORT_TO_REGISTRY", "25000");
        let protocol = ProtocolConfig::named("regportp").with_port(20990);
        let resolver = AddressResolver::new("regportp", &protocol, None, &[]);
        let mut map = ParameterMap::new();
        assert_eq!(resolver.find_port(20880, &mut map).unwrap(), 25000);
        assert_eq!(map.get("bind.port").map(String::as_str), Some("20990"));
    }

    #[test]
    fn test_random_port_cached_per_protocol() {
        let protocol = ProtocolConfig::named("randp");
        let resolver = AddressResolver::new("randp", &protocol, None, &[]);
        let mut map = ParameterMap::new();
        let first = resolver.find_port(0, &mut map).unwrap();
        assert!(first >= RND_PORT_START);

        let mut map = ParameterMap::new();
        let second = resolver.find_port(0, &mut map).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_record_random_port_first_wins() {
        record_random_port("firstwinsp", 31001);
        record_random_port("firstwinsp", 31002);
        assert_eq!(random_port("firstwinsp"), Some(31001));
        assert_eq!(random_port("FIRSTWINSP"), Some(31001));
    }

    #[test]
    fn test_available_port_scans() {
        let port = available_port(0).unwrap();
        assert!(port >= RND_PORT_START);
        // the scan must land on a port that is actually bindable
        TcpListener::bind(("0.0.0.0", port)).unwrap();
    }
}
