//! NAS-IP-Address detection
//!
//! Picks the IPv4 address this host presents as NAS-IP-Address in RADIUS
//! traffic. Candidates are tried in a fixed order and the first usable one
//! wins:
//!
//! 1. the advertised-IP override (`RADIUS_IP`)
//! 2. a manual override passed by the caller (persisted system setting)
//! 3. the source address of the outbound route to a well-known host
//! 4. conventional interface names (`eth0`, `ens*`, `en0`, ...)
//! 5. a scan of every interface, private ranges before public ones
//!
//! A loopback or unspecified address is never returned.

use crate::config::{ConfigError, NasConfig};
use serde::Serialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const FALLBACK_WARNING: &str = "Using fallback IP detection - may not be reachable";

/// Whether an address sits in an RFC 1918 range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressClass {
    Private,
    Public,
}

impl AddressClass {
    pub fn of(address: Ipv4Addr) -> Self {
        if address.is_private() {
            AddressClass::Private
        } else {
            AddressClass::Public
        }
    }
}

/// Which step of the detection chain produced an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AddressSource {
    EnvOverride,
    ManualOverride,
    OutboundRoute,
    WellKnownInterface,
    InterfaceScanFallback,
}

impl fmt::Display for AddressSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AddressSource::EnvOverride => "env-override",
            AddressSource::ManualOverride => "manual-override",
            AddressSource::OutboundRoute => "outbound-route",
            AddressSource::WellKnownInterface => "well-known-interface",
            AddressSource::InterfaceScanFallback => "interface-scan-fallback",
        };
        f.write_str(s)
    }
}

/// A resolved NAS address. Built fresh on every resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkAddress {
    pub address: Ipv4Addr,
    /// Interface carrying the address, "unknown" for overrides
    pub interface_name: String,
    pub classification: AddressClass,
    pub source: AddressSource,
}

impl NetworkAddress {
    fn new(address: Ipv4Addr, interface_name: impl Into<String>, source: AddressSource) -> Self {
        NetworkAddress {
            address,
            interface_name: interface_name.into(),
            classification: AddressClass::of(address),
            source,
        }
    }
}

/// Successful resolution plus anything worth telling the operator
#[derive(Debug, Clone)]
pub struct Resolution {
    pub address: NetworkAddress,
    pub warnings: Vec<String>,
}

#[derive(Error, Debug, Clone)]
#[error("no usable non-loopback IPv4 address found: {}", errors.join("; "))]
pub struct ResolutionError {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

/// One interface and the addresses bound to it
#[derive(Debug, Clone)]
pub struct InterfaceAddrs {
    pub name: String,
    pub addresses: Vec<IpAddr>,
}

impl InterfaceAddrs {
    pub fn new(name: impl Into<String>, addresses: Vec<IpAddr>) -> Self {
        InterfaceAddrs {
            name: name.into(),
            addresses,
        }
    }

    fn first_usable(&self) -> Option<Ipv4Addr> {
        self.addresses.iter().find_map(|ip| usable_ip(*ip))
    }
}

/// Host networking facts the resolver depends on
pub trait InterfaceSource: Send + Sync {
    /// Every interface with its bound addresses
    fn interfaces(&self) -> Vec<InterfaceAddrs>;

    /// Source address the kernel would pick to reach `target`
    fn outbound_address(&self, target: SocketAddr) -> Option<IpAddr>;
}

/// Reads interfaces through `pnet` and the routing table through a connected UDP socket
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemInterfaces;

impl InterfaceSource for SystemInterfaces {
    fn interfaces(&self) -> Vec<InterfaceAddrs> {
        pnet::datalink::interfaces()
            .into_iter()
            .map(|iface| {
                let addresses = iface.ips.iter().map(|net| net.ip()).collect();
                InterfaceAddrs::new(iface.name, addresses)
            })
            .collect()
    }

    fn outbound_address(&self, target: SocketAddr) -> Option<IpAddr> {
        // connect() on UDP only selects a route, nothing goes on the wire
        let socket = UdpSocket::bind(("0.0.0.0", 0)).ok()?;
        socket.connect(target).ok()?;
        socket.local_addr().ok().map(|addr| addr.ip())
    }
}

/// Parse an operator-supplied literal as a usable IPv4 address
pub fn parse_usable_ipv4(candidate: &str) -> Option<Ipv4Addr> {
    let candidate = candidate.trim();
    if candidate.eq_ignore_ascii_case("localhost") || candidate == "::1" {
        return None;
    }
    candidate.parse::<Ipv4Addr>().ok().and_then(|ip| usable_ip(IpAddr::V4(ip)))
}

fn usable_ip(ip: IpAddr) -> Option<Ipv4Addr> {
    match ip {
        IpAddr::V4(v4) if !v4.is_loopback() && !v4.is_unspecified() => Some(v4),
        _ => None,
    }
}

fn matches_pattern(name: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => name == pattern,
    }
}

/// Prioritized NAS address detection
pub struct IpResolver {
    advertised_ip: Option<String>,
    route_target: SocketAddr,
    interface_priority: Vec<String>,
    source: Arc<dyn InterfaceSource>,
}

impl IpResolver {
    /// Build a resolver over the host's real interfaces
    pub fn from_config(config: &NasConfig) -> Result<Self, ConfigError> {
        Ok(IpResolver {
            advertised_ip: config.advertised_ip.clone(),
            route_target: config.route_target()?,
            interface_priority: config.interface_priority.clone(),
            source: Arc::new(SystemInterfaces),
        })
    }

    /// Replace the host interface source
    pub fn with_source(mut self, source: Arc<dyn InterfaceSource>) -> Self {
        self.source = source;
        self
    }

    /// Resolve the NAS address, trying `manual_override` after the advertised override
    pub fn resolve(&self, manual_override: Option<&str>) -> Result<Resolution, ResolutionError> {
        let mut warnings = Vec::new();

        let overrides = [
            (self.advertised_ip.as_deref(), AddressSource::EnvOverride),
            (manual_override, AddressSource::ManualOverride),
        ];
        for (value, source) in overrides {
            let Some(value) = value.filter(|v| !v.trim().is_empty()) else {
                continue;
            };
            match parse_usable_ipv4(value) {
                Some(ip) => {
                    debug!(address = %ip, source = %source, "Using configured NAS address");
                    return Ok(self.finish(NetworkAddress::new(ip, "unknown", source), warnings));
                }
                None => {
                    warn!(
                        value = %value,
                        source = %source,
                        "Ignoring unusable NAS address override"
                    );
                    warnings.push(format!(
                        "{} '{}' is not a usable non-loopback IPv4 address, ignored",
                        source, value
                    ));
                }
            }
        }

        let interfaces = self.source.interfaces();

        if let Some(found) = self.outbound_route(&interfaces) {
            return Ok(self.finish(found, warnings));
        }
        debug!(target = %self.route_target, "Outbound route gave no usable address");

        if let Some(found) = self.well_known_interface(&interfaces) {
            return Ok(self.finish(found, warnings));
        }

        if let Some(found) = Self::scan_all(&interfaces) {
            warn!(
                address = %found.address,
                interface = %found.interface_name,
                "Using fallback IP detection"
            );
            warnings.push(FALLBACK_WARNING.to_string());
            return Ok(self.finish(found, warnings));
        }

        let errors = vec![format!(
            "none of {} interfaces carries a non-loopback IPv4 address",
            interfaces.len()
        )];
        Err(ResolutionError { warnings, errors })
    }

    fn finish(&self, address: NetworkAddress, warnings: Vec<String>) -> Resolution {
        info!(
            address = %address.address,
            interface = %address.interface_name,
            source = %address.source,
            "Resolved NAS-IP-Address"
        );
        Resolution { address, warnings }
    }

    fn outbound_route(&self, interfaces: &[InterfaceAddrs]) -> Option<NetworkAddress> {
        let local = self.source.outbound_address(self.route_target).and_then(usable_ip)?;
        let interface_name = interfaces
            .iter()
            .find(|iface| iface.addresses.contains(&IpAddr::V4(local)))
            .map(|iface| iface.name.as_str())
            .unwrap_or("unknown");
        Some(NetworkAddress::new(local, interface_name, AddressSource::OutboundRoute))
    }

    fn well_known_interface(&self, interfaces: &[InterfaceAddrs]) -> Option<NetworkAddress> {
        for pattern in &self.interface_priority {
            let mut matching: Vec<&InterfaceAddrs> = interfaces
                .iter()
                .filter(|iface| matches_pattern(&iface.name, pattern))
                .collect();
            matching.sort_by(|a, b| a.name.cmp(&b.name));

            for iface in matching {
                if let Some(ip) = iface.first_usable() {
                    return Some(NetworkAddress::new(
                        ip,
                        iface.name.clone(),
                        AddressSource::WellKnownInterface,
                    ));
                }
            }
        }
        None
    }

    fn scan_all(interfaces: &[InterfaceAddrs]) -> Option<NetworkAddress> {
        let candidates = interfaces.iter().flat_map(|iface| {
            iface
                .addresses
                .iter()
                .filter_map(|ip| usable_ip(*ip))
                .map(move |ip| (iface.name.as_str(), ip))
        });

        let mut first_public = None;
        for (name, ip) in candidates {
            if ip.is_private() {
                return Some(NetworkAddress::new(ip, name, AddressSource::InterfaceScanFallback));
            }
            if first_public.is_none() {
                first_public = Some((name, ip));
            }
        }
        first_public
            .map(|(name, ip)| NetworkAddress::new(ip, name, AddressSource::InterfaceScanFallback))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeHost {
        interfaces: Vec<InterfaceAddrs>,
        outbound: Option<IpAddr>,
    }

    impl InterfaceSource for FakeHost {
        fn interfaces(&self) -> Vec<InterfaceAddrs> {
            self.interfaces.clone()
        }

        fn outbound_address(&self, _target: SocketAddr) -> Option<IpAddr> {
            self.outbound
        }
    }

    fn iface(name: &str, addrs: &[&str]) -> InterfaceAddrs {
        InterfaceAddrs::new(name, addrs.iter().map(|a| a.parse().unwrap()).collect())
    }

    fn resolver(advertised: Option<&str>, host: FakeHost) -> IpResolver {
        let config = NasConfig {
            advertised_ip: advertised.map(String::from),
            ..NasConfig::default()
        };
        IpResolver::from_config(&config).unwrap().with_source(Arc::new(host))
    }

    fn typical_host() -> FakeHost {
        FakeHost {
            interfaces: vec![
                iface("lo", &["127.0.0.1", "::1"]),
                iface("docker0", &["172.17.0.1"]),
                iface("ens3", &["192.168.1.20"]),
                iface("wg0", &["10.8.0.2"]),
            ],
            outbound: Some("10.8.0.2".parse().unwrap()),
        }
    }

    #[test]
    fn test_parse_usable_ipv4() {
        assert_eq!(parse_usable_ipv4("10.0.0.1"), Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(parse_usable_ipv4(" 203.0.113.7 "), Some(Ipv4Addr::new(203, 0, 113, 7)));
        assert_eq!(parse_usable_ipv4("127.0.0.1"), None);
        assert_eq!(parse_usable_ipv4("127.8.9.1"), None);
        assert_eq!(parse_usable_ipv4("::1"), None);
        assert_eq!(parse_usable_ipv4("localhost"), None);
        assert_eq!(parse_usable_ipv4("0.0.0.0"), None);
        assert_eq!(parse_usable_ipv4("256.1.1.1"), None);
        assert_eq!(parse_usable_ipv4("10.0.0"), None);
    }

    #[test]
    fn test_env_override_wins() {
        let r = resolver(Some("198.51.100.4"), typical_host());
        let res = r.resolve(Some("192.168.1.99")).unwrap();
        assert_eq!(res.address.address, Ipv4Addr::new(198, 51, 100, 4));
        assert_eq!(res.address.source, AddressSource::EnvOverride);
        assert_eq!(res.address.classification, AddressClass::Public);
        assert!(res.warnings.is_empty());
    }

    #[test]
    fn test_unparseable_override_falls_through() {
        let r = resolver(Some("not-an-ip"), typical_host());
        let res = r.resolve(None).unwrap();
        assert_eq!(res.address.source, AddressSource::OutboundRoute);
        assert_eq!(res.warnings.len(), 1);
        assert!(res.warnings[0].contains("not-an-ip"));
    }

    #[test]
    fn test_manual_override_when_env_invalid() {
        let r = resolver(Some("127.0.0.1"), typical_host());
        let res = r.resolve(Some("192.168.1.99")).unwrap();
        assert_eq!(res.address.address, Ipv4Addr::new(192, 168, 1, 99));
        assert_eq!(res.address.source, AddressSource::ManualOverride);
        assert_eq!(res.warnings.len(), 1);
    }

    #[test]
    fn test_outbound_route_before_interface_names() {
        let r = resolver(None, typical_host());
        let res = r.resolve(None).unwrap();
        assert_eq!(res.address.address, Ipv4Addr::new(10, 8, 0, 2));
        assert_eq!(res.address.interface_name, "wg0");
        assert_eq!(res.address.source, AddressSource::OutboundRoute);
    }

    #[test]
    fn test_well_known_interface_when_no_route() {
        let mut host = typical_host();
        host.outbound = None;
        let res = resolver(None, host).resolve(None).unwrap();
        assert_eq!(res.address.interface_name, "ens3");
        assert_eq!(res.address.source, AddressSource::WellKnownInterface);
    }

    #[test]
    fn test_loopback_route_is_skipped() {
        let mut host = typical_host();
        host.outbound = Some("127.0.0.1".parse().unwrap());
        let res = resolver(None, host).resolve(None).unwrap();
        assert_eq!(res.address.source, AddressSource::WellKnownInterface);
    }

    #[test]
    fn test_scan_prefers_private() {
        let host = FakeHost {
            interfaces: vec![
                iface("lo", &["127.0.0.1"]),
                iface("uplink", &["203.0.113.9"]),
                iface("lan", &["fe80::1", "10.1.1.1"]),
            ],
            outbound: None,
        };
        let res = resolver(None, host).resolve(None).unwrap();
        assert_eq!(res.address.address, Ipv4Addr::new(10, 1, 1, 1));
        assert_eq!(res.address.interface_name, "lan");
        assert_eq!(res.address.source, AddressSource::InterfaceScanFallback);
        assert_eq!(res.warnings, vec![FALLBACK_WARNING.to_string()]);
    }

    #[test]
    fn test_scan_falls_back_to_public() {
        let host = FakeHost {
            interfaces: vec![iface("uplink", &["203.0.113.9"])],
            outbound: None,
        };
        let res = resolver(None, host).resolve(None).unwrap();
        assert_eq!(res.address.address, Ipv4Addr::new(203, 0, 113, 9));
        assert_eq!(res.address.classification, AddressClass::Public);
    }

    #[test]
    fn test_loopback_only_host_fails() {
        let host = FakeHost {
            interfaces: vec![iface("lo", &["127.0.0.1", "::1"])],
            outbound: Some("127.0.0.1".parse().unwrap()),
        };
        let err = resolver(Some("::1"), host).resolve(Some("localhost")).unwrap_err();
        assert_eq!(err.warnings.len(), 2);
        assert_eq!(err.errors.len(), 1);
    }

    #[test]
    fn test_pattern_matching() {
        assert!(matches_pattern("ens192", "ens*"));
        assert!(matches_pattern("eth0", "eth0"));
        assert!(!matches_pattern("eth01", "eth0"));
        assert!(!matches_pattern("veth12", "eth*"));
    }
}
