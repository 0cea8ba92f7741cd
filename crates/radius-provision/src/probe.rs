//! RADIUS connectivity probe
//!
//! Sends a single Access-Request and reports whether a RADIUS server answers.
//! An Access-Reject is a healthy answer: the probe uses throwaway credentials
//! and only cares that the server is reachable and speaking RADIUS.

use crate::config::ProbeConfig;
use crate::resolver::{IpResolver, NetworkAddress};
use crate::vendor::VendorAttribute;
use radius_proto::{
    encrypt_user_password, generate_identifier, generate_request_authenticator, peek_code,
    verify_response_authenticator, Attribute, AttributeType, Code, Packet, PacketError,
};
use serde::Serialize;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

pub const DEFAULT_PORT: u16 = 1812;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Parameters of one connectivity test
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub host: String,
    pub port: u16,
    pub secret: String,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
    /// Manual NAS address, tried after the advertised override
    pub nas_address: Option<String>,
}

impl ProbeRequest {
    pub fn new(host: impl Into<String>, secret: impl Into<String>) -> Self {
        ProbeRequest {
            host: host.into(),
            port: DEFAULT_PORT,
            secret: secret.into(),
            username: "test".to_string(),
            password: "test".to_string(),
            timeout: DEFAULT_TIMEOUT,
            nas_address: None,
        }
    }

    /// Start from configured probe defaults
    pub fn from_config(
        config: &ProbeConfig,
        host: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        ProbeRequest {
            port: config.port,
            username: config.test_username.clone(),
            password: config.test_password.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
            ..Self::new(host, secret)
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_nas_address(mut self, nas_address: impl Into<String>) -> Self {
        self.nas_address = Some(nas_address.into());
        self
    }
}

/// Why a probe failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeFailure {
    /// No NAS address could be determined; nothing was sent
    Resolution,
    /// The Access-Request could not be built
    Encoding,
    /// Nothing came back before the timeout
    NoResponse,
    /// Socket or name resolution error
    Network,
    /// A reply arrived that is neither Access-Accept nor Access-Reject
    UnexpectedResponseCode,
}

/// Diagnostic detail attached to every probe result
#[derive(Debug, Clone, Serialize)]
pub struct ProbeDetails {
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nas_address: Option<NetworkAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_code: Option<u8>,
    pub elapsed_ms: u64,
    pub status: String,
    /// Whether the Response Authenticator verified under the shared secret
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authenticator_valid: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Attributes carried by the reply, one `name = value` line each
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reply_attributes: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RadiusProbeResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<ProbeFailure>,
    pub details: ProbeDetails,
}

/// Build the Access-Request a probe sends
pub fn build_access_request(
    username: &str,
    password: &str,
    secret: &[u8],
    nas_ip: Ipv4Addr,
) -> Result<Packet, PacketError> {
    let authenticator = generate_request_authenticator();
    let mut packet = Packet::new(Code::AccessRequest, generate_identifier(), authenticator);

    packet.add_attribute(Attribute::string(AttributeType::UserName as u8, username)?);
    let hidden = encrypt_user_password(password, secret, &authenticator)?;
    packet.add_attribute(Attribute::new(AttributeType::UserPassword as u8, hidden)?);
    packet.add_attribute(Attribute::ipv4(AttributeType::NasIpAddress as u8, nas_ip)?);

    Ok(packet)
}

/// Connectivity tester bound to a NAS address resolver
pub struct RadiusProbe {
    resolver: Arc<IpResolver>,
}

impl RadiusProbe {
    pub fn new(resolver: Arc<IpResolver>) -> Self {
        RadiusProbe { resolver }
    }

    /// Send one Access-Request and classify the answer. Never returns an error:
    /// every failure is folded into the result.
    pub async fn test_connection(&self, request: &ProbeRequest) -> RadiusProbeResult {
        let mut details = ProbeDetails {
            host: request.host.clone(),
            port: request.port,
            nas_address: None,
            identifier: None,
            response_code: None,
            elapsed_ms: 0,
            status: "not sent".to_string(),
            authenticator_valid: None,
            error: None,
            reply_attributes: Vec::new(),
            warnings: Vec::new(),
        };

        let resolution = match self.resolver.resolve(request.nas_address.as_deref()) {
            Ok(resolution) => resolution,
            Err(e) => {
                warn!(host = %request.host, error = %e, "RADIUS probe aborted: no NAS address");
                details.warnings = e.warnings.clone();
                details.status = "nas address unresolved".to_string();
                return fail(
                    ProbeFailure::Resolution,
                    format!("Cannot determine NAS-IP-Address: {}", e),
                    details,
                    e.to_string(),
                );
            }
        };
        details.warnings = resolution.warnings;
        let nas_ip = resolution.address.address;
        details.nas_address = Some(resolution.address);

        let packet = match build_access_request(
            &request.username,
            &request.password,
            request.secret.as_bytes(),
            nas_ip,
        ) {
            Ok(packet) => packet,
            Err(e) => {
                details.status = "encoding failed".to_string();
                return fail(
                    ProbeFailure::Encoding,
                    format!("Failed to build Access-Request: {}", e),
                    details,
                    e.to_string(),
                );
            }
        };
        details.identifier = Some(packet.identifier);

        let started = Instant::now();
        let exchanged = self.exchange(request, &packet).await;
        details.elapsed_ms = started.elapsed().as_millis() as u64;

        let response = match exchanged {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                details.status = "timeout".to_string();
                info!(
                    host = %request.host,
                    port = request.port,
                    elapsed_ms = details.elapsed_ms,
                    "RADIUS probe timed out"
                );
                let message = format!(
                    "No response from {}:{} within {} ms",
                    request.host,
                    request.port,
                    request.timeout.as_millis()
                );
                return fail(ProbeFailure::NoResponse, message.clone(), details, message);
            }
            Err(e) => {
                details.status = "network error".to_string();
                warn!(
                    host = %request.host,
                    port = request.port,
                    error = %e,
                    "RADIUS probe network error"
                );
                return fail(
                    ProbeFailure::Network,
                    format!("Network error talking to {}:{}: {}", request.host, request.port, e),
                    details,
                    e.to_string(),
                );
            }
        };

        let code = peek_code(&response);
        details.response_code = code;

        match code.and_then(Code::from_u8) {
            Some(code @ (Code::AccessAccept | Code::AccessReject)) => {
                details.status = code.name().to_string();
                self.check_reply(&response, &packet, request, &mut details);
                let message = if code == Code::AccessAccept {
                    "RADIUS server responding, credentials accepted"
                } else {
                    "RADIUS server responding, test credentials rejected"
                };
                info!(
                    host = %request.host,
                    code = %code,
                    elapsed_ms = details.elapsed_ms,
                    "RADIUS probe succeeded"
                );
                RadiusProbeResult {
                    success: true,
                    message: message.to_string(),
                    failure: None,
                    details,
                }
            }
            _ => {
                let shown = code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string());
                details.status = "unexpected response".to_string();
                let message = format!("Unexpected response code: {}", shown);
                fail(ProbeFailure::UnexpectedResponseCode, message.clone(), details, message)
            }
        }
    }

    /// Ok(None) on timeout
    async fn exchange(
        &self,
        request: &ProbeRequest,
        packet: &Packet,
    ) -> std::io::Result<Option<Vec<u8>>> {
        let data = packet
            .encode()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let target = tokio::net::lookup_host((request.host.as_str(), request.port))
            .await?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} did not resolve to any address", request.host),
                )
            })?;
        let socket = UdpSocket::bind(local_bind_address(&target)).await?;
        socket.connect(target).await?;
        debug!(
            host = %request.host,
            port = request.port,
            identifier = packet.identifier,
            bytes = data.len(),
            "Sending Access-Request"
        );
        socket.send(&data).await?;

        let mut buffer = vec![0u8; Packet::MAX_PACKET_SIZE];
        match tokio::time::timeout(request.timeout, socket.recv(&mut buffer)).await {
            Ok(received) => {
                let len = received?;
                buffer.truncate(len);
                Ok(Some(buffer))
            }
            Err(_) => Ok(None),
        }
    }

    fn check_reply(
        &self,
        response: &[u8],
        request_packet: &Packet,
        request: &ProbeRequest,
        details: &mut ProbeDetails,
    ) {
        match Packet::decode(response) {
            Ok(reply) => {
                if reply.identifier != request_packet.identifier {
                    details.warnings.push(format!(
                        "reply identifier {} does not match request {}",
                        reply.identifier, request_packet.identifier
                    ));
                }
                let valid = verify_response_authenticator(
                    &reply,
                    &request_packet.authenticator,
                    request.secret.as_bytes(),
                );
                if !valid {
                    details.warnings.push(
                        "Response Authenticator mismatch, check the shared secret".to_string(),
                    );
                }
                details.authenticator_valid = Some(valid);
                details.reply_attributes =
                    reply.attributes.iter().map(describe_attribute).collect();
            }
            Err(e) => {
                details.warnings.push(format!("reply could not be decoded: {}", e));
                details.authenticator_valid = Some(false);
            }
        }
    }
}

/// Wildcard local address in the same family as the server
fn local_bind_address(target: &SocketAddr) -> SocketAddr {
    match target {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    }
}

/// Render a reply attribute for display
pub fn describe_attribute(attribute: &Attribute) -> String {
    if let Some((known, value)) = VendorAttribute::from_wire(attribute) {
        return format!("{} = {}", known.name, value);
    }

    let Some(attr_type) = AttributeType::from_u8(attribute.attr_type) else {
        return format!("Attr-{} ({} bytes)", attribute.attr_type, attribute.value.len());
    };
    let value = match attr_type {
        AttributeType::NasIpAddress | AttributeType::FramedIpAddress => {
            attribute.as_ipv4().map(|ip| ip.to_string()).ok()
        }
        AttributeType::ServiceType
        | AttributeType::FramedProtocol
        | AttributeType::SessionTimeout
        | AttributeType::IdleTimeout
        | AttributeType::AcctInterimInterval => {
            attribute.as_integer().map(|n| n.to_string()).ok()
        }
        AttributeType::UserPassword | AttributeType::VendorSpecific => None,
        _ => attribute.as_string().ok(),
    };
    match value {
        Some(value) => format!("{} = {}", attr_type.name(), value),
        None => format!("{} ({} bytes)", attr_type.name(), attribute.value.len()),
    }
}

fn fail(
    kind: ProbeFailure,
    message: String,
    mut details: ProbeDetails,
    error: String,
) -> RadiusProbeResult {
    details.error = Some(error);
    RadiusProbeResult {
        success: false,
        message,
        failure: Some(kind),
        details,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radius_proto::reveal_user_password;

    #[test]
    fn test_build_access_request_layout() {
        let nas_ip = Ipv4Addr::new(10, 0, 0, 1);
        let packet = build_access_request("test", "test", b"testing123", nas_ip).unwrap();
        let bytes = packet.encode().unwrap();

        assert_eq!(bytes[0], 1);
        let len = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        // header + User-Name(2+4) + User-Password(2+16) + NAS-IP-Address(2+4)
        assert_eq!(len, 20 + 6 + 18 + 6);
        assert_eq!(len, bytes.len());
        assert_eq!(&bytes[4..20], &packet.authenticator);

        let nas = packet.find_attribute(AttributeType::NasIpAddress as u8).unwrap();
        assert_eq!(nas.value, vec![10, 0, 0, 1]);
    }

    #[test]
    fn test_password_round_trip() {
        let nas_ip = Ipv4Addr::new(10, 0, 0, 1);
        let packet = build_access_request("test", "test", b"testing123", nas_ip).unwrap();
        let decoded = Packet::decode(&packet.encode().unwrap()).unwrap();
        let hidden = decoded.find_attribute(AttributeType::UserPassword as u8).unwrap();
        assert_eq!(hidden.value.len(), 16);

        let revealed = reveal_user_password(&hidden.value, b"testing123", &decoded.authenticator)
            .unwrap();
        let mut expected = b"test".to_vec();
        expected.resize(16, 0);
        assert_eq!(revealed, expected);
    }

    #[test]
    fn test_local_bind_address_follows_family() {
        let v4: SocketAddr = "192.0.2.10:1812".parse().unwrap();
        assert_eq!(local_bind_address(&v4), "0.0.0.0:0".parse::<SocketAddr>().unwrap());

        let v6: SocketAddr = "[2001:db8::1]:1812".parse().unwrap();
        assert_eq!(local_bind_address(&v6), "[::]:0".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_describe_attribute() {
        let seconds = 3600u32.to_be_bytes().to_vec();
        let timeout = Attribute::new(AttributeType::SessionTimeout as u8, seconds).unwrap();
        assert_eq!(describe_attribute(&timeout), "Session-Timeout = 3600");

        let framed_ip = Ipv4Addr::new(10, 0, 0, 5);
        let framed = Attribute::ipv4(AttributeType::FramedIpAddress as u8, framed_ip).unwrap();
        assert_eq!(describe_attribute(&framed), "Framed-IP-Address = 10.0.0.5");

        let message = Attribute::string(AttributeType::ReplyMessage as u8, "Welcome").unwrap();
        assert_eq!(describe_attribute(&message), "Reply-Message = Welcome");

        let mut rate = 14988u32.to_be_bytes().to_vec();
        rate.extend_from_slice(&[8, 8]);
        rate.extend_from_slice(b"5M/20M");
        let rate = Attribute::new(AttributeType::VendorSpecific as u8, rate).unwrap();
        assert_eq!(describe_attribute(&rate), "Mikrotik-Rate-Limit = 5M/20M");

        let unknown = Attribute::new(200, vec![1, 2, 3]).unwrap();
        assert_eq!(describe_attribute(&unknown), "Attr-200 (3 bytes)");
    }

    #[test]
    fn test_request_defaults() {
        let request = ProbeRequest::new("radius.local", "s3cret");
        assert_eq!(request.port, 1812);
        assert_eq!(request.timeout, Duration::from_millis(5000));
        assert_eq!(request.username, "test");

        let config = ProbeConfig {
            port: 11812,
            timeout_ms: 250,
            ..ProbeConfig::default()
        };
        let request = ProbeRequest::from_config(&config, "radius.local", "s3cret")
            .with_credentials("probe", "probe-pass");
        assert_eq!(request.port, 11812);
        assert_eq!(request.timeout, Duration::from_millis(250));
        assert_eq!(request.username, "probe");
        assert_eq!(request.secret, "s3cret");
    }
}
