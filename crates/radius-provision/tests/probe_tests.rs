//! Connectivity probe against local UDP responders
//!
//! Each test binds a throwaway socket on 127.0.0.1 that plays the RADIUS
//! server: answering with a chosen code, answering with a bad
//! authenticator, or staying silent.

use radius_proto::auth::{calculate_response_authenticator, decrypt_user_password};
use radius_proto::{Attribute, AttributeType, Code, Packet};
use radius_provision::config::NasConfig;
use radius_provision::probe::{ProbeFailure, ProbeRequest, RadiusProbe};
use radius_provision::resolver::{AddressSource, InterfaceAddrs, InterfaceSource, IpResolver};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::time::Duration;

const SECRET: &str = "testing123";

fn probe() -> RadiusProbe {
    let nas = NasConfig {
        advertised_ip: Some("10.0.0.1".to_string()),
        ..NasConfig::default()
    };
    let resolver = IpResolver::from_config(&nas).expect("resolver");
    RadiusProbe::new(Arc::new(resolver))
}

/// Answer one request with `code`, reporting the decoded request.
/// With `sign` false the reply carries a zero authenticator.
async fn responder(code: Code, sign: bool) -> (SocketAddr, oneshot::Receiver<Packet>) {
    responder_with(code, sign, Vec::new()).await
}

/// Like `responder`, with reply attributes attached
async fn responder_with(
    code: Code,
    sign: bool,
    attributes: Vec<Attribute>,
) -> (SocketAddr, oneshot::Receiver<Packet>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
    let addr = socket.local_addr().expect("local addr");
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let mut buf = vec![0u8; 4096];
        let (len, peer) = socket.recv_from(&mut buf).await.expect("recv");
        let request = Packet::decode(&buf[..len]).expect("decode request");

        let mut reply = Packet::new(code, request.identifier, [0u8; 16]);
        for attribute in attributes {
            reply.add_attribute(attribute);
        }
        if sign {
            reply.authenticator =
                calculate_response_authenticator(&reply, &request.authenticator, SECRET.as_bytes())
                    .expect("authenticator");
        }
        let bytes = reply.encode().expect("encode reply");
        socket.send_to(&bytes, peer).await.expect("send");
        let _ = tx.send(request);
    });

    (addr, rx)
}

fn request_to(addr: SocketAddr) -> ProbeRequest {
    ProbeRequest::new(addr.ip().to_string(), SECRET)
        .with_port(addr.port())
        .with_timeout(Duration::from_millis(2000))
}

#[tokio::test]
async fn test_reject_counts_as_reachable() {
    let (addr, seen) = responder(Code::AccessReject, true).await;

    let result = probe().test_connection(&request_to(addr)).await;

    assert!(result.success, "{}", result.message);
    assert!(result.failure.is_none());
    assert_eq!(result.details.response_code, Some(3));
    assert_eq!(result.details.authenticator_valid, Some(true));
    assert!(result.details.warnings.is_empty());

    let nas = result.details.nas_address.expect("nas address");
    assert_eq!(nas.address, Ipv4Addr::new(10, 0, 0, 1));
    assert_eq!(nas.source, AddressSource::EnvOverride);

    let request = seen.await.expect("request seen");
    assert_eq!(request.code, Code::AccessRequest);
    let user = request
        .find_attribute(AttributeType::UserName as u8)
        .expect("User-Name");
    assert_eq!(user.value, b"test");
    let hidden = request
        .find_attribute(AttributeType::UserPassword as u8)
        .expect("User-Password");
    assert_eq!(hidden.value.len(), 16);
    let password = decrypt_user_password(&hidden.value, SECRET.as_bytes(), &request.authenticator)
        .expect("password");
    assert_eq!(password, "test");
    let nas_ip = request
        .find_attribute(AttributeType::NasIpAddress as u8)
        .expect("NAS-IP-Address");
    assert_eq!(nas_ip.value, vec![10, 0, 0, 1]);
}

#[tokio::test]
async fn test_accept_is_success() {
    let (addr, _seen) = responder(Code::AccessAccept, true).await;

    let request = request_to(addr).with_credentials("alice", "a-much-longer-password");
    let result = probe().test_connection(&request).await;

    assert!(result.success);
    assert_eq!(result.details.response_code, Some(2));
}

#[tokio::test]
async fn test_accept_reply_attributes_are_listed() {
    let mut rate = 14988u32.to_be_bytes().to_vec();
    rate.extend_from_slice(&[8, 9]);
    rate.extend_from_slice(b"10M/50M");
    let attributes = vec![
        Attribute::new(AttributeType::VendorSpecific as u8, rate).expect("vsa"),
        Attribute::new(AttributeType::SessionTimeout as u8, 86400u32.to_be_bytes().to_vec())
            .expect("session timeout"),
    ];
    let (addr, _seen) = responder_with(Code::AccessAccept, true, attributes).await;

    let result = probe().test_connection(&request_to(addr)).await;

    assert!(result.success, "{}", result.message);
    assert_eq!(result.details.authenticator_valid, Some(true));
    assert_eq!(
        result.details.reply_attributes,
        vec![
            "Mikrotik-Rate-Limit = 10M/50M".to_string(),
            "Session-Timeout = 86400".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_ipv6_server_is_reachable() {
    let socket = match UdpSocket::bind("[::1]:0").await {
        Ok(socket) => socket,
        // host without IPv6 loopback
        Err(_) => return,
    };
    let addr = socket.local_addr().expect("local addr");
    tokio::spawn(async move {
        let mut buf = vec![0u8; 4096];
        let (len, peer) = socket.recv_from(&mut buf).await.expect("recv");
        let request = Packet::decode(&buf[..len]).expect("decode request");
        let mut reply = Packet::new(Code::AccessReject, request.identifier, [0u8; 16]);
        reply.authenticator =
            calculate_response_authenticator(&reply, &request.authenticator, SECRET.as_bytes())
                .expect("authenticator");
        let bytes = reply.encode().expect("encode reply");
        socket.send_to(&bytes, peer).await.expect("send");
    });

    let request = ProbeRequest::new("::1", SECRET)
        .with_port(addr.port())
        .with_timeout(Duration::from_millis(2000));
    let result = probe().test_connection(&request).await;

    assert!(result.success, "{}", result.message);
    assert_eq!(result.details.response_code, Some(3));
    assert_eq!(result.details.authenticator_valid, Some(true));
}

#[tokio::test]
async fn test_wrong_secret_is_flagged_not_failed() {
    let (addr, _seen) = responder(Code::AccessReject, false).await;

    let result = probe().test_connection(&request_to(addr)).await;

    assert!(result.success);
    assert_eq!(result.details.authenticator_valid, Some(false));
    assert!(!result.details.warnings.is_empty());
}

#[tokio::test]
async fn test_unexpected_code_fails() {
    let (addr, _seen) = responder(Code::AccessChallenge, true).await;

    let result = probe().test_connection(&request_to(addr)).await;

    assert!(!result.success);
    assert_eq!(result.failure, Some(ProbeFailure::UnexpectedResponseCode));
    assert_eq!(result.details.response_code, Some(11));
}

#[tokio::test]
async fn test_silent_server_times_out() {
    let silent = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
    let addr = silent.local_addr().expect("local addr");

    let request = request_to(addr).with_timeout(Duration::from_millis(200));
    let result = probe().test_connection(&request).await;

    assert!(!result.success);
    assert_eq!(result.failure, Some(ProbeFailure::NoResponse));
    assert_eq!(result.details.status, "timeout");
    assert!(result.details.elapsed_ms >= 150);
    drop(silent);
}

/// A host with only a loopback interface and no default route
struct LoopbackOnly;

impl InterfaceSource for LoopbackOnly {
    fn interfaces(&self) -> Vec<InterfaceAddrs> {
        vec![InterfaceAddrs::new("lo", vec![IpAddr::V4(Ipv4Addr::LOCALHOST)])]
    }

    fn outbound_address(&self, _target: SocketAddr) -> Option<IpAddr> {
        None
    }
}

#[tokio::test]
async fn test_unresolvable_nas_address_sends_nothing() {
    let nas = NasConfig {
        advertised_ip: Some("127.0.0.1".to_string()),
        ..NasConfig::default()
    };
    let resolver = IpResolver::from_config(&nas)
        .expect("resolver")
        .with_source(Arc::new(LoopbackOnly));
    let probe = RadiusProbe::new(Arc::new(resolver));

    let request = ProbeRequest::new("127.0.0.1", SECRET).with_nas_address("0.0.0.0");
    let result = probe.test_connection(&request).await;

    assert!(!result.success);
    assert_eq!(result.failure, Some(ProbeFailure::Resolution));
    assert!(result.details.nas_address.is_none());
    assert!(result.details.identifier.is_none());
    assert_eq!(result.details.warnings.len(), 2);
}
