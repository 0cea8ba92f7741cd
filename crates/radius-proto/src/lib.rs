//! RADIUS protocol support for NAS-side clients
//!
//! Encoding and decoding of RFC 2865 packets and attributes, including
//! Vendor-Specific sub-attributes, plus the MD5-based User-Password hiding
//! and authenticator calculations a client needs to talk to a server.
//!
//! # Example
//!
//! ```rust
//! use radius_proto::{Attribute, AttributeType, Code, Packet};
//! use radius_proto::auth::{encrypt_user_password, generate_request_authenticator};
//! use std::net::Ipv4Addr;
//!
//! let req_auth = generate_request_authenticator();
//! let mut packet = Packet::new(Code::AccessRequest, 1, req_auth);
//! packet.add_attribute(Attribute::string(AttributeType::UserName as u8, "alice").unwrap());
//!
//! let hidden = encrypt_user_password("password", b"secret", &req_auth).unwrap();
//! packet.add_attribute(Attribute::new(AttributeType::UserPassword as u8, hidden).unwrap());
//! packet.add_attribute(
//!     Attribute::ipv4(AttributeType::NasIpAddress as u8, Ipv4Addr::new(10, 0, 0, 1)).unwrap(),
//! );
//!
//! let bytes = packet.encode().unwrap();
//! assert_eq!(bytes.len(), 20 + 7 + 18 + 6);
//! ```

pub mod attributes;
pub mod auth;
pub mod packet;

pub use attributes::{Attribute, AttributeType, VendorSpecific};
pub use auth::{
    calculate_response_authenticator, decrypt_user_password, encrypt_user_password,
    generate_identifier, generate_request_authenticator, reveal_user_password,
    verify_response_authenticator,
};
pub use packet::{peek_code, Code, Packet, PacketError};
