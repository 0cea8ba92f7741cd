use super::Code;
use crate::attributes::Attribute;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PacketError {
    #[error("Invalid packet length: {0}")]
    InvalidLength(usize),
    #[error("Invalid packet code: {0}")]
    InvalidCode(u8),
    #[error("Attribute error: {0}")]
    AttributeError(String),
    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),
    #[error("User-Password too long: {0} bytes (max 128)")]
    PasswordTooLong(usize),
}

/// RADIUS packet (RFC 2865 §3)
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     Code      |  Identifier   |            Length             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                         Authenticator (16)                    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Attributes ...
/// +-+-+-+-+-+-+-+-+-+-+-+-+-
/// ```
#[derive(Debug, Clone)]
pub struct Packet {
    pub code: Code,
    /// Matches a reply to its request
    pub identifier: u8,
    /// Request Authenticator on requests, Response Authenticator on replies
    pub authenticator: [u8; 16],
    pub attributes: Vec<Attribute>,
}

impl Packet {
    /// Header size: code + identifier + length + authenticator
    pub const HEADER_SIZE: usize = 20;
    /// Upper bound from RFC 2865 §3
    pub const MAX_PACKET_SIZE: usize = 4096;

    pub fn new(code: Code, identifier: u8, authenticator: [u8; 16]) -> Self {
        Packet {
            code,
            identifier,
            authenticator,
            attributes: Vec::new(),
        }
    }

    pub fn add_attribute(&mut self, attribute: Attribute) {
        self.attributes.push(attribute);
    }

    /// Serialize to wire format. The length field is computed as
    /// `20 + sum(attribute lengths)`.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let total_length = self.length();
        if total_length > Self::MAX_PACKET_SIZE {
            return Err(PacketError::PacketTooLarge(total_length));
        }

        let mut buffer = Vec::with_capacity(total_length);
        buffer.push(self.code.as_u8());
        buffer.push(self.identifier);
        buffer.extend_from_slice(&(total_length as u16).to_be_bytes());
        buffer.extend_from_slice(&self.authenticator);
        for attr in &self.attributes {
            attr.encode_into(&mut buffer)?;
        }

        Ok(buffer)
    }

    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < Self::HEADER_SIZE {
            return Err(PacketError::InvalidLength(data.len()));
        }

        let code = Code::from_u8(data[0]).ok_or(PacketError::InvalidCode(data[0]))?;
        let identifier = data[1];
        let length = u16::from_be_bytes([data[2], data[3]]) as usize;

        if !(Self::HEADER_SIZE..=Self::MAX_PACKET_SIZE).contains(&length) || data.len() < length {
            return Err(PacketError::InvalidLength(length));
        }

        let mut authenticator = [0u8; 16];
        authenticator.copy_from_slice(&data[4..Self::HEADER_SIZE]);

        // Octets past the length field are padding and must be ignored
        let mut remaining = &data[Self::HEADER_SIZE..length];
        let mut attributes = Vec::new();
        while !remaining.is_empty() {
            let attr = Attribute::decode(remaining)?;
            remaining = &remaining[attr.encoded_length()..];
            attributes.push(attr);
        }

        Ok(Packet {
            code,
            identifier,
            authenticator,
            attributes,
        })
    }

    /// Encoded length of the whole packet
    pub fn length(&self) -> usize {
        Self::HEADER_SIZE
            + self
                .attributes
                .iter()
                .map(Attribute::encoded_length)
                .sum::<usize>()
    }

    pub fn find_attribute(&self, attr_type: u8) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.attr_type == attr_type)
    }
}

/// Read the raw code octet of a datagram without decoding the rest.
///
/// A reply whose body fails to decode (e.g. garbled by a shared-secret
/// mismatch on a middlebox) still carries a meaningful first octet.
pub fn peek_code(data: &[u8]) -> Option<u8> {
    data.first().copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::AttributeType;

    #[test]
    fn test_header_layout() {
        let mut packet = Packet::new(Code::AccessRequest, 7, [9u8; 16]);
        packet.add_attribute(Attribute::string(AttributeType::UserName as u8, "test").unwrap());
        let bytes = packet.encode().unwrap();

        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[1], 7);
        assert_eq!(u16::from_be_bytes([bytes[2], bytes[3]]) as usize, 20 + 6);
        assert_eq!(&bytes[4..20], &[9u8; 16]);
        assert_eq!(&bytes[20..], &[1, 6, b't', b'e', b's', b't']);
    }

    #[test]
    fn test_decode_reply() {
        let packet = Packet::new(Code::AccessReject, 42, [1u8; 16]);
        let decoded = Packet::decode(&packet.encode().unwrap()).unwrap();

        assert_eq!(decoded.code, Code::AccessReject);
        assert_eq!(decoded.identifier, 42);
        assert!(decoded.attributes.is_empty());
    }

    #[test]
    fn test_decode_ignores_trailing_padding() {
        let packet = Packet::new(Code::AccessAccept, 1, [0u8; 16]);
        let mut bytes = packet.encode().unwrap();
        bytes.extend_from_slice(&[0xff, 0xff]);
        assert!(Packet::decode(&bytes).is_ok());
    }

    #[test]
    fn test_decode_short_datagram() {
        assert!(Packet::decode(&[2u8; 19]).is_err());
        assert_eq!(peek_code(&[3u8; 4]), Some(3));
        assert_eq!(peek_code(&[]), None);
    }
}
