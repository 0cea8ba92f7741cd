use super::AttributeType;
use crate::packet::PacketError;
use std::net::Ipv4Addr;

/// RADIUS attribute TLV (RFC 2865 §5)
///
/// ```text
///  0                   1                   2
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     Type      |    Length     |  Value ...
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// `Length` counts the two header octets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub attr_type: u8,
    pub value: Vec<u8>,
}

/// Decoded Vendor-Specific (26) payload carrying a single sub-attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorSpecific {
    pub vendor_id: u32,
    pub vendor_type: u8,
    pub value: Vec<u8>,
}

impl Attribute {
    pub const HEADER_LENGTH: usize = 2;
    pub const MAX_LENGTH: usize = 255;
    pub const MAX_VALUE_LENGTH: usize = Self::MAX_LENGTH - Self::HEADER_LENGTH;

    pub fn new(attr_type: u8, value: Vec<u8>) -> Result<Self, PacketError> {
        if value.len() > Self::MAX_VALUE_LENGTH {
            return Err(PacketError::AttributeError(format!(
                "value of attribute {} is {} bytes (max {})",
                attr_type,
                value.len(),
                Self::MAX_VALUE_LENGTH
            )));
        }
        Ok(Attribute { attr_type, value })
    }

    /// Text attribute, raw UTF-8 bytes with no terminator
    pub fn string(attr_type: u8, value: impl Into<String>) -> Result<Self, PacketError> {
        Self::new(attr_type, value.into().into_bytes())
    }

    /// Address attribute, four raw octets
    pub fn ipv4(attr_type: u8, value: Ipv4Addr) -> Result<Self, PacketError> {
        Self::new(attr_type, value.octets().to_vec())
    }

    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let mut buffer = Vec::with_capacity(self.encoded_length());
        self.encode_into(&mut buffer)?;
        Ok(buffer)
    }

    /// Append the TLV to `buffer`
    pub fn encode_into(&self, buffer: &mut Vec<u8>) -> Result<(), PacketError> {
        let length = self.encoded_length();
        if length > Self::MAX_LENGTH {
            return Err(PacketError::AttributeError(format!(
                "encoded attribute {} is {} bytes",
                self.attr_type, length
            )));
        }
        buffer.push(self.attr_type);
        buffer.push(length as u8);
        buffer.extend_from_slice(&self.value);
        Ok(())
    }

    /// Decode the first TLV in `data`; trailing bytes are left to the caller
    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < Self::HEADER_LENGTH {
            return Err(PacketError::AttributeError(format!(
                "truncated attribute header: {} bytes",
                data.len()
            )));
        }

        let attr_type = data[0];
        let length = data[1] as usize;
        if length < Self::HEADER_LENGTH {
            return Err(PacketError::AttributeError(format!(
                "attribute {} declares length {}",
                attr_type, length
            )));
        }
        if data.len() < length {
            return Err(PacketError::AttributeError(format!(
                "attribute {} needs {} bytes, {} available",
                attr_type,
                length,
                data.len()
            )));
        }

        Ok(Attribute {
            attr_type,
            value: data[Self::HEADER_LENGTH..length].to_vec(),
        })
    }

    pub fn encoded_length(&self) -> usize {
        Self::HEADER_LENGTH + self.value.len()
    }

    pub fn as_string(&self) -> Result<String, std::string::FromUtf8Error> {
        String::from_utf8(self.value.clone())
    }

    pub fn as_integer(&self) -> Result<u32, PacketError> {
        let bytes: [u8; 4] = self.value.as_slice().try_into().map_err(|_| {
            PacketError::AttributeError(format!(
                "expected 4 bytes for integer, got {}",
                self.value.len()
            ))
        })?;
        Ok(u32::from_be_bytes(bytes))
    }

    pub fn as_ipv4(&self) -> Result<Ipv4Addr, PacketError> {
        let bytes: [u8; 4] = self.value.as_slice().try_into().map_err(|_| {
            PacketError::AttributeError(format!(
                "expected 4 bytes for IPv4 address, got {}",
                self.value.len()
            ))
        })?;
        Ok(Ipv4Addr::from(bytes))
    }

    /// Split a Vendor-Specific attribute into vendor id and sub-attribute
    pub fn as_vendor_specific(&self) -> Result<VendorSpecific, PacketError> {
        if self.attr_type != AttributeType::VendorSpecific as u8 || self.value.len() < 6 {
            return Err(PacketError::AttributeError(
                "not a Vendor-Specific attribute".to_string(),
            ));
        }
        let vendor_id = u32::from_be_bytes([
            self.value[0],
            self.value[1],
            self.value[2],
            self.value[3],
        ]);
        let vendor_type = self.value[4];
        let sub_length = self.value[5] as usize;
        if sub_length < Self::HEADER_LENGTH || 4 + sub_length > self.value.len() {
            return Err(PacketError::AttributeError(format!(
                "vendor {} sub-attribute length {} out of range",
                vendor_id, sub_length
            )));
        }
        Ok(VendorSpecific {
            vendor_id,
            vendor_type,
            value: self.value[6..4 + sub_length].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nas_ip_attribute() {
        let attr = Attribute::ipv4(AttributeType::NasIpAddress as u8, Ipv4Addr::new(10, 0, 0, 5))
            .unwrap();
        assert_eq!(attr.encode().unwrap(), vec![4, 6, 10, 0, 0, 5]);
        assert_eq!(attr.as_ipv4().unwrap(), Ipv4Addr::new(10, 0, 0, 5));
    }

    #[test]
    fn test_integer_attribute() {
        let seconds = 3600u32.to_be_bytes().to_vec();
        let attr = Attribute::new(AttributeType::SessionTimeout as u8, seconds).unwrap();
        assert_eq!(attr.as_integer().unwrap(), 3600);
        assert!(Attribute::string(1, "abc").unwrap().as_integer().is_err());
    }

    #[test]
    fn test_vendor_specific_split() {
        // Mikrotik-Rate-Limit (vendor 14988, type 8)
        let mut payload = 14988u32.to_be_bytes().to_vec();
        payload.extend_from_slice(&[8, 8]);
        payload.extend_from_slice(b"5M/20M");
        let attr = Attribute::new(AttributeType::VendorSpecific as u8, payload).unwrap();

        let vsa = attr.as_vendor_specific().unwrap();
        assert_eq!(vsa.vendor_id, 14988);
        assert_eq!(vsa.vendor_type, 8);
        assert_eq!(vsa.value, b"5M/20M");
    }

    #[test]
    fn test_vendor_specific_rejects_bad_sub_length() {
        let mut payload = 14988u32.to_be_bytes().to_vec();
        payload.extend_from_slice(&[8, 40, b'x']);
        let attr = Attribute::new(AttributeType::VendorSpecific as u8, payload).unwrap();
        assert!(attr.as_vendor_specific().is_err());
        assert!(Attribute::string(1, "alice").unwrap().as_vendor_specific().is_err());
    }

    #[test]
    fn test_value_too_long() {
        assert!(Attribute::new(1, vec![0u8; 254]).is_err());
        assert!(Attribute::new(1, vec![0u8; 253]).is_ok());
    }

    #[test]
    fn test_decode_rejects_bad_length() {
        assert!(Attribute::decode(&[1, 1]).is_err());
        assert!(Attribute::decode(&[1, 10, b'a']).is_err());
    }
}
