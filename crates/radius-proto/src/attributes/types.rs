/// Standard attribute types touched by NAS-side provisioning and probing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AttributeType {
    /// User-Name (1)
    UserName = 1,
    /// User-Password (2), hidden per RFC 2865 §5.2
    UserPassword = 2,
    /// NAS-IP-Address (4)
    NasIpAddress = 4,
    /// Service-Type (6)
    ServiceType = 6,
    /// Framed-Protocol (7)
    FramedProtocol = 7,
    /// Framed-IP-Address (8)
    FramedIpAddress = 8,
    /// Filter-Id (11)
    FilterId = 11,
    /// Reply-Message (18)
    ReplyMessage = 18,
    /// Vendor-Specific (26)
    VendorSpecific = 26,
    /// Session-Timeout (27)
    SessionTimeout = 27,
    /// Idle-Timeout (28)
    IdleTimeout = 28,
    /// NAS-Identifier (32)
    NasIdentifier = 32,
    /// Acct-Interim-Interval (85), RFC 2869
    AcctInterimInterval = 85,
}

impl AttributeType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(AttributeType::UserName),
            2 => Some(AttributeType::UserPassword),
            4 => Some(AttributeType::NasIpAddress),
            6 => Some(AttributeType::ServiceType),
            7 => Some(AttributeType::FramedProtocol),
            8 => Some(AttributeType::FramedIpAddress),
            11 => Some(AttributeType::FilterId),
            18 => Some(AttributeType::ReplyMessage),
            26 => Some(AttributeType::VendorSpecific),
            27 => Some(AttributeType::SessionTimeout),
            28 => Some(AttributeType::IdleTimeout),
            32 => Some(AttributeType::NasIdentifier),
            85 => Some(AttributeType::AcctInterimInterval),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// FreeRADIUS dictionary name
    pub fn name(self) -> &'static str {
        match self {
            AttributeType::UserName => "User-Name",
            AttributeType::UserPassword => "User-Password",
            AttributeType::NasIpAddress => "NAS-IP-Address",
            AttributeType::ServiceType => "Service-Type",
            AttributeType::FramedProtocol => "Framed-Protocol",
            AttributeType::FramedIpAddress => "Framed-IP-Address",
            AttributeType::FilterId => "Filter-Id",
            AttributeType::ReplyMessage => "Reply-Message",
            AttributeType::VendorSpecific => "Vendor-Specific",
            AttributeType::SessionTimeout => "Session-Timeout",
            AttributeType::IdleTimeout => "Idle-Timeout",
            AttributeType::NasIdentifier => "NAS-Identifier",
            AttributeType::AcctInterimInterval => "Acct-Interim-Interval",
        }
    }
}
