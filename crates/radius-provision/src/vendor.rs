//! Vendor-specific bandwidth attributes
//!
//! Each NAS family reads rate limits from different RADIUS attributes. The
//! profile is chosen from the router's stored `type` and owns the directory
//! rendering (attribute name plus value text). The same table decodes the
//! attributes a server sends back in an Access-Accept.

use radius_proto::{Attribute, AttributeType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Download/upload cap in Mbps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeedLimit {
    pub download_mbps: u32,
    pub upload_mbps: u32,
}

impl SpeedLimit {
    pub fn new(download_mbps: u32, upload_mbps: u32) -> Self {
        SpeedLimit {
            download_mbps,
            upload_mbps,
        }
    }
}

impl fmt::Display for SpeedLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} Mbps", self.download_mbps, self.upload_mbps)
    }
}

/// How an attribute's directory value is put on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Integer,
}

/// A reply attribute as known to the FreeRADIUS dictionary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VendorAttribute {
    pub name: &'static str,
    /// None for standard attributes
    pub vendor_id: Option<u32>,
    pub number: u8,
    pub kind: ValueKind,
}

pub const MIKROTIK_VENDOR_ID: u32 = 14988;
pub const WISPR_VENDOR_ID: u32 = 14122;
pub const ERX_VENDOR_ID: u32 = 4874;

pub const MIKROTIK_RATE_LIMIT: VendorAttribute = VendorAttribute {
    name: "Mikrotik-Rate-Limit",
    vendor_id: Some(MIKROTIK_VENDOR_ID),
    number: 8,
    kind: ValueKind::Text,
};

pub const WISPR_MAX_UP: VendorAttribute = VendorAttribute {
    name: "WISPr-Bandwidth-Max-Up",
    vendor_id: Some(WISPR_VENDOR_ID),
    number: 7,
    kind: ValueKind::Integer,
};

pub const WISPR_MAX_DOWN: VendorAttribute = VendorAttribute {
    name: "WISPr-Bandwidth-Max-Down",
    vendor_id: Some(WISPR_VENDOR_ID),
    number: 8,
    kind: ValueKind::Integer,
};

pub const ERX_INGRESS_POLICY: VendorAttribute = VendorAttribute {
    name: "ERX-Ingress-Policy-Name",
    vendor_id: Some(ERX_VENDOR_ID),
    number: 10,
    kind: ValueKind::Text,
};

pub const ERX_EGRESS_POLICY: VendorAttribute = VendorAttribute {
    name: "ERX-Egress-Policy-Name",
    vendor_id: Some(ERX_VENDOR_ID),
    number: 11,
    kind: ValueKind::Text,
};

pub const FILTER_ID: VendorAttribute = VendorAttribute {
    name: "Filter-Id",
    vendor_id: None,
    number: AttributeType::FilterId as u8,
    kind: ValueKind::Text,
};

const KNOWN_ATTRIBUTES: [VendorAttribute; 6] = [
    MIKROTIK_RATE_LIMIT,
    WISPR_MAX_UP,
    WISPR_MAX_DOWN,
    ERX_INGRESS_POLICY,
    ERX_EGRESS_POLICY,
    FILTER_ID,
];

impl VendorAttribute {
    /// Recognise a speed attribute received on the wire and render its value
    /// the way the directory stores it. None for anything else.
    pub fn from_wire(attribute: &Attribute) -> Option<(VendorAttribute, String)> {
        let is_vsa = attribute.attr_type == AttributeType::VendorSpecific as u8;
        let (vendor_id, number, payload) = if is_vsa {
            let vsa = attribute.as_vendor_specific().ok()?;
            (Some(vsa.vendor_id), vsa.vendor_type, vsa.value)
        } else {
            (None, attribute.attr_type, attribute.value.clone())
        };

        let known = KNOWN_ATTRIBUTES
            .into_iter()
            .find(|a| a.vendor_id == vendor_id && a.number == number)?;
        let value = match known.kind {
            ValueKind::Text => String::from_utf8(payload).ok()?,
            ValueKind::Integer => {
                let bytes: [u8; 4] = payload.as_slice().try_into().ok()?;
                u32::from_be_bytes(bytes).to_string()
            }
        };
        Some((known, value))
    }
}

/// Bandwidth attribute family of a NAS vendor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VendorProfile {
    Mikrotik,
    Ubiquiti,
    Juniper,
    Generic,
}

impl VendorProfile {
    pub const ALL: [VendorProfile; 4] = [
        VendorProfile::Mikrotik,
        VendorProfile::Ubiquiti,
        VendorProfile::Juniper,
        VendorProfile::Generic,
    ];

    /// Map a router `type` column to a profile. Unknown types use `Generic`.
    pub fn from_router_type(router_type: &str) -> Self {
        match router_type.trim().to_ascii_lowercase().as_str() {
            "mikrotik" | "routeros" => VendorProfile::Mikrotik,
            "ubiquiti" | "unifi" | "edgerouter" | "wispr" => VendorProfile::Ubiquiti,
            "juniper" | "erx" | "junos" => VendorProfile::Juniper,
            _ => VendorProfile::Generic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VendorProfile::Mikrotik => "mikrotik",
            VendorProfile::Ubiquiti => "ubiquiti",
            VendorProfile::Juniper => "juniper",
            VendorProfile::Generic => "generic",
        }
    }

    /// Attributes this profile writes for a speed limit
    pub fn attributes(&self) -> &'static [VendorAttribute] {
        match self {
            VendorProfile::Mikrotik => &[MIKROTIK_RATE_LIMIT],
            VendorProfile::Ubiquiti => &[WISPR_MAX_DOWN, WISPR_MAX_UP],
            VendorProfile::Juniper => &[ERX_INGRESS_POLICY, ERX_EGRESS_POLICY],
            VendorProfile::Generic => &[FILTER_ID],
        }
    }

    /// Directory values for a speed limit
    pub fn encode_speed(&self, speed: SpeedLimit) -> Vec<(VendorAttribute, String)> {
        let SpeedLimit {
            download_mbps: down,
            upload_mbps: up,
        } = speed;
        match self {
            // rx/tx as seen by the router: upload first
            VendorProfile::Mikrotik => vec![(MIKROTIK_RATE_LIMIT, format!("{}M/{}M", up, down))],
            VendorProfile::Ubiquiti => vec![
                (WISPR_MAX_DOWN, (u64::from(down) * 1_000_000).to_string()),
                (WISPR_MAX_UP, (u64::from(up) * 1_000_000).to_string()),
            ],
            VendorProfile::Juniper => vec![
                (ERX_INGRESS_POLICY, format!("rate-limit-{}k", u64::from(down) * 1000)),
                (ERX_EGRESS_POLICY, format!("rate-limit-{}k", u64::from(up) * 1000)),
            ],
            VendorProfile::Generic => vec![(FILTER_ID, format!("speed-{}M-{}M", down, up))],
        }
    }

    /// Recover a speed limit from `(attribute, value)` reply rows written by this profile
    pub fn decode_speed<'a, I>(&self, rows: I) -> Option<SpeedLimit>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let rows: Vec<(&str, &str)> = rows.into_iter().collect();
        let value_of = |attr: &VendorAttribute| {
            rows.iter()
                .find(|(name, _)| *name == attr.name)
                .map(|(_, value)| value.trim())
        };

        match self {
            VendorProfile::Mikrotik => {
                let value = value_of(&MIKROTIK_RATE_LIMIT)?;
                // "up/down" optionally followed by burst settings
                let rate = value.split_whitespace().next()?;
                let (up, down) = rate.split_once('/')?;
                Some(SpeedLimit::new(parse_mbps(down)?, parse_mbps(up)?))
            }
            VendorProfile::Ubiquiti => {
                let down: u64 = value_of(&WISPR_MAX_DOWN)?.parse().ok()?;
                let up: u64 = value_of(&WISPR_MAX_UP)?.parse().ok()?;
                Some(SpeedLimit::new(
                    u32::try_from(down / 1_000_000).ok()?,
                    u32::try_from(up / 1_000_000).ok()?,
                ))
            }
            VendorProfile::Juniper => {
                let down = parse_policy_kbps(value_of(&ERX_INGRESS_POLICY)?)?;
                let up = parse_policy_kbps(value_of(&ERX_EGRESS_POLICY)?)?;
                Some(SpeedLimit::new(
                    u32::try_from(down / 1000).ok()?,
                    u32::try_from(up / 1000).ok()?,
                ))
            }
            VendorProfile::Generic => {
                let value = value_of(&FILTER_ID)?;
                let rest = value.strip_prefix("speed-")?;
                let (down, up) = rest.split_once('-')?;
                Some(SpeedLimit::new(parse_mbps(down)?, parse_mbps(up)?))
            }
        }
    }

    /// Try every profile, returning the first that recognises the rows
    pub fn detect_speed<'a, I>(rows: I) -> Option<(VendorProfile, SpeedLimit)>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let rows: Vec<(&str, &str)> = rows.into_iter().collect();
        Self::ALL
            .iter()
            .find_map(|profile| profile.decode_speed(rows.iter().copied()).map(|s| (*profile, s)))
    }

    /// Every speed attribute name across profiles
    pub fn all_speed_attribute_names() -> Vec<&'static str> {
        let mut names: Vec<&'static str> = Self::ALL
            .iter()
            .flat_map(|p| p.attributes().iter().map(|a| a.name))
            .collect();
        names.dedup();
        names
    }
}

impl fmt::Display for VendorProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn parse_mbps(value: &str) -> Option<u32> {
    let value = value.trim();
    let digits = value
        .strip_suffix('M')
        .or_else(|| value.strip_suffix('m'))
        .unwrap_or(value);
    digits.parse().ok()
}

fn parse_policy_kbps(value: &str) -> Option<u64> {
    value.strip_prefix("rate-limit-")?.strip_suffix('k')?.parse().ok()
}
