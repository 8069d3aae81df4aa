//! ESM identifiers and value types
//!
//! Identifier newtypes and the canonical enumerations used throughout the
//! engine (TS 24.301, TS 23.003, TS 23.203). Wire values are translated at
//! the boundary with `TryFrom<u8>`.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::Bytes;

use crate::cause::EsmCause;
use crate::error::EsmError;

// ============================================================================
// Identifiers
// ============================================================================

/// Procedure Transaction Identity (TS 24.301 Section 9.4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Pti(pub u8);

impl Pti {
    /// No procedure transaction identity assigned
    pub const UNASSIGNED: Pti = Pti(0);
    /// Lowest assignable value
    pub const MIN: u8 = 1;
    /// Highest assignable value (255 is reserved)
    pub const MAX: u8 = 254;

    /// Raw value
    pub fn value(self) -> u8 {
        self.0
    }

    /// True for the unassigned value 0
    pub fn is_unassigned(self) -> bool {
        self.0 == 0
    }

    /// True if the value may be bound to a procedure
    pub fn is_assignable(self) -> bool {
        (Self::MIN..=Self::MAX).contains(&self.0)
    }
}

impl fmt::Display for Pti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PTI[{}]", self.0)
    }
}

/// EPS Bearer Identity (TS 24.301 Section 9.3.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ebi(pub u8);

impl Ebi {
    /// No EPS bearer identity assigned
    pub const UNASSIGNED: Ebi = Ebi(0);
    /// Lowest EPS bearer identity
    pub const MIN: u8 = 5;
    /// Highest EPS bearer identity
    pub const MAX: u8 = 15;

    /// Raw value
    pub fn value(self) -> u8 {
        self.0
    }

    /// True for the unassigned value 0
    pub fn is_unassigned(self) -> bool {
        self.0 == 0
    }

    /// True if the value lies in 5..=15
    pub fn is_valid(self) -> bool {
        (Self::MIN..=Self::MAX).contains(&self.0)
    }
}

impl fmt::Display for Ebi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EBI[{}]", self.0)
    }
}

/// PDN connection identifier, local to one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PdnCid(pub u8);

impl PdnCid {
    /// Raw value
    pub fn value(self) -> u8 {
        self.0
    }
}

impl fmt::Display for PdnCid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CID[{}]", self.0)
    }
}

/// Subscription context identifier of the APN configuration (TS 29.272)
pub type ContextId = u32;

// ============================================================================
// PDN type / request type
// ============================================================================

/// PDN type (TS 24.301 Section 9.9.4.10)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PdnType {
    #[default]
    /// IPv4
    Ipv4 = 1,
    /// IPv6
    Ipv6 = 2,
    /// IPv4v6
    Ipv4v6 = 3,
}

impl TryFrom<u8> for PdnType {
    type Error = EsmError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PdnType::Ipv4),
            2 => Ok(PdnType::Ipv6),
            3 => Ok(PdnType::Ipv4v6),
            _ => Err(EsmError::Rejected(EsmCause::UnknownPdnType)),
        }
    }
}

impl fmt::Display for PdnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PdnType::Ipv4 => write!(f, "IPv4"),
            PdnType::Ipv6 => write!(f, "IPv6"),
            PdnType::Ipv4v6 => write!(f, "IPv4v6"),
        }
    }
}

/// Request type (TS 24.301 Section 9.9.4.14)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum RequestType {
    #[default]
    /// Initial request
    Initial = 1,
    /// Handover
    Handover = 2,
    /// Emergency
    Emergency = 4,
}

impl RequestType {
    /// True for emergency bearer services
    pub fn is_emergency(self) -> bool {
        self == RequestType::Emergency
    }
}

impl TryFrom<u8> for RequestType {
    type Error = EsmError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(RequestType::Initial),
            2 => Ok(RequestType::Handover),
            4 => Ok(RequestType::Emergency),
            _ => Err(EsmError::Rejected(EsmCause::InvalidMandatoryInformation)),
        }
    }
}

/// PDN address assigned to the UE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdnAddress {
    /// IPv4 address
    Ipv4(Ipv4Addr),
    /// IPv6 address (only the interface identifier travels in NAS)
    Ipv6(Ipv6Addr),
    /// Dual stack
    Ipv4v6(Ipv4Addr, Ipv6Addr),
}

impl PdnAddress {
    /// PDN type carried by this address
    pub fn pdn_type(&self) -> PdnType {
        match self {
            PdnAddress::Ipv4(_) => PdnType::Ipv4,
            PdnAddress::Ipv6(_) => PdnType::Ipv6,
            PdnAddress::Ipv4v6(..) => PdnType::Ipv4v6,
        }
    }
}

// ============================================================================
// QoS
// ============================================================================

/// Bitrate pair in kbps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bitrate {
    /// Downlink bitrate (kbps)
    pub downlink: u64,
    /// Uplink bitrate (kbps)
    pub uplink: u64,
}

impl Bitrate {
    /// Create a bitrate pair
    pub fn new(downlink: u64, uplink: u64) -> Self {
        Self { downlink, uplink }
    }

    /// True if neither direction exceeds `max`
    pub fn within(&self, max: &Bitrate) -> bool {
        self.downlink <= max.downlink && self.uplink <= max.uplink
    }
}

/// EPS bearer level QoS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BearerQos {
    /// QoS Class Identifier
    pub qci: u8,
    /// Guaranteed bitrate
    pub gbr: Bitrate,
    /// Maximum bitrate
    pub mbr: Bitrate,
}

impl BearerQos {
    /// Non-GBR QoS with the given QCI
    pub fn non_gbr(qci: u8) -> Self {
        Self { qci, ..Default::default() }
    }
}

/// QCI classification (TS 23.203 Table 6.1.7-A)
pub mod qci {
    /// GBR QCIs
    const GBR: &[u8] = &[1, 2, 3, 4, 65, 66, 67, 71, 72, 73, 74, 75, 76, 82, 83, 84, 85];
    /// Non-GBR QCIs
    const NON_GBR: &[u8] = &[5, 6, 7, 8, 9, 69, 70, 79, 80];

    /// True for standardized QCI values
    pub fn is_standardized(qci: u8) -> bool {
        GBR.contains(&qci) || NON_GBR.contains(&qci)
    }

    /// True for GBR QCI values
    pub fn is_gbr(qci: u8) -> bool {
        GBR.contains(&qci)
    }
}

/// Traffic flow template, encoded by the TFT collaborator
pub type Tft = Bytes;

/// Protocol configuration options, encoded by the PCO collaborator
pub type Pco = Bytes;

// ============================================================================
// APN
// ============================================================================

/// Maximum APN length in octets (TS 23.003 Section 9.1)
pub const MAX_APN_LEN: usize = 100;
/// Maximum APN label length
pub const MAX_APN_LABEL_LEN: usize = 63;

/// Check APN syntax: dot separated labels of letters, digits and hyphens
pub fn apn_is_valid(apn: &str) -> bool {
    if apn.is_empty() || apn.len() > MAX_APN_LEN {
        return false;
    }

    apn.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= MAX_APN_LABEL_LEN
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pti_ranges() {
        assert!(Pti::UNASSIGNED.is_unassigned());
        assert!(!Pti(0).is_assignable());
        assert!(Pti(1).is_assignable());
        assert!(Pti(254).is_assignable());
        assert!(!Pti(255).is_assignable());
    }

    #[test]
    fn test_ebi_ranges() {
        assert!(!Ebi(4).is_valid());
        assert!(Ebi(5).is_valid());
        assert!(Ebi(15).is_valid());
        assert!(!Ebi(16).is_valid());
        assert_eq!(Ebi(7).to_string(), "EBI[7]");
    }

    #[test]
    fn test_pdn_type_try_from() {
        assert_eq!(PdnType::try_from(1).unwrap(), PdnType::Ipv4);
        assert_eq!(PdnType::try_from(3).unwrap(), PdnType::Ipv4v6);
        assert_eq!(
            PdnType::try_from(5).unwrap_err(),
            EsmError::Rejected(EsmCause::UnknownPdnType)
        );
    }

    #[test]
    fn test_request_type_try_from() {
        assert_eq!(RequestType::try_from(4).unwrap(), RequestType::Emergency);
        assert!(RequestType::try_from(3).is_err());
        assert!(RequestType::Emergency.is_emergency());
        assert!(!RequestType::Handover.is_emergency());
    }

    #[test]
    fn test_pdn_address_type() {
        let v4 = PdnAddress::Ipv4(Ipv4Addr::new(10, 45, 0, 2));
        assert_eq!(v4.pdn_type(), PdnType::Ipv4);
        let dual = PdnAddress::Ipv4v6(Ipv4Addr::LOCALHOST, Ipv6Addr::LOCALHOST);
        assert_eq!(dual.pdn_type(), PdnType::Ipv4v6);
    }

    #[test]
    fn test_qci() {
        assert!(qci::is_standardized(9));
        assert!(!qci::is_gbr(9));
        assert!(qci::is_gbr(1));
        assert!(!qci::is_standardized(10));
    }

    #[test]
    fn test_apn_is_valid() {
        assert!(apn_is_valid("internet"));
        assert!(apn_is_valid("ims.mnc001.mcc001.gprs"));
        assert!(!apn_is_valid(""));
        assert!(!apn_is_valid("bad..apn"));
        assert!(!apn_is_valid("-internet"));
        assert!(!apn_is_valid("inter net"));
        assert!(!apn_is_valid(&"a".repeat(64)));
    }

    #[test]
    fn test_bitrate_within() {
        let gbr = Bitrate::new(64, 64);
        assert!(gbr.within(&Bitrate::new(128, 128)));
        assert!(!Bitrate::new(256, 64).within(&Bitrate::new(128, 128)));
    }
}
