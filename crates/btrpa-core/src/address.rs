//! Bluetooth device address parsing and classification.
//!
//! Advertisements arrive with an address string. On Linux that is a real
//! 48-bit MAC; some platform stacks substitute a 128-bit UUID instead. Only
//! real MACs whose two most significant bits are `01` can be resolvable
//! private addresses.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

static MAC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9A-Fa-f]{2}(:[0-9A-Fa-f]{2}){5}$").expect("valid MAC regex"));

/// Returns `true` for a strict `XX:XX:XX:XX:XX:XX` MAC string.
#[must_use]
pub fn is_valid_mac_address(address: &str) -> bool {
    MAC_RE.is_match(address)
}

/// Normalise an address into the key used for per-device state.
#[must_use]
pub fn normalize_key(address: &str) -> String {
    address.trim().to_uppercase()
}

/// A parsed 6-byte device address, most significant octet first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address([u8; 6]);

impl Address {
    /// Wrap raw octets.
    #[must_use]
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Parse `AA:BB:CC:DD:EE:FF` (or `-` separated).
    ///
    /// Returns `None` for anything else; parsing is a query, not a failure.
    #[must_use]
    pub fn parse(address: &str) -> Option<Self> {
        let mut octets = [0u8; 6];
        let mut parts = address.trim().split([':', '-']);
        for slot in &mut octets {
            let part = parts.next()?;
            if part.len() != 2 {
                return None;
            }
            *slot = u8::from_str_radix(part, 16).ok()?;
        }
        if parts.next().is_some() {
            return None;
        }
        Some(Self(octets))
    }

    /// Raw octets.
    #[must_use]
    pub const fn octets(&self) -> &[u8; 6] {
        &self.0
    }

    /// The random part of an RPA (first three octets).
    #[must_use]
    pub const fn prand(&self) -> [u8; 3] {
        [self.0[0], self.0[1], self.0[2]]
    }

    /// The hash part of an RPA (last three octets).
    #[must_use]
    pub const fn hash(&self) -> [u8; 3] {
        [self.0[3], self.0[4], self.0[5]]
    }

    /// Top two bits of the most significant octet are `01`.
    #[must_use]
    pub const fn is_resolvable(&self) -> bool {
        self.0[0] >> 6 == 0b01
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// How an observed address string was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AddressKind {
    /// A MAC with the RPA marker bits (`01`).
    Resolvable,
    /// A well-formed MAC that can never resolve (public, static, NRPA).
    NonResolvable,
    /// A platform identifier (e.g. a CoreBluetooth UUID) standing in for the MAC.
    PlatformOpaque,
    /// Anything else.
    Malformed,
}

impl AddressKind {
    /// Classify an address string.
    #[must_use]
    pub fn classify(address: &str) -> Self {
        if is_platform_opaque(address) {
            return Self::PlatformOpaque;
        }
        match Address::parse(address) {
            Some(addr) if addr.is_resolvable() => Self::Resolvable,
            Some(_) => Self::NonResolvable,
            None => Self::Malformed,
        }
    }
}

/// 32 hex characters once dashes are removed, and no colon anywhere.
fn is_platform_opaque(address: &str) -> bool {
    if address.contains(':') {
        return false;
    }
    let stripped: String = address.trim().chars().filter(|c| *c != '-').collect();
    stripped.len() == 32 && stripped.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_colon_and_dash() {
        let colon = Address::parse("40:11:22:33:44:55").unwrap();
        let dash = Address::parse("40-11-22-33-44-55").unwrap();
        assert_eq!(colon, dash);
        assert_eq!(colon.octets(), &[0x40, 0x11, 0x22, 0x33, 0x44, 0x55]);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Address::parse("").is_none());
        assert!(Address::parse("not-a-mac").is_none());
        assert!(Address::parse("ZZ:ZZ:ZZ:ZZ:ZZ:ZZ").is_none());
        assert!(Address::parse("40:11:22:33:44").is_none());
        assert!(Address::parse("40:11:22:33:44:55:66").is_none());
        assert!(Address::parse("4:11:22:33:44:55").is_none());
    }

    #[test]
    fn test_display_is_uppercase_colon() {
        let addr = Address::parse("7f:ab:cd:01:02:03").unwrap();
        assert_eq!(addr.to_string(), "7F:AB:CD:01:02:03");
    }

    #[test]
    fn test_rpa_marker_bits() {
        assert!(Address::new([0x40, 0, 0, 0, 0, 0]).is_resolvable());
        assert!(Address::new([0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]).is_resolvable());
        assert!(!Address::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]).is_resolvable());
        assert!(!Address::new([0x80, 0x11, 0x22, 0x33, 0x44, 0x55]).is_resolvable());
        assert!(!Address::new([0xC0, 0x11, 0x22, 0x33, 0x44, 0x55]).is_resolvable());
    }

    #[test]
    fn test_classify() {
        assert_eq!(AddressKind::classify("55:AA:33:01:02:03"), AddressKind::Resolvable);
        assert_eq!(AddressKind::classify("C0:AA:33:01:02:03"), AddressKind::NonResolvable);
        assert_eq!(
            AddressKind::classify("12345678-9ABC-DEF0-1234-56789ABCDEF0"),
            AddressKind::PlatformOpaque
        );
        assert_eq!(
            AddressKind::classify("123456789ABCDEF0123456789ABCDEF0"),
            AddressKind::PlatformOpaque
        );
        assert_eq!(AddressKind::classify("garbage"), AddressKind::Malformed);
    }

    #[test]
    fn test_is_valid_mac_address() {
        assert!(is_valid_mac_address("AA:BB:CC:DD:EE:FF"));
        assert!(is_valid_mac_address("aa:bb:cc:dd:ee:ff"));
        assert!(!is_valid_mac_address("AA-BB-CC-DD-EE-FF"));
        assert!(!is_valid_mac_address("AA:BB:CC:DD:EE"));
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key(" aa:bb:cc:dd:ee:ff "), "AA:BB:CC:DD:EE:FF");
    }
}
