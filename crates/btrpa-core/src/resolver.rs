//! Resolvable Private Address resolution.
//!
//! Implements the Bluetooth Core Specification `ah()` function
//! (Vol 3, Part H, 2.2.2): `AES-128(irk, 0^13 || prand)`, keeping the last
//! three bytes. An RPA resolves against a key when that hash equals the
//! address's lower three octets.
//!
//! Exactly one block is ever encrypted, so the raw block cipher is used
//! directly.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use tracing::trace;

use crate::address::Address;
use crate::irk::Irk;

/// Bluetooth `ah()` hash: last three bytes of `AES-128(irk, 0^13 || prand)`.
#[must_use]
pub fn ah(irk: &Irk, prand: [u8; 3]) -> [u8; 3] {
    let cipher = Aes128::new(GenericArray::from_slice(irk.as_bytes()));
    let mut block = [0u8; 16];
    block[13..].copy_from_slice(&prand);
    let mut block = GenericArray::from(block);
    cipher.encrypt_block(&mut block);
    [block[13], block[14], block[15]]
}

/// Resolve a parsed address against one key.
///
/// Non-RPA addresses return `false` without touching the cipher.
#[must_use]
pub fn resolve_address(irk: &Irk, address: &Address) -> bool {
    address.is_resolvable() && ah(irk, address.prand()) == address.hash()
}

/// Resolve an address string against one key.
///
/// Malformed strings return `false`.
#[must_use]
pub fn resolve(irk: &Irk, address: &str) -> bool {
    Address::parse(address).is_some_and(|addr| resolve_address(irk, &addr))
}

/// Build an RPA for `irk` from a 3-byte random part.
///
/// The two most significant bits of `prand` are forced to `01`.
#[must_use]
pub fn generate_rpa(irk: &Irk, prand: [u8; 3]) -> Address {
    let prand = [(prand[0] & 0x3F) | 0x40, prand[1], prand[2]];
    let [h0, h1, h2] = ah(irk, prand);
    Address::new([prand[0], prand[1], prand[2], h0, h1, h2])
}

/// An ordered set of active keys.
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    irks: Vec<Irk>,
}

impl Resolver {
    /// Create a resolver over the given keys.
    #[must_use]
    pub const fn new(irks: Vec<Irk>) -> Self {
        Self { irks }
    }

    /// Number of active keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.irks.len()
    }

    /// `true` when no keys are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.irks.is_empty()
    }

    /// Loaded keys, in order.
    #[must_use]
    pub fn irks(&self) -> &[Irk] {
        &self.irks
    }

    /// Try every key in order and return the index of the first match.
    ///
    /// Stops at the first match; returns `None` for non-RPA or malformed input.
    #[must_use]
    pub fn resolve(&self, address: &str) -> Option<usize> {
        let addr = Address::parse(address)?;
        if !addr.is_resolvable() {
            return None;
        }
        let matched = self.irks.iter().position(|irk| resolve_address(irk, &addr));
        if let Some(idx) = matched {
            trace!(address, irk = %self.irks[idx], "RPA resolved");
        }
        matched
    }
}
