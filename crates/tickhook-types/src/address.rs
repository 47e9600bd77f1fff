//! Code addresses inside the host process.
//!
//! Addresses are plain integers wrapped in a newtype so that they cannot be
//! mixed up with tick counts, byte offsets, or durations. All arithmetic is
//! checked: an address that would leave the address space is a hard error
//! for the caller to handle, never a silent wrap.

use serde::{Deserialize, Serialize};

/// An absolute code address in the host process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(pub u64);

impl Address {
    /// Create an address from a raw integer value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Return the raw integer value.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Add an unsigned byte offset, returning `None` on overflow.
    pub const fn checked_add(self, bytes: u64) -> Option<Self> {
        match self.0.checked_add(bytes) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }

    /// Apply a signed byte displacement, returning `None` if the result
    /// falls outside `0..=u64::MAX`.
    pub const fn checked_offset(self, displacement: i64) -> Option<Self> {
        match self.0.checked_add_signed(displacement) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }

    /// Number of bytes from `base` to this address, or `None` if this
    /// address lies below `base`.
    pub const fn offset_from(self, base: Self) -> Option<u64> {
        self.0.checked_sub(base.0)
    }
}

impl core::fmt::Display for Address {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

impl From<u64> for Address {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<Address> for u64 {
    fn from(address: Address) -> Self {
        address.0
    }
}
