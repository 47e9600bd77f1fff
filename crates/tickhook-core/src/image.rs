//! Readable copies of host code regions.
//!
//! A [`CodeImage`] pairs a load address with the bytes found there. The
//! signature resolver scans it for byte patterns; the hook reads it to
//! follow a relative jump that another instrumentation layer may have
//! planted at a routine's entry. Every read is bounds-checked against the
//! image: reading outside it yields `None`, never a panic.

use tickhook_types::Address;

use crate::signature::Pattern;

/// `jmp rel32` opcode.
pub const JMP_REL32: u8 = 0xE9;

/// `jmp rel8` opcode.
pub const JMP_REL8: u8 = 0xEB;

/// Length of a `jmp rel32` instruction.
const JMP_REL32_LEN: u64 = 5;

/// Length of a `jmp rel8` instruction.
const JMP_REL8_LEN: u64 = 2;

/// A contiguous region of host code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeImage {
    base: Address,
    bytes: Vec<u8>,
}

impl CodeImage {
    /// Wrap `bytes` as the code loaded at `base`.
    pub const fn new(base: Address, bytes: Vec<u8>) -> Self {
        Self { base, bytes }
    }

    /// Load address of the first byte.
    pub const fn base(&self) -> Address {
        self.base
    }

    /// Number of bytes in the image.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the image is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Raw bytes of the image.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Whether `address` falls inside the image.
    pub fn contains(&self, address: Address) -> bool {
        self.index_of(address).is_some()
    }

    /// Address of the first match of `pattern`, scanning from the base.
    pub fn find(&self, pattern: &Pattern) -> Option<Address> {
        if pattern.is_empty() {
            return None;
        }
        let position = self
            .bytes
            .windows(pattern.len())
            .position(|window| pattern.matches(window))?;
        self.base.checked_add(u64::try_from(position).ok()?)
    }

    /// Byte at `address`.
    pub fn read_u8(&self, address: Address) -> Option<u8> {
        self.bytes.get(self.index_of(address)?).copied()
    }

    /// Signed byte at `address`.
    pub fn read_i8(&self, address: Address) -> Option<i8> {
        self.read_u8(address).map(|byte| i8::from_le_bytes([byte]))
    }

    /// Little-endian `i32` starting at `address`.
    pub fn read_i32(&self, address: Address) -> Option<i32> {
        let start = self.index_of(address)?;
        let end = start.checked_add(4)?;
        let raw: [u8; 4] = self.bytes.get(start..end)?.try_into().ok()?;
        Some(i32::from_le_bytes(raw))
    }

    /// Destination of the relative jump at `address`, if there is one.
    ///
    /// Recognises `jmp rel32` (`E9`) and `jmp rel8` (`EB`). The target is
    /// relative to the end of the instruction.
    pub fn jump_target(&self, address: Address) -> Option<Address> {
        match self.read_u8(address)? {
            JMP_REL32 => {
                let displacement = self.read_i32(address.checked_add(1)?)?;
                address
                    .checked_add(JMP_REL32_LEN)?
                    .checked_offset(i64::from(displacement))
            }
            JMP_REL8 => {
                let displacement = self.read_i8(address.checked_add(1)?)?;
                address
                    .checked_add(JMP_REL8_LEN)?
                    .checked_offset(i64::from(displacement))
            }
            _ => None,
        }
    }

    /// Follow one relative jump at `address`, or return `address` itself if
    /// there is no jump there (or it cannot be decoded).
    pub fn follow_jump(&self, address: Address) -> Address {
        self.jump_target(address).unwrap_or(address)
    }

    fn index_of(&self, address: Address) -> Option<usize> {
        let offset = usize::try_from(address.offset_from(self.base)?).ok()?;
        (offset < self.bytes.len()).then_some(offset)
    }
}
