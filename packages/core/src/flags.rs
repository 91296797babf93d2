//! Block type tags and the bit-flag types stored in block headers.
//!
//! Bit positions are part of the memory layout and must not change.

use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// Type tag of a data block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BlockType {
    /// Reserved for ID 0; never allocated.
    Undefined = 0,
    /// Free space.
    Unallocated = 1,
    Task = 2,
    Circuit = 3,
    Function = 4,
    Data = 5,
}

impl BlockType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(BlockType::Undefined),
            1 => Some(BlockType::Unallocated),
            2 => Some(BlockType::Task),
            3 => Some(BlockType::Circuit),
            4 => Some(BlockType::Function),
            5 => Some(BlockType::Data),
            _ => None,
        }
    }

    /// Function and Circuit blocks share the function header and can run.
    pub fn is_executable(self) -> bool {
        matches!(self, BlockType::Function | BlockType::Circuit)
    }
}

/// Per-IO flags, one byte per input/output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IoFlags(u8);

impl IoFlags {
    pub const NONE: IoFlags = IoFlags(0);
    /// Values are reduced to 0/1 when pulled through a reference.
    pub const BOOLEAN: IoFlags = IoFlags(0x01);
    /// Values are truncated toward zero when pulled through a reference.
    pub const INTEGER: IoFlags = IoFlags(0x02);
    /// Boolean inputs are negated after reduction.
    pub const INVERTED: IoFlags = IoFlags(0x04);
    /// Editor hint only.
    pub const HIDDEN: IoFlags = IoFlags(0x08);

    const ALL: u8 = 0x0F;

    /// Build from raw bits, dropping bits with no meaning.
    pub const fn from_bits_truncate(bits: u8) -> Self {
        IoFlags(bits & Self::ALL)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: IoFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn set(&mut self, flag: IoFlags, enabled: bool) {
        if enabled {
            self.0 |= flag.0;
        } else {
            self.0 &= !flag.0;
        }
    }

    pub const fn is_boolean(self) -> bool {
        self.contains(Self::BOOLEAN)
    }

    pub const fn is_integer(self) -> bool {
        self.contains(Self::INTEGER)
    }

    pub const fn is_inverted(self) -> bool {
        self.contains(Self::INVERTED)
    }

    pub const fn is_hidden(self) -> bool {
        self.contains(Self::HIDDEN)
    }
}

impl BitOr for IoFlags {
    type Output = IoFlags;

    fn bitor(self, rhs: IoFlags) -> IoFlags {
        IoFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for IoFlags {
    fn bitor_assign(&mut self, rhs: IoFlags) {
        self.0 |= rhs.0;
    }
}

/// Flags stored in the function header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionFlags(u16);

impl FunctionFlags {
    pub const NONE: FunctionFlags = FunctionFlags(0);
    /// IO values are diffed around every run and reported as changes.
    pub const MONITORED: FunctionFlags = FunctionFlags(0x0001);

    const ALL: u16 = 0x0001;

    pub const fn from_bits_truncate(bits: u16) -> Self {
        FunctionFlags(bits & Self::ALL)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: FunctionFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn set(&mut self, flag: FunctionFlags, enabled: bool) {
        if enabled {
            self.0 |= flag.0;
        } else {
            self.0 &= !flag.0;
        }
    }

    pub const fn is_monitored(self) -> bool {
        self.contains(Self::MONITORED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_type_round_trip() {
        for tag in 0..=5u8 {
            let ty = BlockType::from_u8(tag).unwrap();
            assert_eq!(ty as u8, tag);
        }
        assert_eq!(BlockType::from_u8(6), None);
        assert!(BlockType::Circuit.is_executable());
        assert!(!BlockType::Task.is_executable());
    }

    #[test]
    fn io_flag_bits_are_stable() {
        assert_eq!(IoFlags::BOOLEAN.bits(), 0x01);
        assert_eq!(IoFlags::INTEGER.bits(), 0x02);
        assert_eq!(IoFlags::INVERTED.bits(), 0x04);
        assert_eq!(IoFlags::HIDDEN.bits(), 0x08);
    }

    #[test]
    fn io_flags_combine_and_clear() {
        let mut flags = IoFlags::BOOLEAN | IoFlags::INVERTED;
        assert!(flags.is_boolean());
        assert!(flags.is_inverted());
        assert!(!flags.is_integer());

        flags.set(IoFlags::INVERTED, false);
        assert_eq!(flags, IoFlags::BOOLEAN);

        flags |= IoFlags::HIDDEN;
        assert!(flags.is_hidden());
    }

    #[test]
    fn unknown_bits_are_dropped() {
        assert_eq!(IoFlags::from_bits_truncate(0xF1).bits(), 0x01);
        assert_eq!(FunctionFlags::from_bits_truncate(0xFF01).bits(), 0x01);
    }

    #[test]
    fn monitored_flag() {
        let mut flags = FunctionFlags::NONE;
        assert!(!flags.is_monitored());
        flags.set(FunctionFlags::MONITORED, true);
        assert!(flags.is_monitored());
    }
}
