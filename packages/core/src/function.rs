//! Byte geometry of Function and Circuit blocks.
//!
//! ```text
//! block ─┬ DatablockHeader      8 bytes
//!        ├ FunctionHeader       8 bytes
//!        ├ io flags             1 byte per input and output, padded to 4
//!        ├ input refs           u32 per input
//!        ├ io values            f32 per input, then per output
//!        └ statics              4 bytes each
//! ```
//!
//! In a Circuit the statics hold the call list (child block offsets,
//! zero-terminated unless full) followed by one reference per output.

use softplc_codec::align_up;

use crate::flags::{BlockType, IoFlags};
use crate::memory::Memory;
use crate::records::{FunctionHeader, FUNCTION_HEADER_SIZE, HEADER_SIZE, SLOT_SIZE};

/// Resolved pointers into one executable block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionGeometry {
    pub block: u32,
    pub block_type: BlockType,
    pub header: FunctionHeader,
    pub io_flags: u32,
    pub input_refs: u32,
    pub io_values: u32,
    pub statics: u32,
    /// One past the last static slot.
    pub end: u32,
}

/// Body bytes (excluding the datablock header) needed for the given counts.
pub fn body_size(input_count: u8, output_count: u8, static_count: u16) -> u32 {
    let io_count = input_count as u32 + output_count as u32;
    let refs = align_up(
        (FUNCTION_HEADER_SIZE + io_count) as usize,
        SLOT_SIZE as usize,
    ) as u32;
    refs + (input_count as u32 + io_count + static_count as u32) * SLOT_SIZE
}

impl FunctionGeometry {
    fn compute(block: u32, block_type: BlockType, header: FunctionHeader) -> Self {
        let io_flags = block + HEADER_SIZE + FUNCTION_HEADER_SIZE;
        let input_refs = align_up(
            (io_flags + header.io_count()) as usize,
            SLOT_SIZE as usize,
        ) as u32;
        let io_values = input_refs + header.input_count as u32 * SLOT_SIZE;
        let statics = io_values + header.io_count() * SLOT_SIZE;
        let end = statics + header.static_count as u32 * SLOT_SIZE;
        Self {
            block,
            block_type,
            header,
            io_flags,
            input_refs,
            io_values,
            statics,
            end,
        }
    }

    /// Read the geometry of the block at `block`.
    ///
    /// `None` when the offset is not an executable block or its header
    /// describes more cells than the block holds.
    pub fn read(memory: &Memory, block: u32) -> Option<Self> {
        if !memory.contains(block, HEADER_SIZE + FUNCTION_HEADER_SIZE) {
            return None;
        }
        let datablock = memory.header(block);
        let block_type = datablock.kind().filter(|kind| kind.is_executable())?;
        let header: FunctionHeader = memory.read_record(block + HEADER_SIZE);
        let geometry = Self::compute(block, block_type, header);
        let block_end = block as u64 + datablock.byte_length as u64;
        if geometry.end as u64 > block_end || !memory.contains(block, datablock.byte_length) {
            return None;
        }
        if block_type == BlockType::Circuit && header.static_count < header.output_count as u16 {
            return None;
        }
        Some(geometry)
    }

    pub fn input_count(&self) -> u32 {
        self.header.input_count as u32
    }

    pub fn output_count(&self) -> u32 {
        self.header.output_count as u32
    }

    pub fn io_count(&self) -> u32 {
        self.header.io_count()
    }

    pub fn static_count(&self) -> u32 {
        self.header.static_count as u32
    }

    pub fn io_flag(&self, index: u32) -> u32 {
        self.io_flags + index
    }

    pub fn input_ref(&self, index: u32) -> u32 {
        self.input_refs + index * SLOT_SIZE
    }

    pub fn io_value(&self, index: u32) -> u32 {
        self.io_values + index * SLOT_SIZE
    }

    pub fn static_slot(&self, index: u32) -> u32 {
        self.statics + index * SLOT_SIZE
    }

    /// IO index of the value slot at `offset`, if it belongs to this block.
    pub fn io_index_of(&self, offset: u32) -> Option<u32> {
        if offset < self.io_values || offset >= self.statics {
            return None;
        }
        let delta = offset - self.io_values;
        (delta % SLOT_SIZE == 0).then_some(delta / SLOT_SIZE)
    }

    // Circuit views over the static area.

    /// Number of call list slots.
    pub fn call_list_len(&self) -> u32 {
        self.static_count().saturating_sub(self.output_count())
    }

    pub fn call_slot(&self, index: u32) -> u32 {
        self.static_slot(index)
    }

    pub fn output_ref(&self, index: u32) -> u32 {
        self.static_slot(self.call_list_len() + index)
    }

    pub fn flags(&self, memory: &Memory, index: u32) -> IoFlags {
        IoFlags::from_bits_truncate(memory.read::<u8>(self.io_flag(index)))
    }

    /// Child offsets up to the first empty slot.
    pub fn call_list(&self, memory: &Memory) -> Vec<u32> {
        (0..self.call_list_len())
            .map(|i| memory.read::<u32>(self.call_slot(i)))
            .take_while(|&offset| offset != 0)
            .collect()
    }

    /// Rewrite the call list, zero-filling the unused tail.
    ///
    /// Entries past the capacity are dropped; callers check the length first.
    pub fn write_call_list(&self, memory: &mut Memory, calls: &[u32]) {
        for i in 0..self.call_list_len() {
            let offset = calls.get(i as usize).copied().unwrap_or(0);
            memory.write(self.call_slot(i), offset);
        }
    }
}
