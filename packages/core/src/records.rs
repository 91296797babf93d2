//! Fixed records stored in the memory region.
//!
//! ```text
//! 0                40            40+4T         40+4T+4K                  mem_size
//! ┌────────────────┬─────────────┬─────────────┬──────────────────────────┐
//! │ system sector  │ block table │ task list   │ data sector (blocks)     │
//! │ 10 x u32       │ T x u32     │ K x u32     │ header+body, header+body │
//! └────────────────┴─────────────┴─────────────┴──────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use softplc_codec::{layout, Layout};

use crate::flags::{BlockType, FunctionFlags};

/// Version written into the system sector; images with another version are rejected.
pub const LAYOUT_VERSION: u32 = 1;

/// Width of a table entry, task list entry, reference, value or static slot.
pub const SLOT_SIZE: u32 = 4;

pub const SYSTEM_SECTOR_SIZE: u32 = SystemSector::SIZE as u32;
pub const HEADER_SIZE: u32 = DatablockHeader::SIZE as u32;
pub const FUNCTION_HEADER_SIZE: u32 = FunctionHeader::SIZE as u32;
pub const TASK_RECORD_SIZE: u32 = TaskRecord::SIZE as u32;

layout! {
    /// Controller-wide bookkeeping at offset 0.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SystemSector {
        pub id: u32,
        pub version: u32,
        pub total_mem_size: u32,
        pub data_mem_size: u32,
        pub datablock_table_ptr: u32,
        pub datablock_table_length: u32,
        pub last_used_id: u32,
        pub datablock_table_version: u32,
        pub task_list_ptr: u32,
        pub task_list_length: u32,
    }
}

impl SystemSector {
    /// First byte of the data sector.
    pub fn data_sector_ptr(&self) -> u32 {
        self.task_list_ptr + self.task_list_length * SLOT_SIZE
    }

    /// One past the last byte of the data sector.
    pub fn data_sector_end(&self) -> u32 {
        self.data_sector_ptr() + self.data_mem_size
    }
}

layout! {
    /// Header in front of every data block. `byte_length` includes the header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct DatablockHeader {
        pub byte_length: u32,
        pub block_type: u8,
        pub flags: u8,
        pub parent_id: u16,
    }
}

impl DatablockHeader {
    pub fn new(byte_length: u32, block_type: BlockType, parent_id: u16) -> Self {
        Self {
            byte_length,
            block_type: block_type as u8,
            flags: 0,
            parent_id,
        }
    }

    pub fn kind(&self) -> Option<BlockType> {
        BlockType::from_u8(self.block_type)
    }

    pub fn is(&self, block_type: BlockType) -> bool {
        self.block_type == block_type as u8
    }
}

layout! {
    /// Start of the body of Function and Circuit blocks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct FunctionHeader {
        pub library: u8,
        pub opcode: u8,
        pub input_count: u8,
        pub output_count: u8,
        pub static_count: u16,
        pub function_flags: u16,
    }
}

impl FunctionHeader {
    pub fn io_count(&self) -> u32 {
        self.input_count as u32 + self.output_count as u32
    }

    pub fn flags(&self) -> FunctionFlags {
        FunctionFlags::from_bits_truncate(self.function_flags)
    }
}

layout! {
    /// Body of a Task block.
    #[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct TaskRecord {
        /// Offset of the Function/Circuit block this task runs, 0 = none.
        pub target_ref: u32,
        pub interval: f32,
        pub offset: f32,
        pub time_accu: f32,
        /// Fractional milliseconds of CPU time, always in `[0, 1)`.
        pub cpu_time: f32,
        /// Whole milliseconds of CPU time.
        pub cpu_time_int: u32,
        pub run_count: u32,
    }
}

impl TaskRecord {
    /// Add measured CPU time, rolling whole milliseconds into the integer counter.
    pub fn add_cpu_time(&mut self, elapsed_ms: f64) {
        let total = self.cpu_time as f64 + elapsed_ms;
        let whole = total.floor();
        self.cpu_time_int = self.cpu_time_int.wrapping_add(whole as u32);
        self.cpu_time = (total - whole) as f32;
    }

    /// Accumulated CPU time in milliseconds.
    pub fn total_cpu_time_ms(&self) -> f64 {
        self.cpu_time_int as f64 + self.cpu_time as f64
    }
}
