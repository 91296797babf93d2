//! The memory region and its data-block allocator.
//!
//! All controller state lives in one byte buffer. Blocks are addressed by
//! table ID; the table maps IDs to byte offsets. Free space is kept as
//! `Unallocated` blocks that own table slots like any other block, so the
//! allocator needs no side structures.

use serde::{Deserialize, Serialize};
use softplc_codec::{align_up, Layout, Primitive};
use tracing::{debug, warn};

use crate::error::{CoreError, Result};
use crate::flags::BlockType;
use crate::records::{DatablockHeader, SystemSector, HEADER_SIZE, LAYOUT_VERSION, SLOT_SIZE};

/// Smallest leftover worth splitting off as its own free block.
const MIN_SPLIT: u32 = HEADER_SIZE + SLOT_SIZE;

/// Largest table that parent IDs (u16) can address.
const MAX_TABLE_LENGTH: u32 = u16::MAX as u32 + 1;

/// Geometry of a new controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    /// Controller ID written into the system sector.
    #[serde(default = "default_controller_id")]
    pub id: u32,
    /// Total size of the memory region in bytes.
    pub mem_size: u32,
    /// Number of data-block table slots, including the reserved slot 0.
    pub datablock_table_length: u32,
    /// Number of task list slots.
    pub task_list_length: u32,
}

fn default_controller_id() -> u32 {
    1
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            id: default_controller_id(),
            mem_size: 64 * 1024,
            datablock_table_length: 256,
            task_list_length: 16,
        }
    }
}

/// Result of a successful allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: u32,
    pub offset: u32,
    /// Total block length including the header.
    pub length: u32,
}

/// The controller's memory region.
#[derive(Clone)]
pub struct Memory {
    bytes: Vec<u8>,
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory")
            .field("system_sector", &self.system_sector())
            .finish()
    }
}

impl Memory {
    /// Format a fresh memory region.
    ///
    /// The whole data sector starts out as one `Unallocated` block in table slot 1.
    pub fn new(config: &ControllerConfig) -> Result<Self> {
        let mem_size = config.mem_size & !(SLOT_SIZE - 1);
        if config.datablock_table_length < 2 || config.datablock_table_length > MAX_TABLE_LENGTH {
            return Err(CoreError::InvalidConfig(format!(
                "datablock table length must be between 2 and {}, got {}",
                MAX_TABLE_LENGTH, config.datablock_table_length
            )));
        }

        let table_ptr = align_up(SystemSector::SIZE, SLOT_SIZE as usize) as u64;
        let task_list_ptr = table_ptr + config.datablock_table_length as u64 * SLOT_SIZE as u64;
        let data_ptr = task_list_ptr + config.task_list_length as u64 * SLOT_SIZE as u64;
        if data_ptr + (MIN_SPLIT as u64) > mem_size as u64 {
            return Err(CoreError::InvalidConfig(format!(
                "memory size {} leaves no room for a data sector",
                config.mem_size
            )));
        }

        let mut memory = Self {
            bytes: vec![0; mem_size as usize],
        };
        let data_mem_size = mem_size - data_ptr as u32;
        memory.write_system_sector(&SystemSector {
            id: config.id,
            version: LAYOUT_VERSION,
            total_mem_size: mem_size,
            data_mem_size,
            datablock_table_ptr: table_ptr as u32,
            datablock_table_length: config.datablock_table_length,
            last_used_id: 0,
            datablock_table_version: 0,
            task_list_ptr: task_list_ptr as u32,
            task_list_length: config.task_list_length,
        });

        let data_ptr = data_ptr as u32;
        memory.write_header(
            data_ptr,
            &DatablockHeader::new(data_mem_size, BlockType::Unallocated, 0),
        );
        memory.set_table_slot(1, data_ptr);
        memory.bump_table_version();
        Ok(memory)
    }

    /// Adopt an existing image after validating its layout.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < SystemSector::SIZE {
            return Err(CoreError::CorruptImage(format!(
                "image of {} bytes has no system sector",
                bytes.len()
            )));
        }
        let memory = Self { bytes };
        let sector = memory.system_sector();
        if sector.version != LAYOUT_VERSION {
            return Err(CoreError::CorruptImage(format!(
                "unsupported layout version {}",
                sector.version
            )));
        }
        if sector.total_mem_size as usize != memory.bytes.len() {
            return Err(CoreError::CorruptImage(format!(
                "system sector claims {} bytes, image has {}",
                sector.total_mem_size,
                memory.bytes.len()
            )));
        }
        memory.verify()?;
        Ok(memory)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> u32 {
        self.bytes.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// True if `[offset, offset + len)` lies inside the region.
    pub fn contains(&self, offset: u32, len: u32) -> bool {
        (offset as u64 + len as u64) <= self.bytes.len() as u64
    }

    // ------------------------------------------------------------------
    // Raw access
    // ------------------------------------------------------------------

    pub fn read<T: Primitive>(&self, offset: u32) -> T {
        T::read_le(&self.bytes, offset as usize)
    }

    pub fn write<T: Primitive>(&mut self, offset: u32, value: T) {
        value.write_le(&mut self.bytes, offset as usize);
    }

    pub fn read_record<L: Layout>(&self, offset: u32) -> L {
        L::read_from(&self.bytes, offset as usize)
    }

    pub fn write_record<L: Layout>(&mut self, offset: u32, record: &L) {
        record.write_to(&mut self.bytes, offset as usize);
    }

    pub fn system_sector(&self) -> SystemSector {
        self.read_record(0)
    }

    fn write_system_sector(&mut self, sector: &SystemSector) {
        self.write_record(0, sector);
    }

    pub fn header(&self, offset: u32) -> DatablockHeader {
        self.read_record(offset)
    }

    pub fn write_header(&mut self, offset: u32, header: &DatablockHeader) {
        self.write_record(offset, header);
    }

    fn zero(&mut self, from: u32, to: u32) {
        self.bytes[from as usize..to as usize].fill(0);
    }

    // ------------------------------------------------------------------
    // Data-block table
    // ------------------------------------------------------------------

    fn table_slot(sector: &SystemSector, id: u32) -> u32 {
        sector.datablock_table_ptr + id * SLOT_SIZE
    }

    /// Offset of block `id`, or `None` for ID 0, out-of-range IDs and empty slots.
    pub fn table_lookup(&self, id: u32) -> Option<u32> {
        let sector = self.system_sector();
        if id == 0 || id >= sector.datablock_table_length {
            return None;
        }
        match self.read::<u32>(Self::table_slot(&sector, id)) {
            0 => None,
            offset => Some(offset),
        }
    }

    /// ID of the block starting at `offset`.
    pub fn reverse_lookup(&self, offset: u32) -> Option<u32> {
        if offset == 0 {
            return None;
        }
        self.blocks()
            .find(|&(_, block)| block == offset)
            .map(|(id, _)| id)
    }

    /// All used table slots as `(id, offset)`, in ID order.
    pub fn blocks(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let sector = self.system_sector();
        let last = sector.last_used_id.min(sector.datablock_table_length.saturating_sub(1));
        (1..=last).filter_map(move |id| match self.read::<u32>(Self::table_slot(&sector, id)) {
            0 => None,
            offset => Some((id, offset)),
        })
    }

    /// Header of block `id` together with its offset.
    pub fn block(&self, id: u32) -> Option<(u32, DatablockHeader)> {
        let offset = self.table_lookup(id)?;
        Some((offset, self.header(offset)))
    }

    pub fn block_type(&self, id: u32) -> Option<BlockType> {
        self.block(id).and_then(|(_, header)| header.kind())
    }

    /// First unused table slot.
    pub fn new_id(&self) -> Option<u32> {
        let sector = self.system_sector();
        (1..sector.datablock_table_length)
            .find(|&id| self.read::<u32>(Self::table_slot(&sector, id)) == 0)
    }

    fn set_table_slot(&mut self, id: u32, offset: u32) {
        let mut sector = self.system_sector();
        self.write(Self::table_slot(&sector, id), offset);
        if id > sector.last_used_id {
            sector.last_used_id = id;
            self.write_system_sector(&sector);
        }
    }

    fn clear_table_slot(&mut self, id: u32) {
        let mut sector = self.system_sector();
        self.write(Self::table_slot(&sector, id), 0u32);
        if id == sector.last_used_id {
            let mut last = id;
            while last > 0 && self.read::<u32>(Self::table_slot(&sector, last)) == 0 {
                last -= 1;
            }
            sector.last_used_id = last;
            self.write_system_sector(&sector);
        }
    }

    fn bump_table_version(&mut self) {
        let mut sector = self.system_sector();
        sector.datablock_table_version = sector.datablock_table_version.wrapping_add(1);
        self.write_system_sector(&sector);
    }

    // ------------------------------------------------------------------
    // Allocator
    // ------------------------------------------------------------------

    /// Allocate a block with `byte_length` bytes of body.
    ///
    /// Picks the free block with the smallest leftover. A leftover of at
    /// least [`MIN_SPLIT`] bytes stays behind as a free block at the tail of
    /// the chosen region; a smaller one is absorbed by the new block. Returns
    /// `None` without touching memory when nothing fits or the table is full.
    pub fn allocate(
        &mut self,
        byte_length: u32,
        block_type: BlockType,
        parent_id: u16,
    ) -> Option<Allocation> {
        let length = align_up(byte_length as usize + HEADER_SIZE as usize, SLOT_SIZE as usize);
        let Ok(length) = u32::try_from(length) else {
            warn!(byte_length, "allocation request too large");
            return None;
        };

        let mut best: Option<(u32, u32, u32)> = None;
        for (id, offset) in self.blocks() {
            let header = self.header(offset);
            if !header.is(BlockType::Unallocated) || header.byte_length < length {
                continue;
            }
            let better = match best {
                Some((_, _, best_length)) => header.byte_length < best_length,
                None => true,
            };
            if better {
                best = Some((id, offset, header.byte_length));
            }
        }

        let Some((free_id, offset, free_length)) = best else {
            warn!(byte_length, "no free block large enough");
            return None;
        };

        let excess = free_length - length;
        let (id, block_length) = if excess >= MIN_SPLIT {
            let Some(id) = self.new_id() else {
                warn!(byte_length, "data-block table is full");
                return None;
            };
            let tail = offset + length;
            self.write_header(
                tail,
                &DatablockHeader::new(excess, BlockType::Unallocated, 0),
            );
            self.set_table_slot(free_id, tail);
            self.set_table_slot(id, offset);
            (id, length)
        } else {
            (free_id, free_length)
        };

        self.write_header(
            offset,
            &DatablockHeader::new(block_length, block_type, parent_id),
        );
        self.zero(offset + HEADER_SIZE, offset + block_length);
        self.bump_table_version();

        debug!(id, offset, length = block_length, ?block_type, "allocated block");
        Some(Allocation {
            id,
            offset,
            length: block_length,
        })
    }

    /// Release block `id` and merge it with free neighbours.
    ///
    /// Returns `false` for unknown IDs and blocks that are already free.
    pub fn free(&mut self, id: u32) -> bool {
        let Some(offset) = self.table_lookup(id) else {
            return false;
        };
        let header = self.header(offset);
        if header.is(BlockType::Unallocated) || header.is(BlockType::Undefined) {
            return false;
        }

        let mut start = offset;
        let mut length = header.byte_length;

        let next = offset + length;
        if next < self.system_sector().data_sector_end() {
            if let Some(next_id) = self.reverse_lookup(next) {
                let next_header = self.header(next);
                if next_header.is(BlockType::Unallocated) {
                    length += next_header.byte_length;
                    self.clear_table_slot(next_id);
                }
            }
        }

        let previous = self.blocks().find(|&(_, block)| {
            let h = self.header(block);
            h.is(BlockType::Unallocated) && block + h.byte_length == offset
        });
        if let Some((_, previous_offset)) = previous {
            length += self.header(previous_offset).byte_length;
            start = previous_offset;
            self.clear_table_slot(id);
        }

        self.write_header(start, &DatablockHeader::new(length, BlockType::Unallocated, 0));
        self.zero(start + HEADER_SIZE, start + length);
        self.bump_table_version();

        debug!(id, offset, "freed block");
        true
    }

    /// Total bytes held by free blocks, headers included.
    pub fn free_bytes(&self) -> u32 {
        self.free_blocks().map(|(_, _, length)| length).sum()
    }

    /// Length of the largest free block, header included.
    pub fn largest_free_block(&self) -> u32 {
        self.free_blocks()
            .map(|(_, _, length)| length)
            .max()
            .unwrap_or(0)
    }

    fn free_blocks(&self) -> impl Iterator<Item = (u32, u32, u32)> + '_ {
        self.blocks().filter_map(|(id, offset)| {
            let header = self.header(offset);
            header
                .is(BlockType::Unallocated)
                .then_some((id, offset, header.byte_length))
        })
    }

    /// Walk the data sector and check the block invariants.
    ///
    /// Every block must be listed in the table, lengths must tile the data
    /// sector exactly, and no two free blocks may be adjacent.
    pub fn verify(&self) -> Result<()> {
        let sector = self.system_sector();
        let corrupt = |message: String| Err(CoreError::CorruptImage(message));

        // Sector words come from outside when an image is loaded.
        let slot = SLOT_SIZE as u64;
        let table_end =
            sector.datablock_table_ptr as u64 + sector.datablock_table_length as u64 * slot;
        let task_list_end = sector.task_list_ptr as u64 + sector.task_list_length as u64 * slot;
        let data_end = task_list_end + sector.data_mem_size as u64;
        if sector.datablock_table_ptr < SystemSector::SIZE as u32
            || table_end > sector.task_list_ptr as u64
            || data_end > self.bytes.len() as u64
        {
            return corrupt(format!(
                "sector pointers out of range: table ends at {}, data sector ends at {}",
                table_end, data_end
            ));
        }
        if sector.last_used_id >= sector.datablock_table_length {
            return corrupt(format!(
                "last used ID {} beyond table of {} slots",
                sector.last_used_id, sector.datablock_table_length
            ));
        }

        let mut offset = sector.data_sector_ptr();
        let end = sector.data_sector_end();
        let mut previous_free = false;
        let mut seen = 0u32;
        while offset < end {
            if !self.contains(offset, HEADER_SIZE) {
                return corrupt(format!("block header at {} overruns memory", offset));
            }
            let header = self.header(offset);
            if header.byte_length < HEADER_SIZE || header.byte_length % SLOT_SIZE != 0 {
                return corrupt(format!(
                    "block at {} has invalid length {}",
                    offset, header.byte_length
                ));
            }
            if self.reverse_lookup(offset).is_none() {
                return corrupt(format!("block at {} is not in the table", offset));
            }
            let free = header.is(BlockType::Unallocated);
            if free && previous_free {
                return corrupt(format!("adjacent free blocks at {}", offset));
            }
            previous_free = free;
            seen += 1;
            offset = offset.saturating_add(header.byte_length);
        }
        if offset != end {
            return corrupt(format!("blocks end at {}, data sector ends at {}", offset, end));
        }
        let listed = self.blocks().count() as u32;
        if listed != seen {
            return corrupt(format!(
                "table lists {} blocks, data sector holds {}",
                listed, seen
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Task list
    // ------------------------------------------------------------------

    /// Offsets of listed Task blocks, in execution order.
    pub fn task_list(&self) -> Vec<u32> {
        let sector = self.system_sector();
        (0..sector.task_list_length)
            .map(|i| self.read::<u32>(sector.task_list_ptr + i * SLOT_SIZE))
            .take_while(|&offset| offset != 0)
            .collect()
    }

    /// Insert a Task block offset at `index`, or append when `index` is `None`.
    pub fn insert_task(&mut self, task_offset: u32, index: Option<usize>) -> bool {
        let mut tasks = self.task_list();
        if tasks.len() >= self.system_sector().task_list_length as usize {
            return false;
        }
        let index = index.unwrap_or(tasks.len()).min(tasks.len());
        tasks.insert(index, task_offset);
        self.write_task_list(&tasks);
        true
    }

    /// Remove a Task block offset from the list.
    pub fn remove_task(&mut self, task_offset: u32) -> bool {
        let mut tasks = self.task_list();
        let before = tasks.len();
        tasks.retain(|&offset| offset != task_offset);
        if tasks.len() == before {
            return false;
        }
        self.write_task_list(&tasks);
        true
    }

    fn write_task_list(&mut self, tasks: &[u32]) {
        let sector = self.system_sector();
        for i in 0..sector.task_list_length {
            let value = tasks.get(i as usize).copied().unwrap_or(0);
            self.write(sector.task_list_ptr + i * SLOT_SIZE, value);
        }
    }
}
