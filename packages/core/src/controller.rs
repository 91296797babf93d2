//! Block-level operations over one memory region.
//!
//! [`Controller`] is what the runtime drives: it owns the memory region and
//! the monitor buffer, validates requests against the stored blocks, and
//! turns the allocator's and engine's sentinels into [`CoreError`]s.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::engine::Engine;
use crate::error::{CoreError, Result};
use crate::flags::{BlockType, FunctionFlags, IoFlags};
use crate::function::{body_size, FunctionGeometry};
use crate::library::{self, CIRCUIT_LIBRARY};
use crate::memory::{ControllerConfig, Memory};
use crate::monitor::{IoChange, MonitorBuffer, DEFAULT_MONITOR_CAPACITY};
use crate::records::{
    DatablockHeader, FunctionHeader, SystemSector, TaskRecord, HEADER_SIZE, TASK_RECORD_SIZE,
};
use crate::scheduler;

/// A `(block ID, IO index)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IoAddress {
    pub id: u32,
    pub io_num: u32,
}

/// One used data-block table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableEntry {
    pub id: u32,
    pub offset: u32,
    pub byte_length: u32,
    pub block_type: Option<BlockType>,
    pub parent_id: u16,
}

/// Decoded Function or Circuit block.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionData {
    pub id: u32,
    pub parent_id: u16,
    pub library: u8,
    pub opcode: u8,
    pub name: Option<&'static str>,
    pub input_count: u8,
    pub output_count: u8,
    pub static_count: u16,
    pub monitored: bool,
    pub io_flags: Vec<IoFlags>,
    pub input_refs: Vec<Option<IoAddress>>,
    pub io_values: Vec<f32>,
}

/// Circuit-specific view: call list and output references.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitData {
    pub id: u32,
    pub call_list_capacity: u32,
    /// Child block IDs in execution order.
    pub call_list: Vec<u32>,
    pub output_refs: Vec<Option<IoAddress>>,
}

/// Decoded Task block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskData {
    pub id: u32,
    pub target_id: Option<u32>,
    pub interval: f32,
    pub offset: f32,
    pub time_accu: f32,
    pub cpu_time_ms: f64,
    pub run_count: u32,
}

/// Free-space statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FreeMemory {
    pub data_mem_size: u32,
    pub free_bytes: u32,
    pub largest_free_block: u32,
}

/// A virtual controller.
#[derive(Debug, Clone)]
pub struct Controller {
    memory: Memory,
    monitor: MonitorBuffer,
}

impl Controller {
    pub fn new(config: &ControllerConfig) -> Result<Self> {
        Self::with_monitor_capacity(config, DEFAULT_MONITOR_CAPACITY)
    }

    pub fn with_monitor_capacity(config: &ControllerConfig, capacity: usize) -> Result<Self> {
        let memory = Memory::new(config)?;
        let sector = memory.system_sector();
        info!(
            id = sector.id,
            mem_size = sector.total_mem_size,
            data_mem_size = sector.data_mem_size,
            "controller created"
        );
        Ok(Self::from_memory(memory, capacity))
    }

    /// Wrap an already validated memory region.
    pub fn from_memory(memory: Memory, capacity: usize) -> Self {
        Self {
            memory,
            monitor: MonitorBuffer::new(capacity),
        }
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn monitor(&self) -> &MonitorBuffer {
        &self.monitor
    }

    /// Drain monitored changes recorded since the last call.
    pub fn take_changes(&mut self) -> Vec<IoChange> {
        self.monitor.take()
    }

    /// Advance all tasks by `dt` milliseconds. Returns how many fired.
    pub fn tick(&mut self, dt: f32) -> usize {
        scheduler::tick(&mut self.memory, &mut self.monitor, dt)
    }

    /// Run one Function or Circuit block directly.
    pub fn run_block(&mut self, id: u32, dt: f32) -> Result<bool> {
        let geometry = self.executable(id)?;
        Ok(Engine::new(&mut self.memory, &mut self.monitor).run_block(geometry.block, dt))
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    fn block(&self, id: u32) -> Result<(u32, DatablockHeader)> {
        match self.memory.block(id) {
            Some((offset, header))
                if !header.is(BlockType::Unallocated) && !header.is(BlockType::Undefined) =>
            {
                Ok((offset, header))
            }
            _ => Err(CoreError::BlockNotFound(id)),
        }
    }

    fn wrong_type(id: u32, expected: &'static str, header: &DatablockHeader) -> CoreError {
        CoreError::WrongBlockType {
            id,
            expected,
            actual: header.kind().unwrap_or(BlockType::Undefined),
        }
    }

    fn executable(&self, id: u32) -> Result<FunctionGeometry> {
        let (offset, header) = self.block(id)?;
        if !header.kind().is_some_and(BlockType::is_executable) {
            return Err(Self::wrong_type(id, "function or circuit", &header));
        }
        FunctionGeometry::read(&self.memory, offset)
            .ok_or_else(|| CoreError::CorruptImage(format!("block {} has a bad header", id)))
    }

    fn circuit(&self, id: u32) -> Result<FunctionGeometry> {
        let geometry = self.executable(id)?;
        if geometry.block_type != BlockType::Circuit {
            return Err(Self::wrong_type(id, "circuit", &self.memory.header(geometry.block)));
        }
        Ok(geometry)
    }

    fn task(&self, id: u32) -> Result<(u32, TaskRecord)> {
        let (offset, header) = self.block(id)?;
        scheduler::task_record(&self.memory, offset)
            .map(|record| (offset, record))
            .ok_or_else(|| Self::wrong_type(id, "task", &header))
    }

    fn parent_id(id: u32) -> Result<u16> {
        u16::try_from(id).map_err(|_| CoreError::BlockNotFound(id))
    }

    fn id_of(&self, offset: u32) -> Option<u32> {
        self.memory.reverse_lookup(offset)
    }

    /// Byte offset of an IO value slot.
    pub fn io_reference(&self, address: IoAddress) -> Result<u32> {
        let geometry = self.executable(address.id)?;
        if address.io_num >= geometry.io_count() {
            return Err(CoreError::InvalidIo {
                id: address.id,
                index: address.io_num,
            });
        }
        Ok(geometry.io_value(address.io_num))
    }

    /// Resolve a stored reference back to the block and IO it points at.
    pub fn solve_io_reference(&self, reference: u32) -> Option<IoAddress> {
        if reference == 0 {
            return None;
        }
        self.memory.blocks().find_map(|(id, offset)| {
            let geometry = FunctionGeometry::read(&self.memory, offset)?;
            geometry
                .io_index_of(reference)
                .map(|io_num| IoAddress { id, io_num })
        })
    }

    fn executables(&self) -> Vec<FunctionGeometry> {
        self.memory
            .blocks()
            .filter_map(|(_, offset)| FunctionGeometry::read(&self.memory, offset))
            .collect()
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Create a Task that runs `target_id` every `interval` milliseconds.
    ///
    /// The phase `offset` preloads the time accumulator.
    pub fn create_task(
        &mut self,
        target_id: u32,
        interval: f32,
        offset: f32,
        index: Option<usize>,
    ) -> Result<u32> {
        if !(interval > 0.0 && interval.is_finite()) {
            return Err(CoreError::InvalidTask(format!(
                "interval must be positive, got {}",
                interval
            )));
        }
        if !offset.is_finite() || offset < 0.0 {
            return Err(CoreError::InvalidTask(format!(
                "offset must be non-negative, got {}",
                offset
            )));
        }
        let target = self.executable(target_id)?;
        if self.memory.task_list().len() >= self.memory.system_sector().task_list_length as usize {
            return Err(CoreError::TaskListFull);
        }

        let allocation = self
            .memory
            .allocate(TASK_RECORD_SIZE, BlockType::Task, 0)
            .ok_or(CoreError::OutOfMemory(TASK_RECORD_SIZE))?;
        scheduler::write_task_record(
            &mut self.memory,
            allocation.offset,
            &TaskRecord {
                target_ref: target.block,
                interval,
                offset,
                time_accu: offset,
                ..Default::default()
            },
        );
        self.memory.insert_task(allocation.offset, index);
        info!(id = allocation.id, target_id, interval, offset, "task created");
        Ok(allocation.id)
    }

    /// Check that `parent_id` is a circuit with a free call slot.
    fn call_list_room(&self, parent_id: u32) -> Result<FunctionGeometry> {
        let parent = self.circuit(parent_id)?;
        if parent.call_list(&self.memory).len() as u32 >= parent.call_list_len() {
            return Err(CoreError::CallListFull(parent_id));
        }
        Ok(parent)
    }

    fn add_call(&mut self, parent: &FunctionGeometry, child: u32, index: Option<usize>) {
        let mut calls = parent.call_list(&self.memory);
        let index = index.unwrap_or(calls.len()).min(calls.len());
        calls.insert(index, child);
        parent.write_call_list(&mut self.memory, &calls);
    }

    fn allocate_executable(
        &mut self,
        block_type: BlockType,
        header: FunctionHeader,
        parent_id: u16,
    ) -> Result<(u32, FunctionGeometry)> {
        let size = body_size(header.input_count, header.output_count, header.static_count);
        let allocation = self
            .memory
            .allocate(size, block_type, parent_id)
            .ok_or(CoreError::OutOfMemory(size))?;
        self.memory
            .write_record(allocation.offset + HEADER_SIZE, &header);
        let geometry = FunctionGeometry::read(&self.memory, allocation.offset).ok_or_else(|| {
            CoreError::CorruptImage(format!("fresh block {} has a bad header", allocation.id))
        })?;
        Ok((allocation.id, geometry))
    }

    /// Create a Circuit with room for `call_list_len` child calls.
    pub fn create_circuit(
        &mut self,
        input_count: u8,
        output_count: u8,
        call_list_len: u16,
        parent_id: Option<u32>,
        call_index: Option<usize>,
    ) -> Result<u32> {
        let static_count = call_list_len
            .checked_add(output_count as u16)
            .ok_or_else(|| {
                CoreError::InvalidIoCount(format!("call list of {} is too long", call_list_len))
            })?;
        let parent = parent_id.map(|id| self.call_list_room(id)).transpose()?;
        let parent_tag = parent_id.map(Self::parent_id).transpose()?.unwrap_or(0);

        let (id, geometry) = self.allocate_executable(
            BlockType::Circuit,
            FunctionHeader {
                library: CIRCUIT_LIBRARY,
                opcode: 0,
                input_count,
                output_count,
                static_count,
                function_flags: 0,
            },
            parent_tag,
        )?;
        if let Some(parent) = parent {
            self.add_call(&parent, geometry.block, call_index);
        }
        debug!(id, input_count, output_count, call_list_len, "circuit created");
        Ok(id)
    }

    /// Create a Function block running primitive `(library, opcode)`.
    ///
    /// Counts default to the primitive's declaration; variable counts are
    /// accepted within the declared range.
    #[allow(clippy::too_many_arguments)]
    pub fn create_function_block(
        &mut self,
        library: u8,
        opcode: u8,
        parent_id: Option<u32>,
        call_index: Option<usize>,
        input_count: Option<u8>,
        output_count: Option<u8>,
        static_count: Option<u16>,
    ) -> Result<u32> {
        let def = library::lookup(library, opcode)
            .ok_or(CoreError::UnknownFunction { library, opcode })?;
        let inputs = def.input_count(input_count).ok_or_else(|| {
            CoreError::InvalidIoCount(format!("{} does not take {:?} inputs", def.name, input_count))
        })?;
        let outputs = def.output_count(output_count).ok_or_else(|| {
            CoreError::InvalidIoCount(format!(
                "{} does not take {:?} outputs",
                def.name, output_count
            ))
        })?;
        let statics = static_count.unwrap_or(def.static_count);
        if statics < def.static_count {
            return Err(CoreError::InvalidIoCount(format!(
                "{} needs {} static cells, got {}",
                def.name, def.static_count, statics
            )));
        }
        let parent = parent_id.map(|id| self.call_list_room(id)).transpose()?;
        let parent_tag = parent_id.map(Self::parent_id).transpose()?.unwrap_or(0);

        let (id, geometry) = self.allocate_executable(
            BlockType::Function,
            FunctionHeader {
                library,
                opcode,
                input_count: inputs,
                output_count: outputs,
                static_count: statics,
                function_flags: 0,
            },
            parent_tag,
        )?;

        let specs = (0..inputs as usize)
            .filter_map(|i| def.input_spec(i))
            .chain((0..outputs as usize).filter_map(|i| def.output_spec(i)));
        for (i, spec) in specs.enumerate() {
            self.memory
                .write(geometry.io_flag(i as u32), spec.flags.bits());
            self.memory.write(geometry.io_value(i as u32), spec.init);
        }
        if let Some(parent) = parent {
            self.add_call(&parent, geometry.block, call_index);
        }
        debug!(id, name = def.name, inputs, outputs, "function block created");
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Deletion
    // ------------------------------------------------------------------

    /// Delete a block and everything that would dangle without it.
    ///
    /// Circuits take their children with them. References into a deleted
    /// block's IO are cleared, and tasks that targeted it are left without
    /// a target.
    pub fn delete_block(&mut self, id: u32) -> Result<()> {
        let (offset, header) = self.block(id)?;
        match header.kind() {
            Some(BlockType::Task) => {
                self.memory.remove_task(offset);
            }
            Some(BlockType::Circuit) | Some(BlockType::Function) => {
                let geometry = self.executable(id)?;
                if geometry.block_type == BlockType::Circuit {
                    for child in geometry.call_list(&self.memory) {
                        if let Some(child_id) = self.id_of(child) {
                            self.delete_block(child_id)?;
                        }
                    }
                }
                self.detach(&geometry);
            }
            _ => {}
        }
        self.memory.free(id);
        info!(id, "block deleted");
        Ok(())
    }

    fn detach(&mut self, deleted: &FunctionGeometry) {
        let points_into =
            |reference: u32| reference >= deleted.io_values && reference < deleted.statics;

        for block in self.executables() {
            if block.block == deleted.block {
                continue;
            }
            for i in 0..block.input_count() {
                if points_into(self.memory.read::<u32>(block.input_ref(i))) {
                    self.memory.write(block.input_ref(i), 0u32);
                }
            }
            if block.block_type == BlockType::Circuit {
                for i in 0..block.output_count() {
                    if points_into(self.memory.read::<u32>(block.output_ref(i))) {
                        self.memory.write(block.output_ref(i), 0u32);
                    }
                }
                let calls = block.call_list(&self.memory);
                if calls.contains(&deleted.block) {
                    let kept: Vec<u32> = calls
                        .into_iter()
                        .filter(|&call| call != deleted.block)
                        .collect();
                    block.write_call_list(&mut self.memory, &kept);
                }
            }
        }

        for task_offset in self.memory.task_list() {
            if let Some(mut task) = scheduler::task_record(&self.memory, task_offset) {
                if task.target_ref == deleted.block {
                    task.target_ref = 0;
                    scheduler::write_task_record(&mut self.memory, task_offset, &task);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Editing
    // ------------------------------------------------------------------

    fn checked_io(&self, id: u32, io_num: u32) -> Result<FunctionGeometry> {
        let geometry = self.executable(id)?;
        if io_num >= geometry.io_count() {
            return Err(CoreError::InvalidIo { id, index: io_num });
        }
        Ok(geometry)
    }

    pub fn set_io_value(&mut self, id: u32, io_num: u32, value: f32) -> Result<()> {
        let geometry = self.checked_io(id, io_num)?;
        self.memory.write(geometry.io_value(io_num), value);
        Ok(())
    }

    pub fn set_io_flags(&mut self, id: u32, io_num: u32, flags: IoFlags) -> Result<()> {
        let geometry = self.checked_io(id, io_num)?;
        self.memory.write(geometry.io_flag(io_num), flags.bits());
        Ok(())
    }

    pub fn set_monitoring(&mut self, id: u32, enabled: bool) -> Result<()> {
        let geometry = self.executable(id)?;
        let mut header = geometry.header;
        let mut flags = header.flags();
        flags.set(FunctionFlags::MONITORED, enabled);
        header.function_flags = flags.bits();
        self.memory
            .write_record(geometry.block + HEADER_SIZE, &header);
        Ok(())
    }

    /// Connect input `input_num` of `target_id` to a source IO, or
    /// disconnect it when `source` is `None`.
    ///
    /// `inverted`, when given, updates the input's INVERTED flag.
    pub fn connect_function_input(
        &mut self,
        target_id: u32,
        input_num: u32,
        source: Option<IoAddress>,
        inverted: Option<bool>,
    ) -> Result<()> {
        let target = self.executable(target_id)?;
        if input_num >= target.input_count() {
            return Err(CoreError::InvalidIo {
                id: target_id,
                index: input_num,
            });
        }
        let reference = match source {
            Some(address) => self.io_reference(address)?,
            None => 0,
        };
        self.memory.write(target.input_ref(input_num), reference);
        if let Some(inverted) = inverted {
            let mut flags = target.flags(&self.memory, input_num);
            flags.set(IoFlags::INVERTED, inverted);
            self.memory.write(target.io_flag(input_num), flags.bits());
        }
        Ok(())
    }

    /// Connect output `output_num` of circuit `circuit_id` to a source IO.
    pub fn connect_circuit_output(
        &mut self,
        circuit_id: u32,
        output_num: u32,
        source: Option<IoAddress>,
    ) -> Result<()> {
        let circuit = self.circuit(circuit_id)?;
        if output_num >= circuit.output_count() {
            return Err(CoreError::InvalidIo {
                id: circuit_id,
                index: circuit.input_count() + output_num,
            });
        }
        let reference = match source {
            Some(address) => self.io_reference(address)?,
            None => 0,
        };
        self.memory.write(circuit.output_ref(output_num), reference);
        Ok(())
    }

    /// Move `child_id` to position `index` of its circuit's call list.
    pub fn set_call_index(&mut self, parent_id: u32, child_id: u32, index: usize) -> Result<()> {
        let parent = self.circuit(parent_id)?;
        let (child, _) = self.block(child_id)?;
        let mut calls = parent.call_list(&self.memory);
        let position = calls
            .iter()
            .position(|&call| call == child)
            .ok_or(CoreError::NotInCallList {
                parent: parent_id,
                child: child_id,
            })?;
        calls.remove(position);
        calls.insert(index.min(calls.len()), child);
        parent.write_call_list(&mut self.memory, &calls);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn system_sector(&self) -> SystemSector {
        self.memory.system_sector()
    }

    pub fn datablock_header(&self, id: u32) -> Result<DatablockHeader> {
        self.memory
            .block(id)
            .map(|(_, header)| header)
            .ok_or(CoreError::BlockNotFound(id))
    }

    pub fn datablock_table(&self) -> Vec<TableEntry> {
        self.memory
            .blocks()
            .map(|(id, offset)| {
                let header = self.memory.header(offset);
                TableEntry {
                    id,
                    offset,
                    byte_length: header.byte_length,
                    block_type: header.kind(),
                    parent_id: header.parent_id,
                }
            })
            .collect()
    }

    /// IDs of listed tasks in execution order.
    pub fn task_list(&self) -> Vec<u32> {
        self.memory
            .task_list()
            .into_iter()
            .filter_map(|offset| self.id_of(offset))
            .collect()
    }

    pub fn task_data(&self, id: u32) -> Result<TaskData> {
        let (_, record) = self.task(id)?;
        let target_id = match record.target_ref {
            0 => None,
            target => self.id_of(target),
        };
        Ok(TaskData {
            id,
            target_id,
            interval: record.interval,
            offset: record.offset,
            time_accu: record.time_accu,
            cpu_time_ms: record.total_cpu_time_ms(),
            run_count: record.run_count,
        })
    }

    pub fn io_values(&self, id: u32) -> Result<Vec<f32>> {
        let geometry = self.executable(id)?;
        Ok((0..geometry.io_count())
            .map(|i| self.memory.read::<f32>(geometry.io_value(i)))
            .collect())
    }

    pub fn function_data(&self, id: u32) -> Result<FunctionData> {
        let geometry = self.executable(id)?;
        let header = geometry.header;
        let block = self.memory.header(geometry.block);
        let name = match geometry.block_type {
            BlockType::Circuit => Some("CIRCUIT"),
            _ => library::lookup(header.library, header.opcode).map(|def| def.name),
        };
        Ok(FunctionData {
            id,
            parent_id: block.parent_id,
            library: header.library,
            opcode: header.opcode,
            name,
            input_count: header.input_count,
            output_count: header.output_count,
            static_count: header.static_count,
            monitored: header.flags().is_monitored(),
            io_flags: (0..geometry.io_count())
                .map(|i| geometry.flags(&self.memory, i))
                .collect(),
            input_refs: (0..geometry.input_count())
                .map(|i| self.solve_io_reference(self.memory.read::<u32>(geometry.input_ref(i))))
                .collect(),
            io_values: self.io_values(id)?,
        })
    }

    pub fn circuit_data(&self, id: u32) -> Result<CircuitData> {
        let geometry = self.circuit(id)?;
        Ok(CircuitData {
            id,
            call_list_capacity: geometry.call_list_len(),
            call_list: geometry
                .call_list(&self.memory)
                .into_iter()
                .filter_map(|offset| self.id_of(offset))
                .collect(),
            output_refs: (0..geometry.output_count())
                .map(|i| self.solve_io_reference(self.memory.read::<u32>(geometry.output_ref(i))))
                .collect(),
        })
    }

    pub fn free_memory(&self) -> FreeMemory {
        FreeMemory {
            data_mem_size: self.memory.system_sector().data_mem_size,
            free_bytes: self.memory.free_bytes(),
            largest_free_block: self.memory.largest_free_block(),
        }
    }
}
