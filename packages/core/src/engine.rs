//! Execution of Function and Circuit blocks.
//!
//! Running a block pulls its connected inputs, then either runs its
//! primitive or walks its call list, then (for circuits) pulls its outputs.
//! Failures are reported as `false`; nothing here panics on a malformed
//! block.

use tracing::{debug, trace};

use crate::flags::{BlockType, IoFlags};
use crate::function::FunctionGeometry;
use crate::library::{self, RunParams};
use crate::memory::Memory;
use crate::monitor::{IoChange, MonitorBuffer};
use crate::records::SLOT_SIZE;

/// Circuits nested deeper than this are not run.
pub const MAX_CALL_DEPTH: usize = 32;

/// Reduce a pulled value according to the destination's flags.
fn coerce(value: f32, flags: IoFlags, apply_inversion: bool) -> f32 {
    if flags.is_boolean() {
        let high = (value != 0.0) ^ (apply_inversion && flags.is_inverted());
        if high {
            1.0
        } else {
            0.0
        }
    } else if flags.is_integer() {
        value.trunc()
    } else {
        value
    }
}

/// Runs blocks against a memory region, reporting monitored changes.
pub struct Engine<'a> {
    memory: &'a mut Memory,
    monitor: &'a mut MonitorBuffer,
}

impl<'a> Engine<'a> {
    pub fn new(memory: &'a mut Memory, monitor: &'a mut MonitorBuffer) -> Self {
        Self { memory, monitor }
    }

    /// Run the block at byte offset `offset` with time step `dt`.
    pub fn run_block(&mut self, offset: u32, dt: f32) -> bool {
        self.run_at_depth(offset, dt, 0)
    }

    fn run_at_depth(&mut self, offset: u32, dt: f32, depth: usize) -> bool {
        if depth > MAX_CALL_DEPTH {
            debug!(offset, "call depth exceeded");
            return false;
        }
        let Some(geometry) = FunctionGeometry::read(self.memory, offset) else {
            debug!(offset, "not an executable block");
            return false;
        };

        let monitored = geometry.header.flags().is_monitored();
        let before = monitored.then(|| self.io_values(&geometry));

        self.pull_inputs(&geometry);
        let ok = match geometry.block_type {
            BlockType::Function => self.run_function(&geometry, dt),
            BlockType::Circuit => {
                self.run_circuit(&geometry, dt, depth);
                true
            }
            _ => false,
        };

        if let Some(before) = before {
            self.report_changes(&geometry, &before);
        }
        ok
    }

    fn io_values(&self, geometry: &FunctionGeometry) -> Vec<f32> {
        (0..geometry.io_count())
            .map(|i| self.memory.read::<f32>(geometry.io_value(i)))
            .collect()
    }

    /// Load a referenced value, or `None` for unconnected and out-of-range refs.
    fn pull(&self, reference: u32) -> Option<f32> {
        if reference == 0 || !self.memory.contains(reference, SLOT_SIZE) {
            return None;
        }
        Some(self.memory.read::<f32>(reference))
    }

    fn pull_inputs(&mut self, geometry: &FunctionGeometry) {
        for i in 0..geometry.input_count() {
            let reference = self.memory.read::<u32>(geometry.input_ref(i));
            if let Some(value) = self.pull(reference) {
                let flags = geometry.flags(self.memory, i);
                self.memory
                    .write(geometry.io_value(i), coerce(value, flags, true));
            }
        }
    }

    fn run_function(&mut self, geometry: &FunctionGeometry, dt: f32) -> bool {
        let header = &geometry.header;
        let Some(def) = library::lookup(header.library, header.opcode) else {
            debug!(
                library = header.library,
                opcode = header.opcode,
                "unknown primitive"
            );
            return false;
        };
        if !def.accepts(header.input_count, header.output_count, header.static_count) {
            debug!(name = def.name, "io counts do not match primitive");
            return false;
        }

        let params = RunParams::new(
            header.input_count as usize,
            header.output_count as usize,
            header.static_count as usize,
            dt,
        );
        let count = params.value_count() as u32;
        let mut values: Vec<f32> = (0..count)
            .map(|i| self.memory.read::<f32>(geometry.io_value(i)))
            .collect();
        def.primitive.run(&params, &mut values);
        for (i, value) in values.into_iter().enumerate() {
            self.memory.write(geometry.io_value(i as u32), value);
        }
        trace!(name = def.name, block = geometry.block, "ran function");
        true
    }

    fn run_circuit(&mut self, geometry: &FunctionGeometry, dt: f32, depth: usize) {
        for child in geometry.call_list(self.memory) {
            if child == geometry.block {
                continue;
            }
            if !self.run_at_depth(child, dt, depth + 1) {
                debug!(circuit = geometry.block, child, "child block failed");
            }
        }

        let inputs = geometry.input_count();
        for i in 0..geometry.output_count() {
            let reference = self.memory.read::<u32>(geometry.output_ref(i));
            if let Some(value) = self.pull(reference) {
                let flags = geometry.flags(self.memory, inputs + i);
                self.memory
                    .write(geometry.io_value(inputs + i), coerce(value, flags, false));
            }
        }
    }

    fn report_changes(&mut self, geometry: &FunctionGeometry, before: &[f32]) {
        let mut id = None;
        for (i, old) in before.iter().enumerate() {
            let value = self.memory.read::<f32>(geometry.io_value(i as u32));
            if value.to_bits() == old.to_bits() {
                continue;
            }
            let id = match id {
                Some(id) => id,
                None => match self.memory.reverse_lookup(geometry.block) {
                    Some(found) => *id.insert(found),
                    None => return,
                },
            };
            self.monitor.record(IoChange {
                id,
                io_num: i as u32,
                value,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::FunctionFlags;
    use crate::function::body_size;
    use crate::library::{logic, LOGIC_LIBRARY};
    use crate::memory::ControllerConfig;
    use crate::records::{FunctionHeader, HEADER_SIZE};

    fn memory() -> Memory {
        Memory::new(&ControllerConfig::default()).unwrap()
    }

    fn gate(memory: &mut Memory, opcode: u8, inputs: u8, statics: u16) -> FunctionGeometry {
        let allocation = memory
            .allocate(body_size(inputs, 1, statics), BlockType::Function, 0)
            .unwrap();
        memory.write_record(
            allocation.offset + HEADER_SIZE,
            &FunctionHeader {
                library: LOGIC_LIBRARY,
                opcode,
                input_count: inputs,
                output_count: 1,
                static_count: statics,
                function_flags: 0,
            },
        );
        let geometry = FunctionGeometry::read(memory, allocation.offset).unwrap();
        for i in 0..geometry.io_count() {
            memory.write(geometry.io_flag(i), IoFlags::BOOLEAN.bits());
        }
        geometry
    }

    fn run(memory: &mut Memory, offset: u32) -> bool {
        let mut monitor = MonitorBuffer::default();
        Engine::new(memory, &mut monitor).run_block(offset, 20.0)
    }

    #[test]
    fn coercion_rules() {
        assert_eq!(coerce(0.3, IoFlags::BOOLEAN, true), 1.0);
        assert_eq!(coerce(0.0, IoFlags::BOOLEAN | IoFlags::INVERTED, true), 1.0);
        assert_eq!(coerce(0.0, IoFlags::BOOLEAN | IoFlags::INVERTED, false), 0.0);
        assert_eq!(coerce(-2.7, IoFlags::INTEGER, true), -2.0);
        assert_eq!(coerce(2.5, IoFlags::NONE, true), 2.5);
    }

    #[test]
    fn runs_primitive_with_pulled_inputs() {
        let mut memory = memory();
        let source = gate(&mut memory, logic::NOT, 1, 0);
        let and = gate(&mut memory, logic::AND, 2, 0);

        // NOT of 0 gives 1; AND pulls it into input 0.
        assert!(run(&mut memory, source.block));
        memory.write(and.input_ref(0), source.io_value(1));
        memory.write(and.io_value(1), 1.0f32);
        assert!(run(&mut memory, and.block));
        assert_eq!(memory.read::<f32>(and.io_value(0)), 1.0);
        assert_eq!(memory.read::<f32>(and.io_value(2)), 1.0);

        // Inverting the connection flips the result.
        memory.write(and.io_flag(0), (IoFlags::BOOLEAN | IoFlags::INVERTED).bits());
        assert!(run(&mut memory, and.block));
        assert_eq!(memory.read::<f32>(and.io_value(2)), 0.0);
    }

    #[test]
    fn unconnected_inputs_keep_their_value() {
        let mut memory = memory();
        let or = gate(&mut memory, logic::OR, 2, 0);
        memory.write(or.io_value(1), 1.0f32);
        assert!(run(&mut memory, or.block));
        assert_eq!(memory.read::<f32>(or.io_value(1)), 1.0);
        assert_eq!(memory.read::<f32>(or.io_value(2)), 1.0);
    }

    #[test]
    fn failures_return_false() {
        let mut memory = memory();
        let data = memory.allocate(32, BlockType::Data, 0).unwrap();
        assert!(!run(&mut memory, data.offset));
        assert!(!run(&mut memory, 0));
        let past_end = memory.len() + 100;
        assert!(!run(&mut memory, past_end));

        let unknown = gate(&mut memory, logic::NOT, 1, 0);
        memory.write(unknown.block + HEADER_SIZE + 1, 99u8);
        assert!(!run(&mut memory, unknown.block));

        // RISING needs one static cell.
        let starved = gate(&mut memory, logic::RISING, 1, 0);
        assert!(!run(&mut memory, starved.block));
    }

    #[test]
    fn statics_persist_between_runs() {
        let mut memory = memory();
        let rising = gate(&mut memory, logic::RISING, 1, 1);
        memory.write(rising.io_value(0), 1.0f32);
        assert!(run(&mut memory, rising.block));
        assert_eq!(memory.read::<f32>(rising.io_value(1)), 1.0);
        assert!(run(&mut memory, rising.block));
        assert_eq!(memory.read::<f32>(rising.io_value(1)), 0.0);
    }

    #[test]
    fn monitored_block_reports_changes() {
        let mut memory = memory();
        let not = gate(&mut memory, logic::NOT, 1, 0);
        memory.write(
            not.block + HEADER_SIZE + 6,
            FunctionFlags::MONITORED.bits(),
        );
        let id = memory.reverse_lookup(not.block).unwrap();

        let mut monitor = MonitorBuffer::default();
        assert!(Engine::new(&mut memory, &mut monitor).run_block(not.block, 20.0));
        assert_eq!(
            monitor.take(),
            vec![IoChange {
                id,
                io_num: 1,
                value: 1.0
            }]
        );

        assert!(Engine::new(&mut memory, &mut monitor).run_block(not.block, 20.0));
        assert!(monitor.is_empty());
    }
}
