//! Periodic task execution.

use std::time::Instant;

use tracing::trace;

use crate::engine::Engine;
use crate::flags::BlockType;
use crate::memory::Memory;
use crate::monitor::MonitorBuffer;
use crate::records::{TaskRecord, HEADER_SIZE, TASK_RECORD_SIZE};

/// Read the task record of the Task block at `offset`.
pub fn task_record(memory: &Memory, offset: u32) -> Option<TaskRecord> {
    if !memory.contains(offset, HEADER_SIZE + TASK_RECORD_SIZE) {
        return None;
    }
    memory
        .header(offset)
        .is(BlockType::Task)
        .then(|| memory.read_record(offset + HEADER_SIZE))
}

pub fn write_task_record(memory: &mut Memory, offset: u32, task: &TaskRecord) {
    memory.write_record(offset + HEADER_SIZE, task);
}

/// Advance every listed task by `dt` milliseconds.
///
/// A task fires at most once per tick, in list order, and runs its target
/// with `dt` equal to its interval. Returns the number of tasks that fired.
pub fn tick(memory: &mut Memory, monitor: &mut MonitorBuffer, dt: f32) -> usize {
    let mut fired = 0;
    for offset in memory.task_list() {
        let Some(mut task) = task_record(memory, offset) else {
            continue;
        };
        task.time_accu += dt;
        if task.interval > 0.0 && task.time_accu >= task.interval {
            task.time_accu -= task.interval;
            let started = Instant::now();
            if task.target_ref != 0 {
                Engine::new(memory, monitor).run_block(task.target_ref, task.interval);
            }
            task.add_cpu_time(started.elapsed().as_secs_f64() * 1000.0);
            task.run_count = task.run_count.wrapping_add(1);
            fired += 1;
            trace!(task = offset, run_count = task.run_count, "task fired");
        }
        write_task_record(memory, offset, &task);
    }
    fired
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ControllerConfig;

    fn memory_with_task(interval: f32, offset: f32) -> (Memory, u32) {
        let mut memory = Memory::new(&ControllerConfig::default()).unwrap();
        let block = memory
            .allocate(TASK_RECORD_SIZE, BlockType::Task, 0)
            .unwrap();
        write_task_record(
            &mut memory,
            block.offset,
            &TaskRecord {
                interval,
                offset,
                time_accu: offset,
                ..Default::default()
            },
        );
        assert!(memory.insert_task(block.offset, None));
        (memory, block.offset)
    }

    #[test]
    fn phase_offset_and_residual() {
        let (mut memory, task) = memory_with_task(20.0, 10.0);
        let mut monitor = MonitorBuffer::default();

        // 10 + 5 = 15: no fire
        assert_eq!(tick(&mut memory, &mut monitor, 5.0), 0);
        // 15 + 7 = 22: fire, residual 2
        assert_eq!(tick(&mut memory, &mut monitor, 7.0), 1);
        let record = task_record(&memory, task).unwrap();
        assert_eq!(record.run_count, 1);
        assert!((record.time_accu - 2.0).abs() < 1e-6);

        // 2 + 5 + 7 = 14: no fire; + 5 = 19: no fire; + 7 = 26: fire, residual 6
        assert_eq!(tick(&mut memory, &mut monitor, 5.0), 0);
        assert_eq!(tick(&mut memory, &mut monitor, 7.0), 0);
        assert_eq!(tick(&mut memory, &mut monitor, 5.0), 0);
        assert_eq!(tick(&mut memory, &mut monitor, 7.0), 1);
        let record = task_record(&memory, task).unwrap();
        assert_eq!(record.run_count, 2);
        assert!((record.time_accu - 6.0).abs() < 1e-6);
    }

    #[test]
    fn fires_at_most_once_per_tick() {
        let (mut memory, task) = memory_with_task(10.0, 0.0);
        let mut monitor = MonitorBuffer::default();
        assert_eq!(tick(&mut memory, &mut monitor, 35.0), 1);
        let record = task_record(&memory, task).unwrap();
        assert_eq!(record.run_count, 1);
        assert!((record.time_accu - 25.0).abs() < 1e-6);
    }

    #[test]
    fn zero_interval_never_fires() {
        let (mut memory, _) = memory_with_task(0.0, 0.0);
        let mut monitor = MonitorBuffer::default();
        assert_eq!(tick(&mut memory, &mut monitor, 100.0), 0);
    }

    #[test]
    fn non_task_entries_are_skipped() {
        let mut memory = Memory::new(&ControllerConfig::default()).unwrap();
        let data = memory.allocate(TASK_RECORD_SIZE, BlockType::Data, 0).unwrap();
        memory.insert_task(data.offset, None);
        let before = memory.as_bytes().to_vec();
        let mut monitor = MonitorBuffer::default();
        assert_eq!(tick(&mut memory, &mut monitor, 20.0), 0);
        assert_eq!(memory.as_bytes(), &before[..]);
    }
}
