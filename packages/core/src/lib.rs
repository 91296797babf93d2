//! SoftPLC controller core
//!
//! A virtual controller keeps its whole program in one byte region:
//! - `memory`: system sector, data-block table, task list and the data-block allocator
//! - `function`: pointer arithmetic for Function and Circuit blocks
//! - `library`: the static primitive library
//! - `engine`: runs blocks, pulling inputs through stored references
//! - `scheduler`: fires tasks on accumulated time
//! - `monitor`: records IO value changes of monitored blocks
//!
//! [`Controller`] ties them together and is the type the runtime owns.
//!
//! # Example
//!
//! ```rust
//! use softplc_core::{logic, Controller, ControllerConfig, IoAddress, LOGIC_LIBRARY};
//!
//! let mut controller = Controller::new(&ControllerConfig::default()).unwrap();
//! let not = controller
//!     .create_function_block(LOGIC_LIBRARY, logic::NOT, None, None, None, None, None)
//!     .unwrap();
//! let and = controller
//!     .create_function_block(LOGIC_LIBRARY, logic::AND, None, None, None, None, None)
//!     .unwrap();
//! controller
//!     .connect_function_input(and, 0, Some(IoAddress { id: not, io_num: 1 }), None)
//!     .unwrap();
//! controller.run_block(not, 20.0).unwrap();
//! controller.run_block(and, 20.0).unwrap();
//! assert_eq!(controller.io_values(and).unwrap(), vec![1.0, 0.0, 0.0]);
//! ```

mod controller;
mod engine;
mod error;
mod flags;
pub mod function;
mod image;
pub mod library;
mod memory;
pub mod monitor;
mod records;
pub mod scheduler;

pub use controller::{
    CircuitData, Controller, FreeMemory, FunctionData, IoAddress, TableEntry, TaskData,
};
pub use engine::{Engine, MAX_CALL_DEPTH};
pub use error::{CoreError, Result};
pub use flags::{BlockType, FunctionFlags, IoFlags};
pub use library::{logic, FunctionDef, Primitive, RunParams, CIRCUIT_LIBRARY, LOGIC_LIBRARY};
pub use memory::{Allocation, ControllerConfig, Memory};
pub use monitor::{IoChange, MonitorBuffer, DEFAULT_MONITOR_CAPACITY};
pub use records::{
    DatablockHeader, FunctionHeader, SystemSector, TaskRecord, FUNCTION_HEADER_SIZE, HEADER_SIZE,
    LAYOUT_VERSION, SLOT_SIZE, SYSTEM_SECTOR_SIZE, TASK_RECORD_SIZE,
};
