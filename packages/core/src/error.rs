//! Error types for the controller core.

use thiserror::Error;

use crate::flags::BlockType;

/// Errors returned by controller operations.
///
/// The allocator and the execution engine report failure with sentinels
/// (`Option`, `bool`); these errors are produced by the block-level
/// operations that callers drive directly.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The requested memory geometry cannot hold a controller.
    #[error("invalid controller configuration: {0}")]
    InvalidConfig(String),

    /// No free block is large enough, or the data-block table is full.
    #[error("out of memory: cannot allocate {0} bytes")]
    OutOfMemory(u32),

    /// No allocated block uses the given ID.
    #[error("block not found: {0}")]
    BlockNotFound(u32),

    /// The block exists but has the wrong type for the operation.
    #[error("block {id} is {actual:?}, expected {expected}")]
    WrongBlockType {
        id: u32,
        expected: &'static str,
        actual: BlockType,
    },

    /// An IO index is outside the block's inputs/outputs.
    #[error("io index {index} out of range for block {id}")]
    InvalidIo { id: u32, index: u32 },

    /// No primitive is registered under (library, opcode).
    #[error("unknown function: library {library}, opcode {opcode}")]
    UnknownFunction { library: u8, opcode: u8 },

    /// Requested input/output/static counts are outside the function's range.
    #[error("invalid io count: {0}")]
    InvalidIoCount(String),

    /// The circuit has no free call-list slot.
    #[error("call list of circuit {0} is full")]
    CallListFull(u32),

    /// A block is not part of the given circuit's call list.
    #[error("block {child} is not called by circuit {parent}")]
    NotInCallList { parent: u32, child: u32 },

    /// The task list has no free slot.
    #[error("task list is full")]
    TaskListFull,

    /// A task parameter is out of range.
    #[error("invalid task: {0}")]
    InvalidTask(String),

    /// A memory image failed validation.
    #[error("corrupt memory image: {0}")]
    CorruptImage(String),

    /// An I/O error occurred while saving or loading an image.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
