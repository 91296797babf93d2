//! The static function library.
//!
//! Primitives are a closed set. Each one declares its IO and static cells
//! and implements a pure `run` over the block's value array; adding a
//! primitive means adding a variant and a table entry.

use std::collections::BTreeMap;

use crate::flags::IoFlags;

/// Library ID used by circuits (they have no primitive).
pub const CIRCUIT_LIBRARY: u8 = 0;

/// Library ID of the logic primitives.
pub const LOGIC_LIBRARY: u8 = 1;

/// Logic library opcodes.
pub mod logic {
    pub const AND: u8 = 0;
    pub const OR: u8 = 1;
    pub const XOR: u8 = 2;
    pub const NOT: u8 = 3;
    pub const RISING: u8 = 4;
    pub const FALLING: u8 = 5;
    pub const RS: u8 = 6;
}

/// Index layout handed to a primitive.
///
/// `input`, `output` and `statics` are indices into the value array, which
/// holds the inputs, then the outputs, then the static cells.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunParams {
    pub input_count: usize,
    pub output_count: usize,
    pub static_count: usize,
    pub input: usize,
    pub output: usize,
    pub statics: usize,
    pub dt: f32,
}

impl RunParams {
    pub fn new(input_count: usize, output_count: usize, static_count: usize, dt: f32) -> Self {
        Self {
            input_count,
            output_count,
            static_count,
            input: 0,
            output: input_count,
            statics: input_count + output_count,
            dt,
        }
    }

    /// Length of the value array the primitive may touch.
    pub fn value_count(&self) -> usize {
        self.input_count + self.output_count + self.static_count
    }
}

/// The primitive kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    And,
    Or,
    Xor,
    Not,
    RisingEdge,
    FallingEdge,
    /// Reset-dominant latch. Q is kept in the output slot between runs.
    RsLatch,
}

fn truth(value: f32) -> bool {
    value != 0.0
}

fn level(value: bool) -> f32 {
    if value {
        1.0
    } else {
        0.0
    }
}

impl Primitive {
    /// Run the primitive. Reads and writes stay inside `params`' ranges.
    pub fn run(self, params: &RunParams, values: &mut [f32]) {
        let inputs = params.input..params.input + params.input_count;
        let out = params.output;
        match self {
            Primitive::And => {
                values[out] = level(values[inputs].iter().all(|v| truth(*v)));
            }
            Primitive::Or => {
                values[out] = level(values[inputs].iter().any(|v| truth(*v)));
            }
            Primitive::Xor => {
                let high = values[inputs].iter().filter(|v| truth(**v)).count();
                values[out] = level(high % 2 == 1);
            }
            Primitive::Not => {
                values[out] = level(!truth(values[params.input]));
            }
            Primitive::RisingEdge => {
                let current = truth(values[params.input]);
                let previous = truth(values[params.statics]);
                values[out] = level(current && !previous);
                values[params.statics] = level(current);
            }
            Primitive::FallingEdge => {
                let current = truth(values[params.input]);
                let previous = truth(values[params.statics]);
                values[out] = level(!current && previous);
                values[params.statics] = level(current);
            }
            Primitive::RsLatch => {
                let set = truth(values[params.input]);
                let reset = truth(values[params.input + 1]);
                let q = truth(values[out]);
                values[out] = level(!reset && (set || q));
            }
        }
    }
}

/// One input or output declaration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IoSpec {
    pub name: &'static str,
    pub init: f32,
    pub flags: IoFlags,
}

impl IoSpec {
    const fn boolean(name: &'static str) -> Self {
        Self {
            name,
            init: 0.0,
            flags: IoFlags::BOOLEAN,
        }
    }
}

/// Inclusive range of accepted IO counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountRange {
    pub min: u8,
    pub max: u8,
}

impl CountRange {
    pub fn contains(&self, count: u8) -> bool {
        (self.min..=self.max).contains(&count)
    }
}

/// A library entry.
#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: &'static str,
    pub primitive: Primitive,
    pub inputs: &'static [IoSpec],
    pub outputs: &'static [IoSpec],
    pub variable_inputs: Option<CountRange>,
    pub variable_outputs: Option<CountRange>,
    pub static_count: u16,
}

impl FunctionDef {
    /// Resolve the input count for a new block.
    pub fn input_count(&self, requested: Option<u8>) -> Option<u8> {
        Self::resolve(self.inputs.len() as u8, self.variable_inputs, requested)
    }

    /// Resolve the output count for a new block.
    pub fn output_count(&self, requested: Option<u8>) -> Option<u8> {
        Self::resolve(self.outputs.len() as u8, self.variable_outputs, requested)
    }

    fn resolve(default: u8, range: Option<CountRange>, requested: Option<u8>) -> Option<u8> {
        match (requested, range) {
            (None, _) => Some(default),
            (Some(count), _) if count == default => Some(count),
            (Some(count), Some(range)) if range.contains(count) => Some(count),
            _ => None,
        }
    }

    /// Spec of input `index`; extra variable inputs repeat the last declared one.
    pub fn input_spec(&self, index: usize) -> Option<&IoSpec> {
        self.inputs.get(index).or(self.inputs.last())
    }

    /// Spec of output `index`; extra variable outputs repeat the last declared one.
    pub fn output_spec(&self, index: usize) -> Option<&IoSpec> {
        self.outputs.get(index).or(self.outputs.last())
    }

    /// Whether a stored header can be run by this primitive without
    /// reading outside the block.
    pub fn accepts(&self, input_count: u8, output_count: u8, static_count: u16) -> bool {
        let inputs_ok = input_count as usize == self.inputs.len()
            || self.variable_inputs.is_some_and(|r| r.contains(input_count));
        let outputs_ok = output_count as usize == self.outputs.len()
            || self.variable_outputs.is_some_and(|r| r.contains(output_count));
        inputs_ok && outputs_ok && static_count >= self.static_count
    }
}

/// The functions registered under one library ID.
struct Library {
    id: u8,
    functions: &'static [FunctionDef],
}

const GATE_INPUTS: &[IoSpec] = &[IoSpec::boolean("in0"), IoSpec::boolean("in1")];
const SINGLE_INPUT: &[IoSpec] = &[IoSpec::boolean("in")];
const SINGLE_OUTPUT: &[IoSpec] = &[IoSpec::boolean("out")];
const WIDE_GATE: Option<CountRange> = Some(CountRange { min: 2, max: 64 });

static LOGIC_FUNCTIONS: [FunctionDef; 7] = [
    FunctionDef {
        name: "AND",
        primitive: Primitive::And,
        inputs: GATE_INPUTS,
        outputs: SINGLE_OUTPUT,
        variable_inputs: WIDE_GATE,
        variable_outputs: None,
        static_count: 0,
    },
    FunctionDef {
        name: "OR",
        primitive: Primitive::Or,
        inputs: GATE_INPUTS,
        outputs: SINGLE_OUTPUT,
        variable_inputs: WIDE_GATE,
        variable_outputs: None,
        static_count: 0,
    },
    FunctionDef {
        name: "XOR",
        primitive: Primitive::Xor,
        inputs: GATE_INPUTS,
        outputs: SINGLE_OUTPUT,
        variable_inputs: None,
        variable_outputs: None,
        static_count: 0,
    },
    FunctionDef {
        name: "NOT",
        primitive: Primitive::Not,
        inputs: SINGLE_INPUT,
        outputs: SINGLE_OUTPUT,
        variable_inputs: None,
        variable_outputs: None,
        static_count: 0,
    },
    FunctionDef {
        name: "RISING",
        primitive: Primitive::RisingEdge,
        inputs: SINGLE_INPUT,
        outputs: SINGLE_OUTPUT,
        variable_inputs: None,
        variable_outputs: None,
        static_count: 1,
    },
    FunctionDef {
        name: "FALLING",
        primitive: Primitive::FallingEdge,
        inputs: SINGLE_INPUT,
        outputs: SINGLE_OUTPUT,
        variable_inputs: None,
        variable_outputs: None,
        static_count: 1,
    },
    FunctionDef {
        name: "RS",
        primitive: Primitive::RsLatch,
        inputs: &[IoSpec::boolean("S"), IoSpec::boolean("R")],
        outputs: &[IoSpec::boolean("Q")],
        variable_inputs: None,
        variable_outputs: None,
        static_count: 0,
    },
];

static LIBRARIES: [Library; 1] = [Library {
    id: LOGIC_LIBRARY,
    functions: &LOGIC_FUNCTIONS,
}];

lazy_static::lazy_static! {
    static ref REGISTRY: BTreeMap<(u8, u8), &'static FunctionDef> = LIBRARIES
        .iter()
        .flat_map(|library| {
            library
                .functions
                .iter()
                .enumerate()
                .map(move |(opcode, def)| ((library.id, opcode as u8), def))
        })
        .collect();
}

/// Look up a function by (library, opcode).
pub fn lookup(library: u8, opcode: u8) -> Option<&'static FunctionDef> {
    REGISTRY.get(&(library, opcode)).copied()
}
