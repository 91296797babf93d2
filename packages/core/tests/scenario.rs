use softplc_core::{
    logic, monitor, Controller, ControllerConfig, IoAddress, IoFlags, LOGIC_LIBRARY,
};

/// Opcodes of the chain, in call order.
const CHAIN: [u8; 10] = [
    logic::AND,
    logic::OR,
    logic::XOR,
    logic::NOT,
    logic::RISING,
    logic::FALLING,
    logic::RS,
    logic::AND,
    logic::OR,
    logic::XOR,
];

struct Scenario {
    controller: Controller,
    circuit: u32,
    blocks: Vec<u32>,
}

/// IO index of the single output of a chain block.
fn output_of(opcode: u8) -> u32 {
    match opcode {
        logic::NOT | logic::RISING | logic::FALLING => 1,
        _ => 2,
    }
}

fn output(s: &Scenario, index: usize) -> f32 {
    let io = output_of(CHAIN[index]) as usize;
    s.controller.io_values(s.blocks[index]).unwrap()[io]
}

/// A 4-in/2-out circuit calling ten mixed logic blocks, each fed by the
/// previous block's output on input 0, with every odd link inverted.
fn scenario() -> Scenario {
    let mut controller = Controller::new(&ControllerConfig::default()).unwrap();
    let circuit = controller.create_circuit(4, 2, 10, None, None).unwrap();

    let mut blocks: Vec<u32> = Vec::with_capacity(CHAIN.len());
    for (i, &opcode) in CHAIN.iter().enumerate() {
        let id = controller
            .create_function_block(LOGIC_LIBRARY, opcode, Some(circuit), None, None, None, None)
            .unwrap();
        if i > 0 {
            let source = IoAddress {
                id: blocks[i - 1],
                io_num: output_of(CHAIN[i - 1]),
            };
            controller
                .connect_function_input(id, 0, Some(source), Some(i % 2 == 1))
                .unwrap();
        }
        controller.set_monitoring(id, true).unwrap();
        blocks.push(id);
    }

    for (out, index) in [(0, 9), (1, 4)] {
        let source = IoAddress {
            id: blocks[index],
            io_num: output_of(CHAIN[index]),
        };
        controller
            .connect_circuit_output(circuit, out, Some(source))
            .unwrap();
        controller
            .set_io_flags(circuit, 4 + out, IoFlags::BOOLEAN)
            .unwrap();
    }

    Scenario {
        controller,
        circuit,
        blocks,
    }
}

fn started() -> Scenario {
    let mut s = scenario();
    s.controller.create_task(s.circuit, 20.0, 0.0, None).unwrap();
    s.controller.set_io_value(s.blocks[0], 0, 1.0).unwrap();
    s
}

#[test]
fn chain_propagates_truth_table() {
    let mut s = started();
    assert_eq!(s.controller.tick(20.0), 1);

    let outputs: Vec<f32> = (0..CHAIN.len()).map(|i| output(&s, i)).collect();
    assert_eq!(
        outputs,
        vec![0.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0]
    );
    assert_eq!(&s.controller.io_values(s.circuit).unwrap()[4..], &[1.0, 1.0]);

    let changes = s.controller.take_changes();
    assert_eq!(changes.len(), 10);
    assert!(changes.iter().all(|c| s.blocks.contains(&c.id)));
    // Inverted link into NOT: input stays low, output rises.
    assert!(!changes.iter().any(|c| c.id == s.blocks[3] && c.io_num == 0));
    assert!(changes
        .iter()
        .any(|c| c.id == s.blocks[3] && c.io_num == 1 && c.value == 1.0));
    // Inverted link into XOR at the end of the chain.
    assert!(changes
        .iter()
        .any(|c| c.id == s.blocks[9] && c.io_num == 0 && c.value == 1.0));

    let event = monitor::encode(&changes);
    assert_eq!(event.len(), changes.len() * 12);
    assert_eq!(monitor::decode(&event), changes);
}

#[test]
fn edge_detectors_settle_after_one_tick() {
    let mut s = started();
    s.controller.tick(20.0);
    s.controller.take_changes();

    // RISING drops back, which sets the inverted FALLING input high.
    s.controller.tick(20.0);
    let changes: Vec<(u32, u32, f32)> = s
        .controller
        .take_changes()
        .iter()
        .map(|c| (c.id, c.io_num, c.value))
        .collect();
    assert_eq!(
        changes,
        vec![(s.blocks[4], 1, 0.0), (s.blocks[5], 0, 1.0)]
    );
    assert_eq!(&s.controller.io_values(s.circuit).unwrap()[4..], &[1.0, 0.0]);

    s.controller.tick(20.0);
    assert!(s.controller.take_changes().is_empty());
}

#[test]
fn latch_holds_until_reset() {
    let mut s = scenario();
    let rs = s.blocks[6];
    s.controller.connect_function_input(rs, 0, None, None).unwrap();
    s.controller.set_io_value(rs, 0, 1.0).unwrap();
    s.controller.run_block(rs, 20.0).unwrap();
    assert_eq!(output(&s, 6), 1.0);

    // Set goes low, Q is held.
    s.controller.set_io_value(rs, 0, 0.0).unwrap();
    s.controller.run_block(rs, 20.0).unwrap();
    assert_eq!(output(&s, 6), 1.0);

    // Reset dominates a simultaneous set.
    s.controller.set_io_value(rs, 0, 1.0).unwrap();
    s.controller.set_io_value(rs, 1, 1.0).unwrap();
    s.controller.run_block(rs, 20.0).unwrap();
    assert_eq!(output(&s, 6), 0.0);
}

#[test]
fn execution_is_deterministic() {
    let mut first = scenario();
    let mut second = scenario();
    for s in [&mut first, &mut second] {
        s.controller.set_io_value(s.blocks[0], 0, 1.0).unwrap();
        s.controller.set_io_value(s.blocks[0], 1, 1.0).unwrap();
        for _ in 0..3 {
            assert!(s.controller.run_block(s.circuit, 20.0).unwrap());
        }
    }
    assert_eq!(
        first.controller.memory().as_bytes(),
        second.controller.memory().as_bytes()
    );
}

#[test]
fn stored_references_resolve_to_their_source() {
    let s = scenario();
    for (i, pair) in s.blocks.windows(2).enumerate() {
        let data = s.controller.function_data(pair[1]).unwrap();
        assert_eq!(
            data.input_refs[0],
            Some(IoAddress {
                id: pair[0],
                io_num: output_of(CHAIN[i]),
            })
        );
    }
    let circuit = s.controller.circuit_data(s.circuit).unwrap();
    assert_eq!(circuit.call_list, s.blocks);
    assert_eq!(
        circuit.output_refs,
        vec![
            Some(IoAddress {
                id: s.blocks[9],
                io_num: 2
            }),
            Some(IoAddress {
                id: s.blocks[4],
                io_num: 1
            }),
        ]
    );
}
