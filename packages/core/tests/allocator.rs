use softplc_core::{BlockType, ControllerConfig, Memory, HEADER_SIZE};

/// Small deterministic generator so the sequence is reproducible.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u32 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 33) as u32
    }
}

fn free_regions(memory: &Memory) -> Vec<(u32, u32)> {
    let mut free: Vec<(u32, u32)> = memory
        .blocks()
        .filter_map(|(_, offset)| {
            let header = memory.header(offset);
            header
                .is(BlockType::Unallocated)
                .then_some((offset, header.byte_length))
        })
        .collect();
    free.sort();
    free
}

#[test]
fn random_sequences_keep_free_space_coalesced() {
    for seed in 1..=8u64 {
        let mut rng = Lcg(seed);
        let mut memory = Memory::new(&ControllerConfig {
            id: 1,
            mem_size: 8192,
            datablock_table_length: 128,
            task_list_length: 4,
        })
        .unwrap();
        let data_mem_size = memory.system_sector().data_mem_size;
        let mut live: Vec<u32> = Vec::new();

        for _ in 0..400 {
            if live.is_empty() || rng.next() % 3 != 0 {
                let size = rng.next() % 200;
                if let Some(allocation) = memory.allocate(size, BlockType::Data, 0) {
                    assert!(allocation.length >= size + HEADER_SIZE);
                    assert_eq!(allocation.length % 4, 0);
                    live.push(allocation.id);
                }
            } else {
                let index = rng.next() as usize % live.len();
                let id = live.swap_remove(index);
                assert!(memory.free(id));
            }

            memory.verify().unwrap();
            let free = free_regions(&memory);
            for pair in free.windows(2) {
                let (offset, length) = pair[0];
                assert!(offset + length < pair[1].0, "free blocks touch or overlap");
            }
            let used: u32 = live
                .iter()
                .map(|&id| memory.block(id).unwrap().1.byte_length)
                .sum();
            assert_eq!(used + memory.free_bytes(), data_mem_size);
        }

        for id in live.drain(..) {
            assert!(memory.free(id));
        }
        assert_eq!(free_regions(&memory).len(), 1);
        assert_eq!(memory.largest_free_block(), data_mem_size);
    }
}
