//! The "Heap compare equal after no-op" scenario: comparing a heap against itself (no guest
//! execution in between) must report equal.

use mc_snapshot_core::address_space::AddressSpace;
use mc_snapshot_core::heap_compare::{HeapBlock, HeapComparator, HeapLayout};
use mc_snapshot_core::process_mem::ProcessMemory;
use mc_snapshot_core::util::Address;

#[test]
fn compare_snapshot_against_itself_is_equal() {
    let payload: [u64; 4] = [0xA, 0xB, 0xC, 0xD];
    let addr = Address::from_ptr(payload.as_ptr());

    let layout = HeapLayout {
        blocks: vec![HeapBlock {
            address: addr,
            size: std::mem::size_of_val(&payload),
            busy: true,
            fragments: Vec::new(),
            allocator_type: Some(7),
            dwarf_type: None,
            is_stack_region: false,
        }],
        heap_start: Address::from_ptr(payload.as_ptr()),
        heap_end: addr.add(std::mem::size_of_val(&payload) + 1),
        to_ignore: Vec::new(),
    };

    let left_space = AddressSpace::live(ProcessMemory::for_self());
    let right_space = AddressSpace::live(ProcessMemory::for_self());

    let mut comparator = HeapComparator::new(&layout, &layout, &left_space, &right_space);
    assert!(comparator.compare());
}
