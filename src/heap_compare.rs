//! Structural two-snapshot heap comparator (SPEC_FULL.md §4.9).
//!
//! Grounded on `StateComparator`/`ProcessComparisonState` in the original source's `mc_diff.cpp`:
//! per-snapshot block/fragment matrices record matches as they're discovered, and a cycle-guard
//! set breaks pointer-chasing recursion. Per §9's re-architecture note on "incremental typing via
//! mutable matrices", the comparator owns both matrices itself rather than sharing them, and
//! treats type inference as monotonic fill-in plus an explicit in-progress set for cycles.

use std::collections::HashSet;

use crate::address_space::AddressSpace;
use crate::dwarf::types::{Type, TypeKind};
use crate::error::TypeMismatch;
use crate::util::Address;

/// One allocator-exposed block of heap memory: its busy/free state, size, and (if fragmented)
/// fragment boundaries. Exposed by the host allocator's bookkeeping; constructing this from raw
/// allocator metadata is out of scope (SPEC_FULL.md §1).
#[derive(Debug, Clone)]
pub struct HeapBlock {
    pub address: Address,
    pub size: usize,
    pub busy: bool,
    /// Byte offsets of fragment boundaries within the block; empty means "one fragment, the
    /// whole block".
    pub fragments: Vec<usize>,
    /// The allocator-level type id the block was allocated with, if the allocator tracks one
    /// (independent of whether a DWARF `Type` is known for it).
    pub allocator_type: Option<u32>,
    pub dwarf_type: Option<Type>,
    /// Stack-region blocks are matched by identity and excluded from deep comparison
    /// (SPEC_FULL.md §4.9, step 1).
    pub is_stack_region: bool,
}

/// Per-snapshot heap layout fed to the comparator.
pub struct HeapLayout {
    pub blocks: Vec<HeapBlock>,
    pub heap_start: Address,
    pub heap_end: Address,
    /// Regions to skip entirely, sorted by address for binary search (SPEC_FULL.md §4.9, step
    /// 4).
    pub to_ignore: Vec<Address>,
}

impl HeapLayout {
    fn is_ignored(&self, addr: Address) -> bool {
        self.to_ignore.binary_search(&addr).is_ok()
    }

    fn in_heap_range(&self, addr: Address) -> bool {
        addr >= self.heap_start && addr < self.heap_end
    }
}

const MAX_FRAGMENTS_PER_BLOCK: usize = 16;

/// A (block, fragment) coordinate; `fragment == 0` and no further fragments means "the whole
/// block".
type Coord = (usize, usize);

fn matrix_index(block: usize, fragment: usize) -> usize {
    MAX_FRAGMENTS_PER_BLOCK * block + fragment
}

/// Per-snapshot scratch state: the match matrix and the cycle-detection guard.
struct ProcessComparisonState {
    /// `equals_to[matrix_index(block, fragment)]` is the matched coordinate on the other side,
    /// once known.
    equals_to: Vec<Option<Coord>>,
}

impl ProcessComparisonState {
    fn new(block_count: usize) -> Self {
        ProcessComparisonState {
            equals_to: vec![None; MAX_FRAGMENTS_PER_BLOCK * block_count.max(1)],
        }
    }

    fn get(&self, block: usize, fragment: usize) -> Option<Coord> {
        self.equals_to[matrix_index(block, fragment)]
    }

    fn set(&mut self, block: usize, fragment: usize, other: Coord) {
        self.equals_to[matrix_index(block, fragment)] = Some(other);
    }
}

/// Compares two heaps for structural equality modulo allocation-order noise. Read-only over both
/// snapshots; owns its own scratch matrices so no shared mutable state survives the call.
pub struct HeapComparator<'a> {
    left: &'a HeapLayout,
    right: &'a HeapLayout,
    left_space: &'a AddressSpace<'a>,
    right_space: &'a AddressSpace<'a>,
    left_state: ProcessComparisonState,
    right_state: ProcessComparisonState,
    /// All `(left_coord, right_coord)` pairs currently on the recursion stack; a hit is treated
    /// as "equal under assumption" to break pointer cycles (SPEC_FULL.md §4.9, "Cycle-breaking").
    previous: HashSet<(Coord, Coord)>,
}

impl<'a> HeapComparator<'a> {
    pub fn new(
        left: &'a HeapLayout,
        right: &'a HeapLayout,
        left_space: &'a AddressSpace<'a>,
        right_space: &'a AddressSpace<'a>,
    ) -> Self {
        HeapComparator {
            left_state: ProcessComparisonState::new(left.blocks.len()),
            right_state: ProcessComparisonState::new(right.blocks.len()),
            left,
            right,
            left_space,
            right_space,
            previous: HashSet::new(),
        }
    }

    /// Decide whether the two heaps are equal. Symmetric: `compare(a, b) == compare(b, a)`
    /// (SPEC_FULL.md §8, invariant 10).
    pub fn compare(&mut self) -> bool {
        for (block_idx, block) in self.left.blocks.iter().enumerate() {
            if !block.busy || block.is_stack_region {
                continue;
            }
            if self.left_state.get(block_idx, 0).is_some() {
                continue;
            }
            if !self.match_block(block_idx) {
                return false;
            }
        }

        // Every left busy block matched something on the right, but that alone doesn't rule out
        // the right side having extra busy blocks of its own (left ⊂ right). Require every right
        // busy, non-stack block to have been matched too, so `compare` is symmetric.
        for (block_idx, block) in self.right.blocks.iter().enumerate() {
            if !block.busy || block.is_stack_region {
                continue;
            }
            if self.right_state.get(block_idx, 0).is_none() {
                return false;
            }
        }
        true
    }

    /// Try to match busy block `block_idx` on the left against a block on the right: same index
    /// first, then any busy block of the same allocator type (SPEC_FULL.md §4.9, step 1).
    fn match_block(&mut self, block_idx: usize) -> bool {
        let block = &self.left.blocks[block_idx];

        if let Some(candidate) = self.right.blocks.get(block_idx) {
            if candidate.busy && self.blocks_compatible(block, candidate) {
                if self.compare_block_pair(block_idx, block_idx) {
                    return true;
                }
            }
        }

        let candidates: Vec<usize> = self
            .right
            .blocks
            .iter()
            .enumerate()
            .filter(|(i, b)| *i != block_idx && b.busy && self.blocks_compatible(block, b))
            .map(|(i, _)| i)
            .collect();

        for candidate_idx in candidates {
            if self.compare_block_pair(block_idx, candidate_idx) {
                return true;
            }
        }
        false
    }

    fn blocks_compatible(&self, a: &HeapBlock, b: &HeapBlock) -> bool {
        a.allocator_type == b.allocator_type && a.size == b.size
    }

    fn compare_block_pair(&mut self, left_idx: usize, right_idx: usize) -> bool {
        let left_block = &self.left.blocks[left_idx];
        let right_block = &self.right.blocks[right_idx];

        if left_block.fragments.is_empty() && right_block.fragments.is_empty() {
            let equal = self.compare_region(
                (left_idx, 0),
                (right_idx, 0),
                left_block.address,
                right_block.address,
                left_block.size,
                left_block.dwarf_type.as_ref().or(right_block.dwarf_type.as_ref()),
            );
            if equal {
                self.left_state.set(left_idx, 0, (right_idx, 0));
                self.right_state.set(right_idx, 0, (left_idx, 0));
            }
            return equal;
        }

        // Fragmented blocks: compare fragment by fragment, at fragment granularity
        // (SPEC_FULL.md §4.9, step 3); type inference propagates from any already-typed sibling.
        let fragment_count = left_block.fragments.len().max(1).min(MAX_FRAGMENTS_PER_BLOCK);
        if left_block.fragments.len() != right_block.fragments.len() {
            return false;
        }

        let mut inferred_type = left_block.dwarf_type.clone().or(right_block.dwarf_type.clone());
        for frag in 0..fragment_count {
            let (l_addr, l_size) = fragment_bounds(left_block, frag);
            let (r_addr, r_size) = fragment_bounds(right_block, frag);
            if l_size != r_size {
                return false;
            }
            let equal = self.compare_region(
                (left_idx, frag),
                (right_idx, frag),
                l_addr,
                r_addr,
                l_size,
                inferred_type.as_ref(),
            );
            if !equal {
                return false;
            }
            self.left_state.set(left_idx, frag, (right_idx, frag));
            self.right_state.set(right_idx, frag, (left_idx, frag));
            if inferred_type.is_none() {
                inferred_type = left_block.dwarf_type.clone().or(right_block.dwarf_type.clone());
            }
        }
        true
    }

    /// Compare one (block, fragment) region between the two sides. Uses a type-guided structural
    /// walk when a DWARF type is known; otherwise falls back to byte compare with pointer
    /// dereferencing (SPEC_FULL.md §4.9, step 2).
    fn compare_region(
        &mut self,
        left_coord: Coord,
        right_coord: Coord,
        left_addr: Address,
        right_addr: Address,
        size: usize,
        ty: Option<&Type>,
    ) -> bool {
        if self.left.is_ignored(left_addr) || self.right.is_ignored(right_addr) {
            return true;
        }
        if !self.previous.insert((left_coord, right_coord)) {
            return true; // cycle: assume equal (tarski-style fixpoint)
        }

        let result = if let Some(ty) = ty {
            self.compare_typed(left_addr, right_addr, ty).unwrap_or(false)
        } else {
            self.compare_bytes_with_pointer_chase(left_addr, right_addr, size)
        };

        self.previous.remove(&(left_coord, right_coord));
        result
    }

    fn compare_typed(&mut self, left_addr: Address, right_addr: Address, ty: &Type) -> Result<bool, TypeMismatch> {
        match ty.kind {
            TypeKind::Array => {
                let elem_size = ty.byte_size / ty.element_count.unwrap_or(1).max(1);
                let count = ty.element_count.unwrap_or(0);
                for i in 0..count {
                    let l = left_addr.add(i * elem_size);
                    let r = right_addr.add(i * elem_size);
                    if !self.compare_bytes_with_pointer_chase(l, r, elem_size) {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            TypeKind::Struct | TypeKind::Class | TypeKind::Union => {
                for member in &ty.members {
                    let l = crate::dwarf::member::resolve_member(member, left_addr).map_err(|_| TypeMismatch)?;
                    let r = crate::dwarf::member::resolve_member(member, right_addr).map_err(|_| TypeMismatch)?;
                    // Member size isn't tracked on `Member` itself; fall back to word-size
                    // comparison, consistent with the untyped path's granularity.
                    if !self.compare_bytes_with_pointer_chase(l, r, std::mem::size_of::<usize>()) {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            TypeKind::Pointer | TypeKind::Reference => {
                let lp = self.left_space.read_pointer(left_addr).map_err(|_| TypeMismatch)?;
                let rp = self.right_space.read_pointer(right_addr).map_err(|_| TypeMismatch)?;
                if !self.left.in_heap_range(lp) || !self.right.in_heap_range(rp) {
                    return Ok(lp == rp);
                }
                Ok(self.compare_region((0, 0), (0, 0), lp, rp, std::mem::size_of::<usize>(), None))
            }
            _ => Ok(self.compare_bytes_with_pointer_chase(left_addr, right_addr, ty.byte_size)),
        }
    }

    /// Byte compare with pointer dereferencing: whenever a word-aligned region compares
    /// unequal, reinterpret the pair as pointers, and if both fall inside the heap, recurse at
    /// the pointees (SPEC_FULL.md §4.9, step 2).
    fn compare_bytes_with_pointer_chase(&mut self, left_addr: Address, right_addr: Address, size: usize) -> bool {
        let word = std::mem::size_of::<usize>();
        let mut offset = 0;
        while offset < size {
            let chunk = word.min(size - offset);
            let mut lbuf = vec![0u8; chunk];
            let mut rbuf = vec![0u8; chunk];
            let ok = self
                .left_space
                .read(&mut lbuf, left_addr.add(offset), Default::default())
                .is_ok()
                && self
                    .right_space
                    .read(&mut rbuf, right_addr.add(offset), Default::default())
                    .is_ok();
            if !ok {
                return false;
            }
            if lbuf != rbuf {
                if chunk == word {
                    let lp = self.left_space.read_pointer(left_addr.add(offset));
                    let rp = self.right_space.read_pointer(right_addr.add(offset));
                    if let (Ok(lp), Ok(rp)) = (lp, rp) {
                        if self.left.in_heap_range(lp) && self.right.in_heap_range(rp) {
                            let sub_equal =
                                self.compare_region((0, 0), (0, 0), lp, rp, word, None);
                            if sub_equal {
                                offset += chunk;
                                continue;
                            }
                        }
                    }
                }
                return false;
            }
            offset += chunk;
        }
        true
    }
}

fn fragment_bounds(block: &HeapBlock, fragment: usize) -> (Address, usize) {
    let start_offset = if fragment == 0 { 0 } else { block.fragments[fragment - 1] };
    let end_offset = block.fragments.get(fragment).copied().unwrap_or(block.size);
    (block.address.add(start_offset), end_offset - start_offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process_mem::ProcessMemory;

    fn layout(addr: usize, size: usize) -> HeapLayout {
        HeapLayout {
            blocks: vec![HeapBlock {
                address: unsafe { Address::from_usize(addr) },
                size,
                busy: true,
                fragments: Vec::new(),
                allocator_type: Some(1),
                dwarf_type: None,
                is_stack_region: false,
            }],
            heap_start: Address::ZERO,
            heap_end: unsafe { Address::from_usize(usize::MAX) },
            to_ignore: Vec::new(),
        }
    }

    #[test]
    fn test_equal_after_no_op() {
        let data = 0xAAAAu64;
        let addr = &data as *const u64 as usize;
        let left = layout(addr, 8);
        let right = layout(addr, 8);

        let left_space = AddressSpace::live(ProcessMemory::for_self());
        let right_space = AddressSpace::live(ProcessMemory::for_self());
        let mut comparator = HeapComparator::new(&left, &right, &left_space, &right_space);
        assert!(comparator.compare());
    }

    #[test]
    fn test_unequal_blocks_of_different_size() {
        let data = 0xAAAAu64;
        let addr = &data as *const u64 as usize;
        let left = layout(addr, 8);
        let mut right = layout(addr, 8);
        right.blocks[0].size = 4;

        let left_space = AddressSpace::live(ProcessMemory::for_self());
        let right_space = AddressSpace::live(ProcessMemory::for_self());
        let mut comparator = HeapComparator::new(&left, &right, &left_space, &right_space);
        assert!(!comparator.compare());
    }

    #[test]
    fn test_extra_busy_block_on_right_breaks_symmetry() {
        let data = [0xAAAAu64, 0xBBBBu64];
        let addr = data.as_ptr() as usize;
        let left = layout(addr, 8);
        let mut right = layout(addr, 8);
        right.blocks.push(HeapBlock {
            address: unsafe { Address::from_usize(addr + 8) },
            size: 8,
            busy: true,
            fragments: Vec::new(),
            allocator_type: Some(1),
            dwarf_type: None,
            is_stack_region: false,
        });

        let left_space = AddressSpace::live(ProcessMemory::for_self());
        let right_space = AddressSpace::live(ProcessMemory::for_self());

        let mut forward = HeapComparator::new(&left, &right, &left_space, &right_space);
        assert!(!forward.compare(), "right has an unmatched busy block, so it must not compare equal");

        let mut backward = HeapComparator::new(&right, &left, &right_space, &left_space);
        assert!(!backward.compare(), "compare must be symmetric");
    }
}
