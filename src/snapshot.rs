//! The ordered collection of RegionSnapshots plus auxiliary metadata that together describe one
//! captured state of the target (SPEC_FULL.md §3, §4.3).

use crate::error::CoreResult;
use crate::page_store::PageStore;
use crate::process_mem::ProcessMemory;
use crate::region::RegionSnapshot;
use crate::util::Address;

/// One thread's unwound call stack at capture time: the frames walked from the saved unwind
/// context, innermost first, each already resolved to its local-variable bindings.
pub struct StackSnapshot {
    pub tid: i32,
    pub frames: Vec<FrameSnapshot>,
}

/// One resolved stack frame: instruction pointer, stack pointer, frame base (if resolved), and
/// the name/address pairs of locals that were successfully evaluated (SPEC_FULL.md §4.7, §4.8).
pub struct FrameSnapshot {
    pub ip: Address,
    pub sp: Address,
    pub frame_base: Option<Address>,
    pub locals: Vec<(String, Option<Address>)>,
}

/// A region whose contents were zeroed before hashing/comparison and must be restored verbatim
/// afterward (SPEC_FULL.md §4.3 step 2, Glossary "Ignored region").
pub struct IgnoredBlob {
    pub address: Address,
    pub original_bytes: Vec<u8>,
}

/// One open file descriptor recorded at capture time, for re-opening/dup2'ing on restore.
pub struct OpenFileDescription {
    pub fd: i32,
    pub path: String,
    pub flags: i32,
    pub offset: u64,
}

/// One captured state of the target process.
pub struct Snapshot {
    pub num_state: u64,
    /// Data regions first, in discovery order, then the Heap region last (SPEC_FULL.md §4.3
    /// step 4).
    pub regions: Vec<RegionSnapshot>,
    pub live_pids: Vec<i32>,
    /// Which Privatized sub-region is "currently active".
    pub privatization_index: usize,
    pub stacks: Vec<StackSnapshot>,
    pub ignored: Vec<IgnoredBlob>,
    pub open_files: Vec<OpenFileDescription>,
    pub heap_bytes_used: usize,
    /// Cheap not-equal filter; not a content-addressing digest, see SPEC_FULL.md §4.3 step 8.
    pub hash: u64,
}

impl Snapshot {
    pub fn new(num_state: u64) -> Self {
        Snapshot {
            num_state,
            regions: Vec::new(),
            live_pids: Vec::new(),
            privatization_index: 0,
            stacks: Vec::new(),
            ignored: Vec::new(),
            open_files: Vec::new(),
            heap_bytes_used: 0,
            hash: 0,
        }
    }

    /// Locate the RegionSnapshot covering `addr`, by linear scan over the ordered region list.
    /// N is expected to be small (single digits, SPEC_FULL.md §4.4), so no interval tree is
    /// warranted.
    pub fn find_region_containing(&self, addr: Address) -> Option<&RegionSnapshot> {
        self.regions.iter().find(|r| r.contains(addr))
    }

    /// Write every region back to its `permanent_address`, in the same order they were
    /// captured, applying parent-snapshot page skipping where `parent` provides indices for a
    /// Chunked region at the same position.
    pub fn restore(
        &self,
        process: &ProcessMemory,
        page_store: &PageStore,
        parent: Option<&Snapshot>,
    ) -> CoreResult<()> {
        for (i, region) in self.regions.iter().enumerate() {
            let parent_indices = parent
                .and_then(|p| p.regions.get(i))
                .and_then(|pr| pr.chunked_indices());
            let my_indices = region.chunked_indices();

            let unchanged_pages: Option<&dyn Fn(usize) -> bool> = match (parent_indices, my_indices) {
                (Some(parent_indices), Some(my_indices)) => {
                    Some(&|page_num: usize| {
                        parent_indices.get(page_num) == my_indices.get(page_num)
                    })
                }
                _ => None,
            };
            region.restore(process, page_store, self.privatization_index, unchanged_pages)?;
        }

        for blob in &self.ignored {
            process.write_bytes(blob.address, &blob.original_bytes)?;
        }
        Ok(())
    }

    /// A cheap rolling hash over invariants that should match iff the two states are plausibly
    /// equal: process count, heap usage, and the per-region sizes. Never a substitute for the
    /// heap comparator; only a fast-reject filter (SPEC_FULL.md §4.3 step 8).
    pub fn compute_hash(&self) -> u64 {
        let mut hash: u64 = 5381;
        let mut mix = |v: u64| hash = hash.wrapping_shl(5).wrapping_add(hash).wrapping_add(v);
        mix(self.live_pids.len() as u64);
        mix(self.heap_bytes_used as u64);
        for region in &self.regions {
            mix(region.size_bytes as u64);
            mix(region.start_address.as_usize() as u64);
        }
        hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_info::ObjectInformation;
    use crate::page_store::PageStore;
    use crate::region::{RegionKind, StorageKind};

    fn flat_region(addr: usize, data: Vec<u8>) -> RegionSnapshot {
        RegionSnapshot {
            region_kind: RegionKind::Data,
            size_bytes: data.len(),
            storage: StorageKind::Flat(data),
            start_address: unsafe { Address::from_usize(addr) },
            permanent_address: unsafe { Address::from_usize(addr) },
            object_info: None,
        }
    }

    #[test]
    fn test_find_region_containing() {
        let mut snapshot = Snapshot::new(0);
        snapshot.regions.push(flat_region(0x1000, vec![0u8; 16]));
        snapshot.regions.push(flat_region(0x2000, vec![0u8; 16]));

        let found = snapshot.find_region_containing(unsafe { Address::from_usize(0x2004) });
        assert!(found.is_some());
        assert_eq!(found.unwrap().start_address.as_usize(), 0x2000);

        let missing = snapshot.find_region_containing(unsafe { Address::from_usize(0x3000) });
        assert!(missing.is_none());
    }

    #[test]
    fn test_hash_reflects_region_layout() {
        let mut s1 = Snapshot::new(0);
        s1.regions.push(flat_region(0x1000, vec![1u8; 16]));
        let h1 = s1.compute_hash();

        let mut s2 = Snapshot::new(1);
        s2.regions.push(flat_region(0x1000, vec![2u8; 16]));
        let h2 = s2.compute_hash();

        assert_eq!(h1, h2, "hash depends on layout, not content, per its role as a fast filter");
    }

    #[test]
    fn test_object_information_unused_field_compiles() {
        let _ = ObjectInformation::empty(Address::ZERO, false);
        let _ = PageStore::new(1, 4096).unwrap();
    }
}
